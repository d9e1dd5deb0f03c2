//! Subprocess-pipe transport
//!
//! Launches the server as a child process and exchanges newline-delimited
//! JSON over its stdin/stdout. Stderr is drained into the log so a noisy
//! server cannot block on a full pipe.

use super::ToolTransport;
use crate::error::{Result, ToolLinkError};
use crate::protocol::RpcMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// Transport over a child process's stdin/stdout
pub struct StdioTransport {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    line_buffer: String,
    connected: bool,
}

impl StdioTransport {
    /// Spawn the server process and wire up its pipes
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ToolLinkError::transport(format!("failed to spawn '{}': {}", command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolLinkError::transport("failed to open stdin pipe"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolLinkError::transport("failed to open stdout pipe"))?;

        if let Some(stderr) = child.stderr.take() {
            let command = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %command, "stderr: {}", line);
                }
            });
        }

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            stdout: Some(BufReader::new(stdout)),
            line_buffer: String::new(),
            connected: true,
        })
    }
}

#[async_trait]
impl ToolTransport for StdioTransport {
    async fn send(&mut self, message: RpcMessage) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(ToolLinkError::NotConnected)?;

        let json = serde_json::to_string(&message)?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<RpcMessage> {
        let stdout = self.stdout.as_mut().ok_or(ToolLinkError::NotConnected)?;

        // read_line appends, so a cancelled read leaves its partial line in
        // the buffer for the next call; clear only after a full line arrives
        let bytes_read = stdout.read_line(&mut self.line_buffer).await?;

        if bytes_read == 0 {
            self.connected = false;
            return Err(ToolLinkError::transport("server process closed its pipe"));
        }

        let line = self.line_buffer.trim().to_string();
        self.line_buffer.clear();

        let message: RpcMessage = serde_json::from_str(&line)?;
        Ok(message)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;

        // Dropping stdin signals EOF to the child
        self.stdin.take();

        if let Some(mut child) = self.child.take() {
            tokio::select! {
                result = child.wait() => {
                    result.map_err(|e| ToolLinkError::transport(e.to_string()))?;
                }
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    child.kill().await.ok();
                }
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}
