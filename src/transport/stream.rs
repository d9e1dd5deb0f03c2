//! Persistent HTTP stream transport
//!
//! Sends requests as HTTP POSTs against a single endpoint and receives
//! messages over a server-sent-event stream from the same endpoint.

use super::ToolTransport;
use crate::error::{Result, ToolLinkError};
use crate::protocol::RpcMessage;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Transport over a persistent HTTP stream
pub struct StreamTransport {
    client: Client,
    endpoint: String,
    connected: Arc<AtomicBool>,
    message_rx: mpsc::Receiver<RpcMessage>,
    message_tx: mpsc::Sender<RpcMessage>,
    listener_handle: Option<tokio::task::JoinHandle<()>>,
}

impl StreamTransport {
    /// Build the transport; `connect` must be called before use
    pub fn new(endpoint: &str, headers: &HashMap<String, String>) -> Result<Self> {
        let mut header_map = reqwest::header::HeaderMap::new();
        header_map.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        header_map.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json, text/event-stream"),
        );

        for (key, value) in headers {
            if let (Ok(name), Ok(val)) = (
                reqwest::header::HeaderName::try_from(key.as_str()),
                reqwest::header::HeaderValue::try_from(value.as_str()),
            ) {
                header_map.insert(name, val);
            } else {
                warn!("skipping invalid header '{}'", key);
            }
        }

        let client = Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| ToolLinkError::transport(format!("failed to build HTTP client: {}", e)))?;

        let (message_tx, message_rx) = mpsc::channel(100);

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            connected: Arc::new(AtomicBool::new(false)),
            message_rx,
            message_tx,
            listener_handle: None,
        })
    }

    /// Start the event-stream listener
    pub async fn connect(&mut self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let connected = Arc::clone(&self.connected);
        let message_tx = self.message_tx.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = event_listener(client, &endpoint, connected, message_tx).await {
                error!("event-stream listener failed: {}", e);
            }
        });

        self.listener_handle = Some(handle);
        debug!("stream transport connected to {}", self.endpoint);
        Ok(())
    }
}

/// Event-stream listener task
async fn event_listener(
    client: Client,
    endpoint: &str,
    connected: Arc<AtomicBool>,
    message_tx: mpsc::Sender<RpcMessage>,
) -> Result<()> {
    let response = client
        .get(endpoint)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .map_err(|e| ToolLinkError::transport(format!("event-stream connect failed: {}", e)))?;

    if !response.status().is_success() {
        connected.store(false, Ordering::SeqCst);
        return Err(ToolLinkError::transport(format!(
            "event-stream rejected with status {}",
            response.status()
        )));
    }

    use futures::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while connected.load(Ordering::SeqCst) {
        match stream.next().await {
            Some(Ok(chunk)) => {
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(event_end) = buffer.find("\n\n") {
                    let event = buffer[..event_end].to_string();
                    buffer = buffer[event_end + 2..].to_string();

                    if let Some(message) = parse_event(&event) {
                        if message_tx.send(message).await.is_err() {
                            // Receiver side is gone; nothing left to feed
                            connected.store(false, Ordering::SeqCst);
                            return Ok(());
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!("event-stream read failed: {}", e);
                break;
            }
            None => {
                debug!("event-stream ended");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    Ok(())
}

/// Extract an RPC message from one server-sent event
fn parse_event(event: &str) -> Option<RpcMessage> {
    let mut data = String::new();
    for line in event.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim());
        }
    }

    if data.is_empty() {
        return None;
    }

    match serde_json::from_str::<RpcMessage>(&data) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("discarding unparseable event: {} - data: {}", e, data);
            None
        }
    }
}

#[async_trait]
impl ToolTransport for StreamTransport {
    async fn send(&mut self, message: RpcMessage) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ToolLinkError::NotConnected);
        }

        let json = serde_json::to_string(&message)?;
        let response = self
            .client
            .post(&self.endpoint)
            .body(json)
            .send()
            .await
            .map_err(|e| ToolLinkError::transport(format!("send failed: {}", e)))?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ToolLinkError::Rpc {
                    code: status.as_u16() as i32,
                    message: format!("HTTP {}: {}", status, body),
                })
            }
        }
    }

    async fn receive(&mut self) -> Result<RpcMessage> {
        self.message_rx
            .recv()
            .await
            .ok_or_else(|| ToolLinkError::transport("event-stream channel closed"))
    }

    async fn close(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);

        if let Some(handle) = self.listener_handle.take() {
            handle.abort();
        }

        debug!("stream transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.listener_handle.take() {
            handle.abort();
        }
    }
}
