//! Per-server session client
//!
//! One [`ServerClient`] owns one transport through a dedicated I/O task.
//! Callers never touch the transport directly: requests go over a command
//! channel and come back through one-shot replies, so a single task serializes
//! all sends and is the only reader. A response whose caller has given up
//! (for example after a timeout) finds its one-shot receiver dropped and is
//! discarded without any observable effect.

use crate::error::{Result, ToolLinkError};
use crate::protocol::{RpcMessage, RpcNotification, RpcRequest, RpcResponse, methods};
use crate::transport::ToolTransport;
use crate::types::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, RemoteTool, ServerInfo,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Commands accepted by the I/O task
enum IoCommand {
    /// Send a request and route its response to `reply`
    Request {
        message: RpcRequest,
        reply: oneshot::Sender<Result<RpcResponse>>,
    },
    /// Send a fire-and-forget notification
    Notify { message: RpcNotification },
    /// Close the transport and stop
    Close,
}

/// Session client for one upstream tool server
pub struct ServerClient {
    identifier: String,
    command_tx: mpsc::Sender<IoCommand>,
    next_id: AtomicI64,
    initialized: AtomicBool,
    server_info: parking_lot::RwLock<Option<ServerInfo>>,
}

impl ServerClient {
    /// Wrap a transport, spawning its I/O task
    pub fn new(identifier: impl Into<String>, transport: Box<dyn ToolTransport>) -> Self {
        let identifier = identifier.into();
        let (command_tx, command_rx) = mpsc::channel(32);

        tokio::spawn(io_task(identifier.clone(), transport, command_rx));

        Self {
            identifier,
            command_tx,
            next_id: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
            server_info: parking_lot::RwLock::new(None),
        }
    }

    /// Server identifier this client serves
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether the handshake has completed
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Server identity captured during the handshake
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    /// Run the session handshake: `initialize` followed by the
    /// `notifications/initialized` acknowledgement
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: crate::protocol::PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo::default(),
        };

        let result = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(&params)?))
            .await?;

        let init: InitializeResult = serde_json::from_value(result)?;

        self.notify(methods::INITIALIZED).await?;

        *self.server_info.write() = Some(init.server_info.clone());
        self.initialized.store(true, Ordering::SeqCst);

        debug!(
            server = %self.identifier,
            remote = %init.server_info.name,
            "session established"
        );

        Ok(init)
    }

    /// Ask the server for its current tool list
    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
        let result = self.request(methods::TOOLS_LIST, None).await?;

        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| ToolLinkError::protocol("tools/list result has no tools field"))?;

        Ok(serde_json::from_value(tools)?)
    }

    /// Invoke a tool and return the raw result value
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        let params = json!({
            "name": name,
            "arguments": arguments.unwrap_or_else(|| json!({})),
        });

        self.request(methods::TOOLS_CALL, Some(params)).await
    }

    /// Close the session; the I/O task shuts the transport down
    pub async fn close(&self) {
        let _ = self.command_tx.send(IoCommand::Close).await;
        self.initialized.store(false, Ordering::SeqCst);
    }

    /// Send a request through the I/O task and wait for its response
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut message = RpcRequest::new(id, method);
        if let Some(params) = params {
            message = message.with_params(params);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(IoCommand::Request {
                message,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ToolLinkError::NotConnected)?;

        let response = reply_rx
            .await
            .map_err(|_| ToolLinkError::transport("session closed while awaiting response"))??;

        response.into_result().map_err(|e| ToolLinkError::Rpc {
            code: e.code,
            message: e.message,
        })
    }

    /// Send a notification through the I/O task
    async fn notify(&self, method: &str) -> Result<()> {
        self.command_tx
            .send(IoCommand::Notify {
                message: RpcNotification::new(method),
            })
            .await
            .map_err(|_| ToolLinkError::NotConnected)
    }
}

/// Single owner of the transport: serializes sends, routes responses to the
/// pending one-shots, and tears the transport down on exit.
async fn io_task(
    identifier: String,
    mut transport: Box<dyn ToolTransport>,
    mut command_rx: mpsc::Receiver<IoCommand>,
) {
    let mut pending: HashMap<String, oneshot::Sender<Result<RpcResponse>>> = HashMap::new();

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(IoCommand::Request { message, reply }) => {
                    let key = message.id.to_string();
                    match transport.send(RpcMessage::Request(message)).await {
                        Ok(()) => {
                            pending.insert(key, reply);
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e));
                        }
                    }
                }
                Some(IoCommand::Notify { message }) => {
                    if let Err(e) = transport.send(RpcMessage::Notification(message)).await {
                        warn!(server = %identifier, "notification send failed: {}", e);
                    }
                }
                Some(IoCommand::Close) | None => break,
            },
            received = transport.receive() => match received {
                Ok(RpcMessage::Response(response)) => {
                    let key = response.id.to_string();
                    match pending.remove(&key) {
                        // A failed send means the caller already went away,
                        // typically via timeout; the response is discarded.
                        Some(reply) => {
                            let _ = reply.send(Ok(response));
                        }
                        None => {
                            debug!(
                                server = %identifier,
                                id = %key,
                                "discarding response with no pending request"
                            );
                        }
                    }
                }
                Ok(RpcMessage::Notification(notification)) => {
                    debug!(
                        server = %identifier,
                        method = %notification.method,
                        "ignoring server notification"
                    );
                }
                Ok(RpcMessage::Request(request)) => {
                    debug!(
                        server = %identifier,
                        method = %request.method,
                        "ignoring server-initiated request"
                    );
                }
                Err(e) => {
                    warn!(server = %identifier, "transport failed: {}", e);
                    for (_, reply) in pending.drain() {
                        let _ = reply.send(Err(e.clone()));
                    }
                    break;
                }
            }
        }
    }

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(ToolLinkError::NotConnected));
    }

    if let Err(e) = transport.close().await {
        debug!(server = %identifier, "transport close failed: {}", e);
    }
}
