//! Shared fixtures: an in-process scripted transport behind the factory seam
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use toollink::protocol::{RpcError, RpcMessage, RpcResponse, methods};
use toollink::{
    ManagerConfig, Result, ServerDescriptor, ToolLinkError, ToolTransport, TransportFactory,
    TransportKind,
};

/// Scripted behavior of one fake upstream server, shared between the test
/// body and the transports the factory hands out
pub struct ServerBehavior {
    /// Tool names reported by discovery
    pub tools: Mutex<Vec<String>>,
    /// Refuse every transport open
    pub fail_opens: AtomicBool,
    /// Never answer `initialize`
    pub swallow_initialize: AtomicBool,
    /// Never answer `tools/list`
    pub swallow_lists: AtomicBool,
    /// Fail this many upcoming `tools/list` calls, then recover
    pub fail_next_lists: AtomicU32,
    /// Fail every `tools/list` call
    pub fail_lists: AtomicBool,
    /// Never answer `tools/call`
    pub swallow_calls: AtomicBool,
    /// Transport opens observed
    pub opens: AtomicU32,
    /// `tools/list` calls observed
    pub list_calls: AtomicU32,
    /// `tools/call` calls observed
    pub call_calls: AtomicU32,
    /// When each open happened, for backoff assertions
    pub open_instants: Mutex<Vec<tokio::time::Instant>>,
}

impl ServerBehavior {
    pub fn with_tools(tools: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tools: Mutex::new(tools.iter().map(|t| t.to_string()).collect()),
            fail_opens: AtomicBool::new(false),
            swallow_initialize: AtomicBool::new(false),
            swallow_lists: AtomicBool::new(false),
            fail_next_lists: AtomicU32::new(0),
            fail_lists: AtomicBool::new(false),
            swallow_calls: AtomicBool::new(false),
            opens: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            call_calls: AtomicU32::new(0),
            open_instants: Mutex::new(Vec::new()),
        })
    }

    fn should_fail_list(&self) -> bool {
        let remaining = self.fail_next_lists.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_lists.store(remaining - 1, Ordering::SeqCst);
            return true;
        }
        self.fail_lists.load(Ordering::SeqCst)
    }
}

/// Transport that answers from a [`ServerBehavior`] script
pub struct FakeTransport {
    behavior: Arc<ServerBehavior>,
    incoming_tx: mpsc::UnboundedSender<RpcMessage>,
    incoming_rx: mpsc::UnboundedReceiver<RpcMessage>,
}

impl FakeTransport {
    fn new(behavior: Arc<ServerBehavior>) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            behavior,
            incoming_tx,
            incoming_rx,
        }
    }
}

#[async_trait]
impl ToolTransport for FakeTransport {
    async fn send(&mut self, message: RpcMessage) -> Result<()> {
        let RpcMessage::Request(req) = message else {
            return Ok(());
        };

        let response = match req.method.as_str() {
            methods::INITIALIZE if self.behavior.swallow_initialize.load(Ordering::SeqCst) => {
                return Ok(());
            }
            methods::INITIALIZE => RpcResponse::success(
                req.id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "serverInfo": {"name": "fake-server", "version": "0.0.1"},
                }),
            ),
            methods::TOOLS_LIST => {
                self.behavior.list_calls.fetch_add(1, Ordering::SeqCst);
                if self.behavior.swallow_lists.load(Ordering::SeqCst) {
                    return Ok(());
                }
                if self.behavior.should_fail_list() {
                    RpcResponse::error(req.id, RpcError::new(-32000, "listing failed"))
                } else {
                    let tools: Vec<Value> = self
                        .behavior
                        .tools
                        .lock()
                        .iter()
                        .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
                        .collect();
                    RpcResponse::success(req.id, json!({"tools": tools}))
                }
            }
            methods::TOOLS_CALL => {
                self.behavior.call_calls.fetch_add(1, Ordering::SeqCst);
                if self.behavior.swallow_calls.load(Ordering::SeqCst) {
                    return Ok(());
                }
                let tool = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                RpcResponse::success(req.id, json!({"content": [format!("{tool} ran")]}))
            }
            _ => RpcResponse::error(req.id, RpcError::new(-32601, "Method not found")),
        };

        self.incoming_tx.send(RpcMessage::Response(response)).ok();
        Ok(())
    }

    async fn receive(&mut self) -> Result<RpcMessage> {
        self.incoming_rx
            .recv()
            .await
            .ok_or_else(|| ToolLinkError::transport("fake transport drained"))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Factory mapping stream endpoints to scripted behaviors
#[derive(Default)]
pub struct FakeFactory {
    servers: Mutex<HashMap<String, Arc<ServerBehavior>>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, endpoint: &str, behavior: Arc<ServerBehavior>) {
        self.servers.lock().insert(endpoint.to_string(), behavior);
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn open(&self, kind: &TransportKind) -> Result<Box<dyn ToolTransport>> {
        let TransportKind::Stream { endpoint, .. } = kind else {
            return Err(ToolLinkError::transport("fake factory only serves streams"));
        };

        let behavior = self
            .servers
            .lock()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| ToolLinkError::transport(format!("unknown endpoint {endpoint}")))?;

        behavior.opens.fetch_add(1, Ordering::SeqCst);
        behavior.open_instants.lock().push(tokio::time::Instant::now());

        if behavior.fail_opens.load(Ordering::SeqCst) {
            return Err(ToolLinkError::transport("connection refused"));
        }

        Ok(Box::new(FakeTransport::new(behavior)))
    }
}

/// Stream descriptor whose endpoint doubles as the factory lookup key
pub fn stream_descriptor(identifier: &str) -> ServerDescriptor {
    ServerDescriptor::stream(format!("http://{identifier}.test")).with_identifier(identifier)
}

/// Endpoint matching [`stream_descriptor`]
pub fn endpoint_of(identifier: &str) -> String {
    format!("http://{identifier}.test")
}

/// Configuration with short delays so retry tests stay fast
pub fn fast_config() -> ManagerConfig {
    ManagerConfig::default().with_retry_policy(Duration::from_millis(10), 3)
}
