//! Shared data types: handshake payloads, tool metadata, status projections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Server identity returned by the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

/// Handshake request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the client speaks
    pub protocol_version: String,
    /// Client capabilities (opaque maps, none advertised today)
    pub capabilities: ClientCapabilities,
    /// Client identity
    pub client_info: ClientInfo,
}

/// Client capabilities advertised during the handshake
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<HashMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<HashMap<String, Value>>,
}

/// Client identity sent during the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Handshake response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server speaks
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Server capabilities, opaque to the manager
    #[serde(default)]
    pub capabilities: Value,
    /// Server identity
    pub server_info: ServerInfo,
}

/// A tool as reported on the wire by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTool {
    /// Tool name, unique only within one server
    pub name: String,
    /// Tool description
    #[serde(default)]
    pub description: Option<String>,
    /// Input schema, passed through and never interpreted
    #[serde(default)]
    pub input_schema: Value,
}

/// A discovered tool annotated with its owning connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: Option<String>,
    /// Input schema, opaque
    pub input_schema: Value,
    /// Identifier of the server that exposes this tool
    pub source_server: String,
    /// When the owning connection last ran discovery
    pub discovered_at: DateTime<Utc>,
}

impl ToolDescriptor {
    /// Annotate a wire-level tool with its owning connection
    pub fn from_remote(tool: RemoteTool, source: &str, discovered_at: DateTime<Utc>) -> Self {
        Self {
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
            source_server: source.to_string(),
            discovered_at,
        }
    }
}

/// Outcome of a `connect` call
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    /// Whether a new session was established or an existing one reused
    pub status: ConnectStatus,
    /// Tools discovered on the connection
    pub tools: Vec<ToolDescriptor>,
    /// Server identity from the handshake, when known
    pub server_info: Option<ServerInfo>,
}

/// Connect disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// A fresh session was opened
    Connected,
    /// A healthy session already existed; no transport was opened
    AlreadyConnected,
}

/// Read-only status projection for one connection
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    /// Server identifier
    pub identifier: String,
    /// Number of tools currently discovered
    pub tool_count: usize,
    /// When the session was established
    pub connected_at: DateTime<Utc>,
    /// Last successful health check
    pub last_health_check: DateTime<Utc>,
    /// Consecutive tool-invocation failures
    pub consecutive_failures: u32,
    /// Whether the cached health window still covers this connection
    pub is_healthy: bool,
}
