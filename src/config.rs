//! Server descriptors and manager tuning knobs

use crate::error::{Result, ToolLinkError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Transport kind label for persistent-stream servers
pub const TRANSPORT_STREAM: &str = "stream";
/// Transport kind label for subprocess-pipe servers
pub const TRANSPORT_STDIO: &str = "stdio";

/// Configuration describing how to reach one upstream tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    /// Stable registry key; derived from the endpoint or command when not given
    pub identifier: String,
    /// Transport kind: "stream" or "stdio"
    pub transport: String,
    /// Endpoint URL (stream transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Command to launch (stdio transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Command arguments (stdio transport)
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides (stdio transport)
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Extra HTTP headers (stream transport)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Connect automatically when loaded from settings
    #[serde(default)]
    pub auto_connect: bool,
    /// Supplied by the process rather than user settings
    #[serde(default)]
    pub built_in: bool,
}

impl ServerDescriptor {
    /// Create a descriptor for a persistent-stream server
    pub fn stream(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            identifier: derive_stream_identifier(&endpoint),
            transport: TRANSPORT_STREAM.to_string(),
            endpoint: Some(endpoint),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            headers: HashMap::new(),
            auto_connect: false,
            built_in: false,
        }
    }

    /// Create a descriptor for a subprocess-pipe server
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        let command = command.into();
        Self {
            identifier: derive_stdio_identifier(&command),
            transport: TRANSPORT_STDIO.to_string(),
            endpoint: None,
            command: Some(command),
            args,
            env: HashMap::new(),
            headers: HashMap::new(),
            auto_connect: false,
            built_in: false,
        }
    }

    /// Override the derived identifier
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Add an environment override (stdio transport)
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add an HTTP header (stream transport)
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Mark the descriptor for automatic connection
    pub fn auto_connect(mut self, auto: bool) -> Self {
        self.auto_connect = auto;
        self
    }

    /// Mark the descriptor as supplied by the process itself
    pub fn built_in(mut self, built_in: bool) -> Self {
        self.built_in = built_in;
        self
    }

    /// Validate and resolve the concrete transport parameters.
    ///
    /// Fails fast on a missing endpoint or command so misconfiguration is
    /// reported instead of silently falling back, and never consumes a
    /// connect retry.
    pub fn resolve_transport(&self) -> Result<TransportKind> {
        match self.transport.as_str() {
            TRANSPORT_STREAM => {
                let endpoint = self
                    .endpoint
                    .as_ref()
                    .filter(|e| !e.is_empty())
                    .ok_or_else(|| {
                        ToolLinkError::invalid_descriptor(
                            &self.identifier,
                            "stream transport requires an endpoint",
                        )
                    })?;

                Ok(TransportKind::Stream {
                    endpoint: endpoint.clone(),
                    headers: self.headers.clone(),
                })
            }
            TRANSPORT_STDIO => {
                let command = self
                    .command
                    .as_ref()
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| {
                        ToolLinkError::invalid_descriptor(
                            &self.identifier,
                            "stdio transport requires a command",
                        )
                    })?;

                Ok(TransportKind::Stdio {
                    command: command.clone(),
                    args: self.args.clone(),
                    env: self.env.clone(),
                })
            }
            other => Err(ToolLinkError::TransportUnsupported {
                kind: other.to_string(),
            }),
        }
    }
}

/// Resolved transport parameters, ready to open
#[derive(Debug, Clone)]
pub enum TransportKind {
    /// Persistent HTTP stream
    Stream {
        endpoint: String,
        headers: HashMap<String, String>,
    },
    /// Subprocess with piped stdin/stdout
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
}

/// Derive a stable identifier from a stream endpoint URL.
///
/// Strips the scheme, then maps every non-alphanumeric run to a single dash:
/// `http://localhost:3000/tools` becomes `localhost-3000-tools`.
fn derive_stream_identifier(endpoint: &str) -> String {
    let without_scheme = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);

    let mut id = String::with_capacity(without_scheme.len());
    let mut last_dash = true;
    for c in without_scheme.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            id.push('-');
            last_dash = true;
        }
    }

    let id = id.trim_end_matches('-').to_string();
    if id.is_empty() {
        "stream-server".to_string()
    } else {
        id
    }
}

/// Derive a stable identifier from a stdio command path
fn derive_stdio_identifier(command: &str) -> String {
    Path::new(command)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("stdio-server")
        .to_string()
}

/// Tuning knobs for the connection manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Timeout for transport open plus handshake
    pub handshake_timeout: Duration,
    /// Timeout for the post-handshake tool discovery call
    pub discovery_timeout: Duration,
    /// Default timeout for a tool invocation
    pub call_timeout: Duration,
    /// How long a successful health check stays trusted without a probe
    pub health_check_interval: Duration,
    /// Timeout for a liveness probe; shorter than the general timeouts so
    /// an unhealthy server is reported quickly
    pub probe_timeout: Duration,
    /// Base delay for exponential connect backoff
    pub retry_base_delay: Duration,
    /// Total connect attempts before giving up
    pub max_retries: u32,
    /// Consecutive invocation failures before a warning is emitted
    pub failure_warn_threshold: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            retry_base_delay: Duration::from_millis(1000),
            max_retries: 3,
            failure_warn_threshold: 5,
        }
    }
}

impl ManagerConfig {
    /// Set the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the discovery timeout
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the default tool invocation timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the health cache window
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the liveness probe timeout
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the connect retry policy
    pub fn with_retry_policy(mut self, base_delay: Duration, max_retries: u32) -> Self {
        self.retry_base_delay = base_delay;
        self.max_retries = max_retries;
        self
    }

    /// Delay before the attempt following `attempt_index`
    pub(crate) fn backoff_delay(&self, attempt_index: u32) -> Duration {
        self.retry_base_delay * 2u32.saturating_pow(attempt_index)
    }
}
