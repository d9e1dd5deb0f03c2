//! Error types for the tool-connection manager

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ToolLinkError>;

/// Errors surfaced by the connection manager and its lower layers
#[derive(Debug, Error, Clone)]
pub enum ToolLinkError {
    /// Unknown transport kind in a descriptor. Fatal, never retried.
    #[error("unsupported transport kind: {kind}")]
    TransportUnsupported { kind: String },

    /// Descriptor is missing a field its transport kind requires
    #[error("invalid descriptor '{identifier}': {message}")]
    InvalidDescriptor {
        identifier: String,
        message: String,
    },

    /// Transport open or handshake did not finish in time
    #[error("handshake with '{identifier}' timed out after {}s", timeout.as_secs())]
    ConnectionTimeout {
        identifier: String,
        timeout: Duration,
    },

    /// Tool discovery did not finish in time
    #[error("tool discovery on '{identifier}' timed out after {}s", timeout.as_secs())]
    DiscoveryTimeout {
        identifier: String,
        timeout: Duration,
    },

    /// Connect flow exhausted its retry budget
    #[error("connection to '{identifier}' failed after {attempts} attempts: {source}")]
    ConnectionFailed {
        identifier: String,
        attempts: u32,
        #[source]
        source: Box<ToolLinkError>,
    },

    /// A tool invocation did not finish in time. Surfaced immediately,
    /// never retried by the manager.
    #[error("tool call '{tool}' on '{identifier}' timed out after {}s", timeout.as_secs())]
    ExecutionTimeout {
        identifier: String,
        tool: String,
        timeout: Duration,
    },

    /// No connected server exposes the requested tool
    #[error("tool '{name}' not found on any connected server; known tools: [{}]", known.join(", "))]
    ToolNotFound { name: String, known: Vec<String> },

    /// The owning server failed its health gate
    #[error("server '{identifier}' is not healthy; reconnect required")]
    ConnectionUnhealthy { identifier: String },

    /// Transport-level failure (I/O, process spawn, HTTP)
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected protocol traffic
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error response from the remote server
    #[error("server error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// JSON encode/decode failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The injected settings store rejected a persist
    #[error("settings persistence failed: {0}")]
    Settings(String),

    /// Session is gone or was never established
    #[error("not connected")]
    NotConnected,
}

impl ToolLinkError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a settings error
    pub fn settings(message: impl Into<String>) -> Self {
        Self::Settings(message.into())
    }

    /// Create an invalid-descriptor error
    pub fn invalid_descriptor(
        identifier: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidDescriptor {
            identifier: identifier.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ToolLinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ToolLinkError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_not_found_lists_known_pairs() {
        let err = ToolLinkError::ToolNotFound {
            name: "search".to_string(),
            known: vec!["a:translate".to_string(), "b:summarize".to_string()],
        };

        let msg = err.to_string();
        assert!(msg.contains("a:translate"));
        assert!(msg.contains("b:summarize"));
    }

    #[test]
    fn test_connection_failed_carries_cause() {
        let err = ToolLinkError::ConnectionFailed {
            identifier: "srv".to_string(),
            attempts: 3,
            source: Box::new(ToolLinkError::ConnectionTimeout {
                identifier: "srv".to_string(),
                timeout: Duration::from_secs(30),
            }),
        };

        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("timed out after 30s"));
    }

    #[test]
    fn test_io_error_maps_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: ToolLinkError = io.into();
        assert!(matches!(err, ToolLinkError::Transport(_)));
    }
}
