//! Multi-server tool-connection management
//!
//! This crate maintains live sessions to a dynamically-configured set of
//! remote tool servers and routes tool invocations to the right one. Each
//! server is described by a [`ServerDescriptor`], reached over a subprocess
//! pipe or a persistent HTTP stream, and driven through a JSON-RPC session
//! with handshake, tool discovery, and invocation.
//!
//! The central type is [`ToolServerManager`]:
//!
//! ```no_run
//! use toollink::{ServerDescriptor, ToolServerManager};
//!
//! # async fn demo() -> toollink::Result<()> {
//! let manager = ToolServerManager::new();
//!
//! let descriptor = ServerDescriptor::stdio("search-server", vec![]);
//! manager.connect(&descriptor).await?;
//!
//! let envelope = manager
//!     .execute_tool("search", Some(serde_json::json!({"query": "rust"})), None, None)
//!     .await?;
//! println!("{}", envelope.text());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod normalize;
pub mod protocol;
pub mod settings;
pub mod transport;
pub mod types;

pub use client::ServerClient;
pub use config::{ManagerConfig, ServerDescriptor, TransportKind};
pub use error::{Result, ToolLinkError};
pub use manager::ToolServerManager;
pub use normalize::{ContentBlock, ResponseEnvelope, normalize};
pub use settings::{SettingsPersist, SettingsSnapshot};
pub use transport::{DefaultTransportFactory, ToolTransport, TransportFactory};
pub use types::{
    ConnectOutcome, ConnectStatus, ConnectionStatus, RemoteTool, ServerInfo, ToolDescriptor,
};
