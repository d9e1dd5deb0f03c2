//! Transport layer
//!
//! The manager depends on a duplex message channel, not on any particular
//! transport. Two implementations are provided: a subprocess pipe
//! ([`StdioTransport`]) and a persistent HTTP stream ([`StreamTransport`]).

pub mod stdio;
pub mod stream;

pub use stdio::StdioTransport;
pub use stream::StreamTransport;

use crate::config::TransportKind;
use crate::error::Result;
use crate::protocol::RpcMessage;
use async_trait::async_trait;

/// Duplex message channel to one upstream server
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Send a message
    async fn send(&mut self, message: RpcMessage) -> Result<()>;

    /// Receive the next message
    async fn receive(&mut self) -> Result<RpcMessage>;

    /// Close the channel
    async fn close(&mut self) -> Result<()>;

    /// Whether the channel is still usable
    fn is_connected(&self) -> bool;
}

/// Opens transports from resolved connection parameters.
///
/// The manager only ever opens transports through this seam, which lets
/// tests substitute an in-process implementation.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a transport for the given parameters
    async fn open(&self, kind: &TransportKind) -> Result<Box<dyn ToolTransport>>;
}

/// Factory that spawns real subprocess and HTTP-stream transports
#[derive(Debug, Default)]
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn open(&self, kind: &TransportKind) -> Result<Box<dyn ToolTransport>> {
        match kind {
            TransportKind::Stdio { command, args, env } => {
                let transport = StdioTransport::spawn(command, args, env).await?;
                Ok(Box::new(transport))
            }
            TransportKind::Stream { endpoint, headers } => {
                let mut transport = StreamTransport::new(endpoint, headers)?;
                transport.connect().await?;
                Ok(Box::new(transport))
            }
        }
    }
}
