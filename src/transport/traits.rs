//! Message exchange seam between the cache and the network
//!
//! The cache never touches sockets. It hands a command line and a response
//! channel to a `MessageExchange`, which eventually delivers the peer's full
//! response line to that channel, or drops the channel without answering.
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{CacheError, Result};

/// Destination for one or more response lines
pub type ResponseSender = mpsc::Sender<String>;

#[async_trait]
pub trait MessageExchange: Send + Sync {
    /// Open a connection to `address` ("host:port")
    async fn connect(&self, address: &str) -> Result<()>;

    /// Close the connection to `address`
    async fn disconnect(&self, address: &str) -> Result<()>;

    /// Send `command` to `address`; the response line goes to `respond_to`
    async fn send_request(
        &self,
        address: &str,
        command: &str,
        respond_to: ResponseSender,
    ) -> Result<()>;
}

/// Exchange for nodes that never talk to peers
pub struct NoOpExchange;

#[async_trait]
impl MessageExchange for NoOpExchange {
    async fn connect(&self, address: &str) -> Result<()> {
        Err(CacheError::ConnectionFailure(format!(
            "No transport configured to reach {}",
            address
        )))
    }

    async fn disconnect(&self, _address: &str) -> Result<()> {
        // No-op
        Ok(())
    }

    async fn send_request(
        &self,
        address: &str,
        _command: &str,
        _respond_to: ResponseSender,
    ) -> Result<()> {
        Err(CacheError::Transport(format!(
            "No transport configured to reach {}",
            address
        )))
    }
}
