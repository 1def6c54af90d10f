//! Signaling transport abstraction.
//!
//! A factory produces a connected transport plus a stream of events; the
//! transport itself only knows how to send and how to close. One
//! transport is created per (re)connection attempt, so the transport
//! never reconnects itself; that policy belongs to the client.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel is not open. Surfaced to the caller as a non-fatal
    /// error; messages are never queued for later delivery.
    #[error("transport is not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    Send(String),
}

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the relay.
    MessageReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active connection to the signaling relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a text frame to the relay.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Closes the connection. Idempotent.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with its event
    /// stream.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}
