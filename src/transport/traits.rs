//! Transport trait abstraction for pluggable link backends

use crate::error::ConnectError;
use anyhow::Result;
use async_trait::async_trait;
use device_link_shared::PeerAddress;
use tokio::io::AsyncWrite;

/// An open byte stream to the peer
#[async_trait]
pub trait TransportStream: AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The stream type this connector produces
    type Stream: TransportStream;

    /// Attempt to connect to the peer, returning a stream on success
    async fn connect(&self, peer: &PeerAddress) -> Result<Self::Stream, ConnectError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
