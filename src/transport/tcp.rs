//! TCP transport implementation for the simulated peripheral

use crate::error::ConnectError;
use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::Result;
use async_trait::async_trait;
use device_link_shared::PeerAddress;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;

#[async_trait]
impl TransportStream for TcpStream {
    async fn shutdown(&mut self) -> Result<()> {
        AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// TCP connector standing in for RFCOMM during development
///
/// The peer address is a `host:port` string.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

#[async_trait]
impl TransportConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, peer: &PeerAddress) -> Result<Self::Stream, ConnectError> {
        info!("[TCP] Connecting to {}", peer);
        let stream = TcpStream::connect(peer.as_str())
            .await
            .map_err(|e| ConnectError::from_io(peer, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ConnectError::from_io(peer, e))?;
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "TCP simulation"
    }
}
