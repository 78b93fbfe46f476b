//! RFCOMM transport implementation for Bluetooth connections

use crate::error::ConnectError;
use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::Result;
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::Address;
use device_link_shared::{link, PeerAddress};
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[async_trait]
impl TransportStream for RfcommStream {
    async fn shutdown(&mut self) -> Result<()> {
        AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// RFCOMM connector for the peripheral's serial port service
#[derive(Debug, Clone)]
pub struct RfcommConnector {
    channel: u8,
}

impl RfcommConnector {
    pub fn new(channel: u8) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    fn parse_address(peer: &PeerAddress) -> Result<Address, ConnectError> {
        Address::from_str(peer.as_str())
            .map_err(|e| ConnectError::InvalidAddress(peer.clone(), e.to_string()))
    }
}

impl Default for RfcommConnector {
    fn default() -> Self {
        Self::new(link::DEFAULT_RFCOMM_CHANNEL)
    }
}

#[async_trait]
impl TransportConnector for RfcommConnector {
    type Stream = RfcommStream;

    async fn connect(&self, peer: &PeerAddress) -> Result<Self::Stream, ConnectError> {
        let target_addr = Self::parse_address(peer)?;

        let socket_addr = RfcommAddr::new(target_addr, self.channel);
        info!("[BT] Connecting to {} channel {}", target_addr, self.channel);

        let stream = RfcommStream::connect(socket_addr)
            .await
            .map_err(|e| ConnectError::from_io(peer, e))?;

        info!("[BT] Connected to {}", target_addr);
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}
