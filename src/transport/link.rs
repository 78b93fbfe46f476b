//! Transport handle ownership
//!
//! `Transport` holds at most one open stream to the fixed peer. Opening is
//! split from installing the handle: `open()` returns a self-contained future
//! that the manager runs on a spawned task, and the resulting stream is
//! handed back with `attach()` once the manager has checked it still wants
//! it.

use crate::error::{ConnectError, TransportError};
use crate::transport::traits::{TransportConnector, TransportStream};
use device_link_shared::{codec, PeerAddress};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub struct Transport<C: TransportConnector> {
    connector: Arc<C>,
    peer: PeerAddress,
    connect_timeout: Duration,
    write_timeout: Duration,
    handle: Option<C::Stream>,
}

impl<C: TransportConnector> Transport<C> {
    pub fn new(
        connector: Arc<C>,
        peer: PeerAddress,
        connect_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            peer,
            connect_timeout,
            write_timeout,
            handle: None,
        }
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    /// Whether a handle is currently held
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Build the open attempt for the peer, bounded by the connect timeout
    ///
    /// The future does not touch `self`, so it can run off the owner task.
    pub fn open(&self) -> impl Future<Output = Result<C::Stream, ConnectError>> + Send + 'static {
        let connector = self.connector.clone();
        let peer = self.peer.clone();
        let connect_timeout = self.connect_timeout;

        async move {
            debug!("[LINK] Opening {} via {}", peer, connector.name());
            match timeout(connect_timeout, connector.connect(&peer)).await {
                Ok(result) => result,
                Err(_) => Err(ConnectError::Timeout(peer)),
            }
        }
    }

    /// Install a freshly opened stream as the live handle
    pub async fn attach(&mut self, stream: C::Stream) {
        if self.handle.is_some() {
            warn!("[LINK] Replacing a live handle to {}", self.peer);
            self.close().await;
        }
        self.handle = Some(stream);
        info!("[LINK] Handle to {} attached", self.peer);
    }

    /// Write a payload to the peer; no retry
    ///
    /// A peer that stops draining the stream fails the write with `TimedOut`
    /// after the write timeout.
    pub async fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let write_timeout = self.write_timeout;
        let stream = self.handle.as_mut().ok_or(TransportError::NotConnected)?;

        let result = timeout(write_timeout, async {
            stream.write_all(payload).await?;
            stream.flush().await
        })
        .await;

        match result {
            Ok(written) => written?,
            Err(_) => {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("write stalled for {:?}", write_timeout),
                )))
            }
        }
        debug!("[LINK] Sent {}", codec::to_hex(payload));
        Ok(())
    }

    /// Best-effort liveness check: a zero-length write followed by a flush
    ///
    /// A half-open peer may still look alive here.
    pub async fn probe_liveness(&mut self) -> bool {
        let Some(stream) = self.handle.as_mut() else {
            return false;
        };

        let result = timeout(self.write_timeout, async {
            stream.write(&[]).await?;
            stream.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("[LINK] Probe of {} failed: {}", self.peer, e);
                false
            }
            Err(_) => {
                debug!("[LINK] Probe of {} stalled", self.peer);
                false
            }
        }
    }

    /// Release the handle; no-op when nothing is held
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.handle.take() {
            match timeout(self.write_timeout, TransportStream::shutdown(&mut stream)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("[LINK] Shutdown of {} reported: {}", self.peer, e),
                Err(_) => debug!("[LINK] Shutdown of {} stalled, dropping handle", self.peer),
            }
            info!("[LINK] Handle to {} closed", self.peer);
        }
    }
}
