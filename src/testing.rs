//! Fake collaborators for unit tests

use crate::adapter::{Capability, CapabilityHost, RadioHost};
use crate::error::ConnectError;
use crate::transport::{TransportConnector, TransportStream};
use async_trait::async_trait;
use device_link_shared::PeerAddress;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::Notify;

/// Shared view into a fake stream, kept by the test after the stream moves
#[derive(Default)]
pub struct StreamProbe {
    written: Mutex<Vec<u8>>,
    zero_writes: AtomicUsize,
    fail_writes: AtomicBool,
    stalled: AtomicBool,
    shutdowns: AtomicUsize,
}

impl StreamProbe {
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    /// Number of zero-length writes (liveness probes) seen
    pub fn probes(&self) -> usize {
        self.zero_writes.load(Ordering::SeqCst)
    }

    /// Make every following write fail as if the peer reset
    pub fn break_link(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make every following write and flush hang as if the peer stopped reading
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

pub struct FakeStream {
    probe: Arc<StreamProbe>,
}

impl FakeStream {
    pub fn new() -> (Self, Arc<StreamProbe>) {
        let probe = Arc::new(StreamProbe::default());
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }

    fn reset_error() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionReset, "peer reset")
    }
}

impl AsyncWrite for FakeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.probe.stalled.load(Ordering::SeqCst) {
            return Poll::Pending;
        }
        if self.probe.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(Self::reset_error()));
        }
        if buf.is_empty() {
            self.probe.zero_writes.fetch_add(1, Ordering::SeqCst);
        }
        self.probe.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.probe.stalled.load(Ordering::SeqCst) {
            return Poll::Pending;
        }
        if self.probe.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(Self::reset_error()));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl TransportStream for FakeStream {
    async fn shutdown(&mut self) -> anyhow::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// Connector whose open outcomes are scripted by the test
#[derive(Default)]
pub struct FakeConnector {
    opens: AtomicUsize,
    script: Mutex<VecDeque<bool>>,
    fail_by_default: AtomicBool,
    hold_opens: AtomicBool,
    release: Notify,
    break_new_streams: AtomicBool,
    streams: Mutex<Vec<Arc<StreamProbe>>>,
}

impl FakeConnector {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let connector = Self::default();
        connector.fail_by_default.store(true, Ordering::SeqCst);
        Arc::new(connector)
    }

    /// Queue outcomes for the next opens (true = success)
    pub fn script(&self, outcomes: &[bool]) {
        self.script.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_by_default.store(failing, Ordering::SeqCst);
    }

    /// Keep opens pending until `release_open` is called
    pub fn hold_opens(&self) {
        self.hold_opens.store(true, Ordering::SeqCst);
    }

    pub fn release_open(&self) {
        self.hold_opens.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    /// Hand out streams whose peer is already gone
    pub fn set_break_new_streams(&self, broken: bool) {
        self.break_new_streams.store(broken, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Probe of the most recently opened stream
    pub fn last_stream(&self) -> Arc<StreamProbe> {
        self.streams
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no stream opened yet")
    }

    pub fn streams(&self) -> Vec<Arc<StreamProbe>> {
        self.streams.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportConnector for FakeConnector {
    type Stream = FakeStream;

    async fn connect(&self, peer: &PeerAddress) -> Result<Self::Stream, ConnectError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.hold_opens.load(Ordering::SeqCst) {
            self.release.notified().await;
        }

        let succeed = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(!self.fail_by_default.load(Ordering::SeqCst));
        if !succeed {
            return Err(ConnectError::Refused(peer.clone()));
        }

        let (stream, probe) = FakeStream::new();
        if self.break_new_streams.load(Ordering::SeqCst) {
            probe.break_link();
        }
        self.streams.lock().unwrap().push(probe);
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Host whose grant and radio answers are controlled by the test
#[derive(Default)]
pub struct FakeHost {
    pub authorized: AtomicBool,
    pub grant_on_request: AtomicBool,
    pub radio_enabled: AtomicBool,
    pub enable_on_request: AtomicBool,
    pub grant_requests: AtomicUsize,
    pub enable_requests: AtomicUsize,
    hold_requests: AtomicBool,
    release: Notify,
}

impl FakeHost {
    pub fn ready() -> Arc<Self> {
        let host = Self::default();
        host.authorized.store(true, Ordering::SeqCst);
        host.radio_enabled.store(true, Ordering::SeqCst);
        Arc::new(host)
    }

    /// Not yet authorized; the grant flow answers `grant`
    pub fn unauthorized(grant: bool) -> Arc<Self> {
        let host = Self::default();
        host.grant_on_request.store(grant, Ordering::SeqCst);
        host.radio_enabled.store(true, Ordering::SeqCst);
        Arc::new(host)
    }

    /// Authorized with the radio off; the enable flow answers `enable`
    pub fn radio_off(enable: bool) -> Arc<Self> {
        let host = Self::default();
        host.authorized.store(true, Ordering::SeqCst);
        host.enable_on_request.store(enable, Ordering::SeqCst);
        Arc::new(host)
    }

    /// Keep host requests pending until `release_request` is called
    pub fn hold_requests(&self) {
        self.hold_requests.store(true, Ordering::SeqCst);
    }

    pub fn release_request(&self) {
        self.hold_requests.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub fn grant_requests(&self) -> usize {
        self.grant_requests.load(Ordering::SeqCst)
    }

    pub fn enable_requests(&self) -> usize {
        self.enable_requests.load(Ordering::SeqCst)
    }

    async fn wait_if_held(&self) {
        if self.hold_requests.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl CapabilityHost for FakeHost {
    async fn check_grant(&self, _capability: Capability) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn request_grant(&self, capabilities: &[Capability]) -> HashMap<Capability, bool> {
        self.grant_requests.fetch_add(1, Ordering::SeqCst);
        self.wait_if_held().await;
        let granted = self.grant_on_request.load(Ordering::SeqCst);
        if granted {
            self.authorized.store(true, Ordering::SeqCst);
        }
        capabilities.iter().map(|&c| (c, granted)).collect()
    }
}

#[async_trait]
impl RadioHost for FakeHost {
    async fn is_enabled(&self) -> bool {
        self.radio_enabled.load(Ordering::SeqCst)
    }

    async fn request_enable(&self) -> bool {
        self.enable_requests.fetch_add(1, Ordering::SeqCst);
        self.wait_if_held().await;
        let enabled = self.enable_on_request.load(Ordering::SeqCst);
        if enabled {
            self.radio_enabled.store(true, Ordering::SeqCst);
        }
        enabled
    }
}
