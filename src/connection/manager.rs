//! Connection manager with adapter checks, liveness probing and automatic reconnection
//!
//! `ConnectionManager` is a cheap handle. All state lives in a single owner
//! task that serializes public requests, completions of spawned work (host
//! grant requests, radio enable, transport open) and supervisor timer ticks.
//! Every attempt is tagged with an epoch; completions from an older epoch are
//! dropped, so nothing takes effect after `close()`.

use crate::adapter::AdapterGate;
use crate::connection::supervisor::{
    BackoffPolicy, FixedInterval, ReconnectSupervisor, SupervisorAction, SupervisorState,
};
use crate::error::{ConnectError, LinkError};
use crate::transport::{Transport, TransportConnector, TransportStream};
use bytes::Bytes;
use device_link_shared::{
    codec, link,
    state_machine::{ConnectionState, LinkEvent, LinkStateMachine, TransitionResult},
    PeerAddress,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Connection state changed
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Transport open succeeded
    Connected { peer: PeerAddress },
    /// Transport open failed
    ConnectionFailed { reason: String },
    /// Host refused a capability; the attempt is over
    AuthorizationDenied,
    /// Host declined to enable the radio; the attempt is over
    RadioDeclined,
    /// Liveness probe failed
    LinkLost,
    /// Supervisor is reopening the transport
    Reconnecting { attempt: u32 },
    /// Backoff policy gave up
    ReconnectAbandoned { attempts: u32 },
    /// A send reached the transport but the write failed
    WriteFailed { reason: String },
}

/// What happened to a command passed to `send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Bytes handed to the transport
    Written,
    /// Not connected; the command was dropped without a write
    Dropped { state: ConnectionState },
    /// The write failed; left to the next liveness probe
    WriteFailed,
}

/// Which transport the link runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Bluetooth RFCOMM (requires BlueZ)
    Rfcomm { channel: u8 },
    /// TCP to the peripheral simulator (for development)
    TcpSimulation,
}

impl Default for TransportMode {
    fn default() -> Self {
        Self::Rfcomm {
            channel: link::DEFAULT_RFCOMM_CHANNEL,
        }
    }
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// The one device this link talks to
    pub peer: PeerAddress,
    /// Transport to open
    pub transport: TransportMode,
    /// Supervisor probe period
    pub reconnect_interval: Duration,
    /// Upper bound for a single open
    pub connect_timeout: Duration,
    /// Upper bound for a single write or liveness probe
    pub write_timeout: Duration,
    /// Buffered events before new ones are dropped
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            peer: PeerAddress::default(),
            transport: TransportMode::default(),
            reconnect_interval: Duration::from_millis(link::RECONNECT_INTERVAL_MS),
            connect_timeout: Duration::from_millis(link::CONNECT_TIMEOUT_MS),
            write_timeout: Duration::from_millis(link::WRITE_TIMEOUT_MS),
            event_capacity: 100,
        }
    }
}

impl ConnectionConfig {
    /// Config for the TCP peripheral simulator at `address`
    pub fn simulation(address: impl Into<String>) -> Self {
        Self {
            peer: PeerAddress::new(address),
            transport: TransportMode::TcpSimulation,
            ..Default::default()
        }
    }
}

enum Request {
    Connect,
    Send {
        payload: Bytes,
        reply: oneshot::Sender<SendOutcome>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Results of work spawned off the owner task
enum Completion<S> {
    Authorization { epoch: u64, granted: bool },
    RadioEnable { epoch: u64, enabled: bool },
    Opened { epoch: u64, result: Result<S, ConnectError> },
}

/// Manages the persistent link to the peripheral
pub struct ConnectionManager {
    config: ConnectionConfig,
    /// Channel to the owner task
    request_tx: mpsc::Sender<Request>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Create a manager retrying reopens forever at the configured interval
    pub fn new<C: TransportConnector>(
        config: ConnectionConfig,
        gate: AdapterGate,
        connector: Arc<C>,
    ) -> Self {
        let policy = Box::new(FixedInterval {
            period: config.reconnect_interval,
        });
        Self::with_policy(config, gate, connector, policy)
    }

    /// Create a manager with a custom reopen backoff policy
    pub fn with_policy<C: TransportConnector>(
        config: ConnectionConfig,
        gate: AdapterGate,
        connector: Arc<C>,
        policy: Box<dyn BackoffPolicy>,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<Request>(32);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let driver = LinkDriver {
            gate,
            transport: Transport::new(
                connector,
                config.peer.clone(),
                config.connect_timeout,
                config.write_timeout,
            ),
            supervisor: ReconnectSupervisor::new(config.reconnect_interval, policy),
            fsm: LinkStateMachine::new(),
            epoch: 0,
            state_tx,
            event_tx,
            completion_tx,
        };
        tokio::spawn(driver.run(request_rx, completion_rx));

        Self {
            config,
            request_tx,
            event_rx,
            state_rx,
        }
    }

    /// Start a connection attempt; outcomes arrive as events
    ///
    /// Ignored while an attempt is in flight or the link is up.
    pub async fn connect(&self) -> Result<(), LinkError> {
        self.request(Request::Connect).await
    }

    /// Encode a hex command and write it if connected
    pub async fn send(&self, hex_command: &str) -> Result<SendOutcome, LinkError> {
        let payload = codec::encode(hex_command)?;
        let (reply, outcome) = oneshot::channel();
        self.request(Request::Send { payload, reply }).await?;
        outcome.await.map_err(|_| LinkError::ManagerClosed)
    }

    /// Stop supervising and release the transport; idempotent
    pub async fn close(&self) -> Result<(), LinkError> {
        let (reply, done) = oneshot::channel();
        self.request(Request::Close { reply }).await?;
        done.await.map_err(|_| LinkError::ManagerClosed)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Wait until the link reaches `target`
    #[cfg(test)]
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), LinkError> {
        let mut state_rx = self.state_rx.clone();
        state_rx
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| LinkError::ManagerClosed)
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Next buffered event, if any
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.config.peer
    }

    async fn request(&self, request: Request) -> Result<(), LinkError> {
        self.request_tx
            .send(request)
            .await
            .map_err(|_| LinkError::ManagerClosed)
    }
}

/// Owner task state
struct LinkDriver<C: TransportConnector> {
    gate: AdapterGate,
    transport: Transport<C>,
    supervisor: ReconnectSupervisor,
    fsm: LinkStateMachine,
    epoch: u64,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    completion_tx: mpsc::UnboundedSender<Completion<C::Stream>>,
}

impl<C: TransportConnector> LinkDriver<C> {
    /// Main loop; ends (and closes the link) when every handle is dropped
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut completions: mpsc::UnboundedReceiver<Completion<C::Stream>>,
    ) {
        loop {
            let deadline = self.supervisor.deadline();

            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },

                Some(completion) = completions.recv() => {
                    self.handle_completion(completion).await;
                }

                _ = wait_until(deadline) => {
                    self.on_timer().await;
                }
            }
        }

        self.close().await;
        info!("[LINK] Connection manager stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect => self.connect().await,
            Request::Send { payload, reply } => {
                let outcome = self.send(&payload).await;
                let _ = reply.send(outcome);
            }
            Request::Close { reply } => {
                self.close().await;
                let _ = reply.send(());
            }
        }
    }

    async fn connect(&mut self) {
        let state = self.fsm.state();
        if state == ConnectionState::Connected || state.is_attempt_in_flight() {
            debug!("[LINK] connect() ignored while {}", state);
            return;
        }

        info!("[LINK] Connecting to {}", self.transport.peer());
        if self.supervisor.state() == SupervisorState::Reconnecting {
            // Outage stays supervised; a failure here schedules the next retry
            self.supervisor.suspend();
        } else {
            self.supervisor.disarm();
        }
        self.epoch += 1;

        if !self.gate.has_authorization().await {
            self.transition(LinkEvent::AuthorizationRequested);
            let gate = self.gate.clone();
            let completion_tx = self.completion_tx.clone();
            let epoch = self.epoch;
            tokio::spawn(async move {
                let granted = gate.request_authorization().await;
                let _ = completion_tx.send(Completion::Authorization { epoch, granted });
            });
            return;
        }

        self.ensure_radio().await;
    }

    async fn ensure_radio(&mut self) {
        if !self.gate.is_radio_enabled().await {
            self.transition(LinkEvent::RadioEnableRequested);
            let gate = self.gate.clone();
            let completion_tx = self.completion_tx.clone();
            let epoch = self.epoch;
            tokio::spawn(async move {
                let enabled = gate.request_radio_enable().await;
                let _ = completion_tx.send(Completion::RadioEnable { epoch, enabled });
            });
            return;
        }

        self.begin_open().await;
    }

    async fn begin_open(&mut self) {
        // Grants can change between the first check and the open
        if !self.gate.has_authorization().await {
            warn!("[LINK] Authorization lost before open");
            self.supervisor.disarm();
            self.transition(LinkEvent::AuthorizationDenied);
            self.emit(ConnectionEvent::AuthorizationDenied);
            return;
        }

        self.transition(LinkEvent::OpenStarted);
        self.spawn_open();
    }

    fn spawn_open(&self) {
        let open = self.transport.open();
        let completion_tx = self.completion_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = open.await;
            let _ = completion_tx.send(Completion::Opened { epoch, result });
        });
    }

    async fn handle_completion(&mut self, completion: Completion<C::Stream>) {
        match completion {
            Completion::Authorization { epoch, granted } => {
                if !self.is_current(epoch, ConnectionState::AwaitingAuthorization) {
                    debug!("[LINK] Stale authorization result dropped");
                    return;
                }
                if granted {
                    self.ensure_radio().await;
                } else {
                    warn!("[LINK] Authorization denied");
                    self.supervisor.disarm();
                    self.transition(LinkEvent::AuthorizationDenied);
                    self.emit(ConnectionEvent::AuthorizationDenied);
                }
            }

            Completion::RadioEnable { epoch, enabled } => {
                if !self.is_current(epoch, ConnectionState::AwaitingRadioEnable) {
                    debug!("[LINK] Stale radio enable result dropped");
                    return;
                }
                if enabled {
                    self.begin_open().await;
                } else {
                    warn!("[LINK] Radio enable declined");
                    self.supervisor.disarm();
                    self.transition(LinkEvent::RadioDeclined);
                    self.emit(ConnectionEvent::RadioDeclined);
                }
            }

            Completion::Opened { epoch, result } => {
                if !self.is_current(epoch, ConnectionState::Connecting) {
                    if let Ok(mut stream) = result {
                        debug!("[LINK] Late stream discarded");
                        let _ = TransportStream::shutdown(&mut stream).await;
                    }
                    return;
                }
                match result {
                    Ok(stream) => self.on_opened(stream).await,
                    Err(e) => self.on_open_failed(e).await,
                }
            }
        }
    }

    fn is_current(&self, epoch: u64, expected: ConnectionState) -> bool {
        epoch == self.epoch && self.fsm.state() == expected
    }

    async fn on_opened(&mut self, stream: C::Stream) {
        // Handle first, so Connected is never visible without one
        self.transport.attach(stream).await;
        self.transition(LinkEvent::Opened);

        let now = Instant::now();
        match self.supervisor.state() {
            SupervisorState::Reconnecting => {
                self.supervisor.on_reopen(true, now);
            }
            _ => self.supervisor.arm(now),
        }

        let peer = self.transport.peer().clone();
        info!("[LINK] Connected to {}", peer);
        self.emit(ConnectionEvent::Connected { peer });
    }

    async fn on_open_failed(&mut self, err: ConnectError) {
        self.transport.close().await;
        self.transition(LinkEvent::OpenFailed);
        let err = LinkError::from(err);
        error!("[LINK] {}", err);
        self.emit(ConnectionEvent::ConnectionFailed {
            reason: err.to_string(),
        });

        if self.supervisor.state() == SupervisorState::Reconnecting {
            if let SupervisorAction::GiveUp = self.supervisor.on_reopen(false, Instant::now()) {
                self.emit(ConnectionEvent::ReconnectAbandoned {
                    attempts: self.supervisor.failures(),
                });
            }
        }
    }

    async fn on_timer(&mut self) {
        match self.supervisor.on_timer() {
            SupervisorAction::Probe => {
                let alive = self.transport.probe_liveness().await;
                debug!("[LINK] Liveness probe: alive={}", alive);
                if let SupervisorAction::Reopen = self.supervisor.on_probe(alive, Instant::now()) {
                    self.emit(ConnectionEvent::LinkLost);
                    self.reopen().await;
                }
            }
            SupervisorAction::Reopen => self.reopen().await,
            SupervisorAction::Wait | SupervisorAction::GiveUp => {}
        }
    }

    /// Close the dead handle and open a new one
    async fn reopen(&mut self) {
        self.epoch += 1;
        let attempt = self.supervisor.failures() + 1;
        info!(
            "[LINK] Reconnecting to {} (attempt {})",
            self.transport.peer(),
            attempt
        );
        self.emit(ConnectionEvent::Reconnecting { attempt });

        self.transport.close().await;
        self.transition(LinkEvent::LinkLost);

        // Re-check the adapter; the supervisor never prompts the host
        if !self.gate.has_authorization().await || !self.gate.is_radio_enabled().await {
            let peer = self.transport.peer().clone();
            self.on_open_failed(ConnectError::AdapterNotReady(peer)).await;
            return;
        }

        self.spawn_open();
    }

    async fn send(&mut self, payload: &[u8]) -> SendOutcome {
        let state = self.fsm.state();
        if state != ConnectionState::Connected {
            debug!("[LINK] Dropping {} while {}", codec::to_hex(payload), state);
            return SendOutcome::Dropped { state };
        }

        match self.transport.write(payload).await {
            Ok(()) => {
                info!("[LINK] Sent {}", codec::to_hex(payload));
                SendOutcome::Written
            }
            Err(e) => {
                let e = LinkError::from(e);
                warn!("[LINK] Write of {} failed: {}", codec::to_hex(payload), e);
                self.emit(ConnectionEvent::WriteFailed {
                    reason: e.to_string(),
                });
                SendOutcome::WriteFailed
            }
        }
    }

    async fn close(&mut self) {
        if self.fsm.state() == ConnectionState::Idle {
            debug!("[LINK] close() while idle");
            return;
        }

        self.epoch += 1;
        self.transition(LinkEvent::CloseRequested);
        self.supervisor.disarm();
        self.transport.close().await;
        self.transition(LinkEvent::Closed);
        info!("[LINK] Link to {} closed", self.transport.peer());
    }

    fn transition(&mut self, event: LinkEvent) {
        let from = self.fsm.state();
        match self.fsm.process_event(event) {
            TransitionResult::Success(to) => {
                debug_assert!(to != ConnectionState::Connected || self.transport.is_open());
                if from != to {
                    info!("[LINK] {} -> {}", from, to);
                    self.state_tx.send_replace(to);
                    self.emit(ConnectionEvent::StateChanged { from, to });
                }
            }
            TransitionResult::Invalid { from, event } => {
                warn!("[LINK] Ignoring {:?} while {}", event, from);
            }
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            debug!("[LINK] Event dropped: {}", e);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
