//! Reconnect supervisor
//!
//! Timer-driven watchdog for an established link. Each cycle probes the
//! transport; a dead link is closed and reopened, and failed reopens are
//! retried after the delay chosen by the `BackoffPolicy`. The next cycle is
//! always scheduled from the end of the previous one.
//!
//! The supervisor only decides; the manager owns the transport and carries
//! out the returned actions.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Supervisor states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Timer running, last probe succeeded or connection fresh
    Armed,
    /// Timer fired, liveness check in flight
    Probing,
    /// Probe failed, close + reopen in flight or pending retry
    Reconnecting,
    /// Stopped
    Disarmed,
}

/// What the manager should do after a supervisor step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Nothing to do until the next deadline
    Wait,
    /// Run a liveness probe and report it with `on_probe`
    Probe,
    /// Close and reopen the transport, report with `on_reopen`
    Reopen,
    /// The policy gave up; the supervisor is now disarmed
    GiveUp,
}

/// Chooses the delay before the next reopen attempt
pub trait BackoffPolicy: Send + Sync {
    /// Delay after `failures` consecutive failed reopens, or None to stop
    fn next_delay(&mut self, failures: u32) -> Option<Duration>;
}

/// Same delay forever (default)
#[derive(Debug, Clone)]
pub struct FixedInterval {
    pub period: Duration,
}

impl BackoffPolicy for FixedInterval {
    fn next_delay(&mut self, _failures: u32) -> Option<Duration> {
        Some(self.period)
    }
}

/// Fixed delay, stops after `max_attempts` failed reopens
#[derive(Debug, Clone)]
pub struct BoundedAttempts {
    pub period: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy for BoundedAttempts {
    fn next_delay(&mut self, failures: u32) -> Option<Duration> {
        (failures < self.max_attempts).then_some(self.period)
    }
}

/// Doubling delay capped at `max`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&mut self, failures: u32) -> Option<Duration> {
        let shift = failures.saturating_sub(1).min(16);
        let delay = self.initial.saturating_mul(1u32 << shift);
        Some(std::cmp::min(delay, self.max))
    }
}

pub struct ReconnectSupervisor {
    state: SupervisorState,
    period: Duration,
    policy: Box<dyn BackoffPolicy>,
    deadline: Option<Instant>,
    failures: u32,
}

impl ReconnectSupervisor {
    pub fn new(period: Duration, policy: Box<dyn BackoffPolicy>) -> Self {
        Self {
            state: SupervisorState::Disarmed,
            period,
            policy,
            deadline: None,
            failures: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// When the timer fires next, if it is running
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consecutive failed reopens in the current outage
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Start (or restart) watching a fresh connection
    pub fn arm(&mut self, now: Instant) {
        self.state = SupervisorState::Armed;
        self.failures = 0;
        self.deadline = Some(deadline_after(now, self.period));
        debug!("[SUPERVISOR] Armed, next probe in {:?}", self.period);
    }

    /// Stop; terminal until the next `arm`
    pub fn disarm(&mut self) {
        if self.state != SupervisorState::Disarmed {
            info!("[SUPERVISOR] Disarmed");
        }
        self.state = SupervisorState::Disarmed;
        self.deadline = None;
        self.failures = 0;
    }

    /// Drop a pending retry while a manual attempt runs; the outage stays supervised
    pub fn suspend(&mut self) {
        if self.state == SupervisorState::Reconnecting {
            debug!("[SUPERVISOR] Retry suspended for a manual attempt");
            self.deadline = None;
        }
    }

    /// The timer fired
    pub fn on_timer(&mut self) -> SupervisorAction {
        self.deadline = None;
        match self.state {
            SupervisorState::Armed => {
                self.state = SupervisorState::Probing;
                SupervisorAction::Probe
            }
            SupervisorState::Reconnecting => SupervisorAction::Reopen,
            SupervisorState::Probing | SupervisorState::Disarmed => SupervisorAction::Wait,
        }
    }

    /// Result of the probe requested by `on_timer`
    pub fn on_probe(&mut self, alive: bool, now: Instant) -> SupervisorAction {
        if self.state != SupervisorState::Probing {
            return SupervisorAction::Wait;
        }

        if alive {
            self.state = SupervisorState::Armed;
            self.deadline = Some(deadline_after(now, self.period));
            SupervisorAction::Wait
        } else {
            warn!("[SUPERVISOR] Liveness probe failed, reconnecting");
            self.state = SupervisorState::Reconnecting;
            SupervisorAction::Reopen
        }
    }

    /// Result of a reopen
    pub fn on_reopen(&mut self, success: bool, now: Instant) -> SupervisorAction {
        if success {
            if self.failures > 0 {
                info!("[SUPERVISOR] Reconnected after {} failed attempts", self.failures);
            }
            self.arm(now);
            return SupervisorAction::Wait;
        }

        self.failures += 1;
        match self.policy.next_delay(self.failures) {
            Some(delay) => {
                self.state = SupervisorState::Reconnecting;
                self.deadline = Some(deadline_after(now, delay));
                debug!(
                    "[SUPERVISOR] Reopen attempt {} failed, retrying in {:?}",
                    self.failures, delay
                );
                SupervisorAction::Wait
            }
            None => {
                warn!("[SUPERVISOR] Giving up after {} failed reopens", self.failures);
                self.state = SupervisorState::Disarmed;
                self.deadline = None;
                SupervisorAction::GiveUp
            }
        }
    }
}

/// Saturating `now + delay`
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

/// About thirty years
const FAR_FUTURE_SECS: u64 = 86400 * 365 * 30;
