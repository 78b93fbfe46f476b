//! Connection State Machine
//!
//! Defines valid connection state transitions for the device link.

use std::fmt;

/// State of the link to the peripheral device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Nothing in flight, no handle held
    #[default]
    Idle,
    /// Waiting for the host to answer a capability request
    AwaitingAuthorization,
    /// Waiting for the host to answer a radio enable request
    AwaitingRadioEnable,
    /// Transport open in flight
    Connecting,
    /// Transport handle held and usable
    Connected,
    /// Last open failed; nothing held
    Disconnected,
    /// Shutdown in progress
    Closing,
}

impl ConnectionState {
    /// True while a connection attempt is waiting on something
    pub fn is_attempt_in_flight(&self) -> bool {
        matches!(
            self,
            ConnectionState::AwaitingAuthorization
                | ConnectionState::AwaitingRadioEnable
                | ConnectionState::Connecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::AwaitingAuthorization => "awaiting-authorization",
            ConnectionState::AwaitingRadioEnable => "awaiting-radio-enable",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Capability grants missing, host request sent
    AuthorizationRequested,
    /// Radio off, host enable request sent
    RadioEnableRequested,
    /// Transport open started
    OpenStarted,
    /// Transport open succeeded
    Opened,
    /// Transport open failed
    OpenFailed,
    /// Host refused a capability
    AuthorizationDenied,
    /// Host declined to enable the radio
    RadioDeclined,
    /// Liveness probe failed, reopening
    LinkLost,
    /// close() called
    CloseRequested,
    /// Handle released, shutdown finished
    Closed,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(ConnectionState),
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        event: LinkEvent,
    },
}

/// The connection state machine owned by the manager
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    current_state: ConnectionState,
}

impl LinkStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::Idle,
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        match self.get_next_state(event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkEvent::*;

        match (self.current_state, event) {
            // Shutdown is reachable from anywhere and always ends in Idle
            (_, CloseRequested) => Some(Closing),
            (Closing, Closed) => Some(Idle),
            (Closing, _) => None,

            // Starting an attempt
            (Idle | Disconnected, AuthorizationRequested) => Some(AwaitingAuthorization),
            (Idle | Disconnected | AwaitingAuthorization, RadioEnableRequested) => {
                Some(AwaitingRadioEnable)
            }
            (
                Idle | Disconnected | AwaitingAuthorization | AwaitingRadioEnable,
                OpenStarted,
            ) => Some(Connecting),

            // Host refusals end the attempt
            (
                Idle | Disconnected | AwaitingAuthorization | AwaitingRadioEnable,
                AuthorizationDenied,
            ) => Some(Idle),
            (AwaitingRadioEnable, RadioDeclined) => Some(Idle),

            // Open outcome
            (Connecting, Opened) => Some(Connected),
            (Connecting, OpenFailed) => Some(Disconnected),

            // Supervisor-driven reopen
            (Connected | Disconnected, LinkLost) => Some(Connecting),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = LinkStateMachine::new();
        assert_eq!(fsm.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_full_authorization_flow() {
        let mut fsm = LinkStateMachine::new();

        let result = fsm.process_event(LinkEvent::AuthorizationRequested);
        assert_eq!(result, TransitionResult::Success(ConnectionState::AwaitingAuthorization));

        let result = fsm.process_event(LinkEvent::RadioEnableRequested);
        assert_eq!(result, TransitionResult::Success(ConnectionState::AwaitingRadioEnable));

        let result = fsm.process_event(LinkEvent::OpenStarted);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connecting));

        let result = fsm.process_event(LinkEvent::Opened);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connected));
    }

    #[test]
    fn test_ready_adapter_goes_straight_to_connecting() {
        let mut fsm = LinkStateMachine::new();
        assert!(matches!(
            fsm.process_event(LinkEvent::OpenStarted),
            TransitionResult::Success(ConnectionState::Connecting)
        ));
    }

    #[test]
    fn test_open_failure_and_retry() {
        let mut fsm = LinkStateMachine::new();
        fsm.process_event(LinkEvent::OpenStarted);

        let result = fsm.process_event(LinkEvent::OpenFailed);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Disconnected));

        // A fresh connect() from Disconnected is allowed
        let result = fsm.process_event(LinkEvent::OpenStarted);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connecting));
    }

    #[test]
    fn test_refusals_return_to_idle() {
        let mut fsm = LinkStateMachine::new();
        fsm.process_event(LinkEvent::AuthorizationRequested);
        fsm.process_event(LinkEvent::AuthorizationDenied);
        assert_eq!(fsm.state(), ConnectionState::Idle);

        fsm.process_event(LinkEvent::RadioEnableRequested);
        fsm.process_event(LinkEvent::RadioDeclined);
        assert_eq!(fsm.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_link_lost_reopens() {
        let mut fsm = LinkStateMachine::new();
        fsm.process_event(LinkEvent::OpenStarted);
        fsm.process_event(LinkEvent::Opened);

        let result = fsm.process_event(LinkEvent::LinkLost);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connecting));
    }

    #[test]
    fn test_close_from_any_state() {
        for setup in [
            vec![],
            vec![LinkEvent::AuthorizationRequested],
            vec![LinkEvent::RadioEnableRequested],
            vec![LinkEvent::OpenStarted],
            vec![LinkEvent::OpenStarted, LinkEvent::Opened],
            vec![LinkEvent::OpenStarted, LinkEvent::OpenFailed],
        ] {
            let mut fsm = LinkStateMachine::new();
            for event in setup {
                fsm.process_event(event);
            }
            fsm.process_event(LinkEvent::CloseRequested);
            assert_eq!(fsm.state(), ConnectionState::Closing);
            fsm.process_event(LinkEvent::Closed);
            assert_eq!(fsm.state(), ConnectionState::Idle);
        }
    }

    #[test]
    fn test_closing_rejects_late_events() {
        let mut fsm = LinkStateMachine::new();
        fsm.process_event(LinkEvent::OpenStarted);
        fsm.process_event(LinkEvent::CloseRequested);

        let result = fsm.process_event(LinkEvent::Opened);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectionState::Closing);
    }

    #[test]
    fn test_invalid_transition() {
        let mut fsm = LinkStateMachine::new();

        // Can't be opened without an open in flight
        let result = fsm.process_event(LinkEvent::Opened);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_attempt_in_flight() {
        assert!(ConnectionState::Connecting.is_attempt_in_flight());
        assert!(ConnectionState::AwaitingAuthorization.is_attempt_in_flight());
        assert!(!ConnectionState::Connected.is_attempt_in_flight());
        assert!(!ConnectionState::Disconnected.is_attempt_in_flight());
    }
}
