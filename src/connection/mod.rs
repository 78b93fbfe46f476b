//! Connection management for the persistent device link
//!
//! This module handles:
//! - Adapter readiness before every attempt
//! - The connection state machine and its owner task
//! - Liveness probing and automatic reconnection

mod manager;
mod supervisor;

pub use manager::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, SendOutcome, TransportMode,
};
pub use supervisor::{BackoffPolicy, BoundedAttempts, ExponentialBackoff};
