//! Adapter readiness for the radio link
//!
//! This module handles:
//! - Checking and requesting the host capability grants
//! - Checking and requesting the radio enabled state
//! - The BlueZ implementation of both host collaborators

mod bluez;
mod gate;

pub use bluez::BluezHost;
pub use gate::{
    AdapterGate, Capability, CapabilityHost, RadioHost, StaticHost, REQUIRED_CAPABILITIES,
};
