//! device-link shared types
//!
//! This crate provides the I/O-free pieces shared by the connection manager
//! and the peripheral simulator: the hex command codec, the connection state
//! machine, the peer address and the device command table.

pub mod codec;
pub mod state_machine;

use std::fmt;

pub use state_machine::ConnectionState;

/// Link parameters for the system
pub mod link {
    /// Supervisor probe period in milliseconds
    pub const RECONNECT_INTERVAL_MS: u64 = 5000;

    /// Upper bound for a single transport open
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Upper bound for a single write or liveness probe
    pub const WRITE_TIMEOUT_MS: u64 = 2000;

    /// Hardware address of the peripheral the link is built for
    pub const DEFAULT_PEER_ADDRESS: &str = "08:D1:F9:E7:3A:E6";

    /// RFCOMM channel of the peripheral's serial port service
    pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

    /// Where the peripheral simulator listens in TCP mode
    pub const SIMULATION_ADDRESS: &str = "127.0.0.1:9000";
}

/// Immutable identifier of the target device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check for a colon separated 48-bit hardware address (`AA:BB:CC:DD:EE:FF`)
    pub fn is_hardware_address(&self) -> bool {
        let octets: Vec<&str> = self.0.split(':').collect();
        octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for PeerAddress {
    fn default() -> Self {
        Self::new(link::DEFAULT_PEER_ADDRESS)
    }
}

/// Discrete commands understood by the peripheral firmware
pub mod commands {
    /// One of the device's output commands
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum DeviceCommand {
        Output1On,
        Output1Off,
        Output2On,
        Output2Off,
    }

    pub const ALL: [DeviceCommand; 4] = [
        DeviceCommand::Output1On,
        DeviceCommand::Output1Off,
        DeviceCommand::Output2On,
        DeviceCommand::Output2Off,
    ];

    impl DeviceCommand {
        /// Hex string sent for this command
        pub fn hex(&self) -> &'static str {
            match self {
                DeviceCommand::Output1On => "01",
                DeviceCommand::Output1Off => "02",
                DeviceCommand::Output2On => "03",
                DeviceCommand::Output2Off => "04",
            }
        }

        /// Short name accepted on the operator console
        pub fn alias(&self) -> &'static str {
            match self {
                DeviceCommand::Output1On => "1on",
                DeviceCommand::Output1Off => "1off",
                DeviceCommand::Output2On => "2on",
                DeviceCommand::Output2Off => "2off",
            }
        }

        /// Output number (1 or 2) and the level it is switched to
        pub fn target(&self) -> (u8, bool) {
            match self {
                DeviceCommand::Output1On => (1, true),
                DeviceCommand::Output1Off => (1, false),
                DeviceCommand::Output2On => (2, true),
                DeviceCommand::Output2Off => (2, false),
            }
        }

        pub fn from_alias(alias: &str) -> Option<Self> {
            ALL.into_iter()
                .find(|c| c.alias().eq_ignore_ascii_case(alias))
        }

        pub fn from_byte(byte: u8) -> Option<Self> {
            match byte {
                0x01 => Some(DeviceCommand::Output1On),
                0x02 => Some(DeviceCommand::Output1Off),
                0x03 => Some(DeviceCommand::Output2On),
                0x04 => Some(DeviceCommand::Output2Off),
                _ => None,
            }
        }
    }
}
