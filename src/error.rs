//! Error types for the device link

use device_link_shared::{codec::CodecError, PeerAddress};
use std::io;
use thiserror::Error;

/// Failure to open the transport to the peer
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Connection refused by {0}")]
    Refused(PeerAddress),

    #[error("Peer {0} not found")]
    NotFound(PeerAddress),

    #[error("Peer {0} is busy or connected elsewhere")]
    Busy(PeerAddress),

    #[error("Connecting to {0} timed out")]
    Timeout(PeerAddress),

    #[error("Adapter not ready for {0}")]
    AdapterNotReady(PeerAddress),

    #[error("Invalid peer address {0}: {1}")]
    InvalidAddress(PeerAddress, String),

    #[error("Connecting to {peer} failed: {source}")]
    Other {
        peer: PeerAddress,
        #[source]
        source: io::Error,
    },
}

impl ConnectError {
    /// Classify an I/O error from a connect call
    pub fn from_io(peer: &PeerAddress, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectError::Refused(peer.clone()),
            io::ErrorKind::NotFound | io::ErrorKind::AddrNotAvailable => {
                ConnectError::NotFound(peer.clone())
            }
            io::ErrorKind::AddrInUse | io::ErrorKind::AlreadyExists => {
                ConnectError::Busy(peer.clone())
            }
            io::ErrorKind::TimedOut => ConnectError::Timeout(peer.clone()),
            _ => ConnectError::Other {
                peer: peer.clone(),
                source: err,
            },
        }
    }
}

/// Failure to use an open (or missing) transport handle
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No open transport handle")]
    NotConnected,

    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by the connection manager
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Authorization denied by host")]
    AuthorizationDenied,

    #[error("Host declined to enable the radio")]
    RadioDisabledDeclined,

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    MalformedInput(#[from] CodecError),

    #[error("Connection manager closed")]
    ManagerClosed,
}
