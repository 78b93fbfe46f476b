//! Byte-stream transports to the peripheral

pub mod link;
pub mod rfcomm;
pub mod tcp;
pub mod traits;

pub use link::Transport;
pub use rfcomm::RfcommConnector;
pub use tcp::TcpConnector;
pub use traits::{TransportConnector, TransportStream};
