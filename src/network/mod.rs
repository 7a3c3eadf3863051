//! Network subsystem for RTP/UDP audio transport
//!
//! The send and receive loops talk to the transport only through
//! [`TransportSender`] and [`TransportReceiver`]. [`SendSession`] and
//! [`ReceiveSession`] are the UDP implementations.

pub mod jitter;
pub mod receiver;
pub mod rtp;
pub mod sender;
pub mod session;
pub mod udp;

pub use receiver::AudioReceiver;
pub use sender::AudioSender;
pub use session::{ReceiveSession, SendSession, SessionStats};
pub use udp::{create_receive_socket, create_send_socket, resolve};

use crate::error::NetworkError;

/// Outbound half of a transport session
pub trait TransportSender {
    /// Send one encoded frame stamped with `timestamp`.
    ///
    /// Errors are reported, never retried.
    fn send(&mut self, payload: &[u8], timestamp: u32) -> Result<(), NetworkError>;
}

/// Inbound half of a transport session
pub trait TransportReceiver {
    /// Fetch the packet due at `expected` (media sample units) into `buf`.
    ///
    /// `Received::len == 0` means nothing has arrived for this slot yet,
    /// which is a normal outcome and never blocks.
    fn receive(&mut self, expected: u32, buf: &mut [u8]) -> Result<Received, NetworkError>;

    /// Local position the session realigned to after a discontinuity
    fn resync(&mut self) -> u32;
}

/// Outcome of a single receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Received {
    /// Payload bytes written; 0 = nothing yet
    pub len: usize,
    /// The payload did not fit the buffer and was truncated
    pub more: bool,
}

impl Received {
    pub fn nothing() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Timestamp jump detected by a receive session (wire units)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discontinuity {
    pub expected: u32,
    pub received: u32,
}

/// Callback registered with a receive session, invoked on the receiving thread
pub type DiscontinuityHandler = Box<dyn Fn(Discontinuity) + Send + Sync>;
