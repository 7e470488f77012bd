//! Application callbacks.

use std::fmt;
use std::net::SocketAddr;

use crate::core::PooledBuffer;
use crate::stream::BitReader;

/// Reader handed to callbacks, positioned at the first payload bit.
///
/// It owns the pooled receive buffer; the buffer returns to the pool when
/// the reader is dropped at the end of the callback.
pub type PacketReader = BitReader<PooledBuffer>;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The peer sent a DISCONNECT.
    Remote,
    /// Nothing was received from the peer within the timeout.
    Timeout,
    /// The peer exceeded the configured token mismatch limit.
    TokenMismatch,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote disconnect",
            Self::Timeout => "timed out",
            Self::TokenMismatch => "token mismatch",
        })
    }
}

/// Events raised by [`Transport::update`](super::Transport::update).
pub trait TransportHandler {
    /// A connection finished its handshake. `reader` holds the peer's
    /// CONNECT payload followed by zero padding.
    fn on_connect(&mut self, addr: SocketAddr, reader: &mut PacketReader);

    /// An authenticated connection was removed.
    fn on_disconnect(&mut self, addr: SocketAddr, reason: DisconnectReason);

    /// A payload arrived. Each sequence number is delivered at most once.
    fn on_receive(&mut self, addr: SocketAddr, sequence: u16, reader: &mut PacketReader);

    /// Traffic over the last statistics interval, in bits per second.
    fn on_network_stats(&mut self, out_bps: f64, in_bps: f64) {
        let _ = (out_bps, in_bps);
    }
}
