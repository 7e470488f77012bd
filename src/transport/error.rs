//! Transport layer error types.
//!
//! [`TransportError`] is returned to the application. [`DropReason`] never
//! leaves the receive path: a dropped datagram gets no reply, so a spoofed
//! or corrupted packet cannot be used to probe for live peers or to
//! reflect traffic at a third party.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::core::{ConfigError, StreamError};

/// Errors returned by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The encoded packet exceeds the maximum packet size. Nothing was sent.
    #[error("packet of {size} bytes exceeds maximum of {max}")]
    PacketTooLarge {
        /// Encoded size including checksum and header.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// No connection exists for the address.
    #[error("not connected to {0}")]
    NotConnected(SocketAddr),

    /// The connection exists but the handshake has not completed.
    #[error("connection to {0} is not authenticated")]
    NotAuthenticated(SocketAddr),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error from the socket.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the error means the transport itself can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Io(e) if !is_transient_io(e))
    }
}

/// Socket errors that only concern a single datagram or peer.
///
/// ICMP port-unreachable surfaces as `ConnectionReset` / `ConnectionRefused`
/// on the next receive on some platforms.
pub fn is_transient_io(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Why an inbound datagram was discarded.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Shorter than checksum plus header.
    #[error("packet too short")]
    TooShort,

    /// CRC32 mismatch (corruption or a different protocol version).
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Header could not be decoded.
    #[error("malformed header")]
    MalformedHeader,

    /// CONNECT not padded to the maximum packet size.
    #[error("undersized connect")]
    UndersizedConnect,

    /// Non-handshake packet from an address without a connection.
    #[error("unknown peer")]
    UnknownPeer,

    /// Non-handshake packet on a connection that is still pending.
    #[error("connection not authenticated")]
    NotAuthenticated,

    /// Token differs from the session token.
    #[error("token mismatch")]
    TokenMismatch,
}

impl From<StreamError> for DropReason {
    fn from(_: StreamError) -> Self {
        DropReason::MalformedHeader
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
