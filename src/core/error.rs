//! Error types for Tickwire.

use thiserror::Error;

/// Errors raised while decoding a value from a bit stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// A read ran past the end of the buffer or used an invalid length.
    /// Every later read on the same stream yields defaults.
    #[error("stream corrupt: read past end of buffer")]
    Corrupt,

    /// The header carried a packet kind outside the known variants.
    #[error("invalid packet kind: {0}")]
    InvalidPacketKind(u8),

    /// A length-prefixed string was not valid UTF-8.
    #[error("string is not valid utf-8")]
    InvalidUtf8,
}

/// Errors in transport configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Maximum packet size outside the supported range.
    #[error("max packet size {size} outside [{min}, {max}]")]
    PacketSize {
        /// Requested size.
        size: usize,
        /// Smallest allowed size.
        min: usize,
        /// Largest allowed size.
        max: usize,
    },

    /// A time interval was zero, negative or not finite.
    #[error("interval `{name}` must be positive and finite, got {value}")]
    Interval {
        /// Name of the offending setting.
        name: &'static str,
        /// Supplied value.
        value: f64,
    },
}

/// Top-level Tickwire errors.
#[derive(Debug, Error)]
pub enum TickwireError {
    /// Stream decoding error.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport error.
    #[cfg(feature = "transport")]
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
