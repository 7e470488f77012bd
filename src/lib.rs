//! # Tickwire
//!
//! Peer-to-peer packet transport for real-time applications over UDP.
//!
//! - **Bit packing**: values are written at arbitrary bit widths, with
//!   range quantization, half floats and smallest-three quaternions
//! - **Integrity**: every datagram carries a CRC32 over a protocol version
//!   and its contents
//! - **Authentication**: a two-way token handshake; every later packet must
//!   carry the XOR of both tokens
//! - **Reliability**: ack bitfields piggybacked on every packet, RTT and
//!   loss estimates, retransmission of reliable packets
//!
//! ## Feature Flags
//!
//! - `transport` (default): header, connections and the [`transport::Transport`] tick loop
//! - `tokio`: [`transport::DatagramSocket`] for `tokio::net::UdpSocket`
//!
//! ## Modules
//!
//! - [`core`]: constants, errors, checksum, buffer pool (always included)
//! - [`stream`]: bit writer and reader, quantization (always included)
//! - [`transport`]: the protocol itself (requires `transport` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use tickwire::prelude::*;
//!
//! let position = BoundedRange::new(-512.0, 512.0, 0.01);
//!
//! let mut writer = BitWriter::new();
//! writer.write_bool(true);
//! writer.write_u32(1234, 11);
//! writer.write_bounded_f32(-3.25, &position);
//! writer.write_string("tickwire");
//! assert_eq!(writer.total_bits(), 1 + 11 + position.bits_required() as usize + 32 + 64);
//!
//! let mut reader = BitReader::from_slice(writer.as_bytes());
//! assert!(reader.read_bool());
//! assert_eq!(reader.read_u32(11), 1234);
//! assert!((reader.read_bounded_f32(&position) + 3.25).abs() <= 0.01);
//! assert_eq!(reader.read_string(), "tickwire");
//! assert!(!reader.is_corrupt());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Bit streams (always included)
pub mod stream;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    // Bit streams
    pub use crate::stream::{BitReader, BitWriter, BoundedRange, SmallestThree, Stream};

    // Transport types (when enabled)
    #[cfg(feature = "transport")]
    pub use crate::transport::{
        ClientConnection, ConnectionState, DatagramSocket, DisconnectReason, DropReason, Header,
        NetworkStats, PacketKind, PacketReader, Transport, TransportConfig, TransportError,
        TransportHandler, TransportResult,
    };
}

// Re-export commonly used items at crate root
pub use self::core::{ConfigError, Serialize, StreamError, TickwireError};
pub use stream::{BitReader, BitWriter, Stream};

#[cfg(feature = "transport")]
pub use transport::{Transport, TransportConfig, TransportError, TransportHandler};
