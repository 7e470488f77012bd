//! Tickwire transport layer.
//!
//! Connection-oriented packets over an unreliable datagram socket:
//!
//! - **Header**: [`Header`] and [`PacketKind`], 131 bits after the CRC32
//! - **Connections**: [`ClientConnection`] with sequence numbers, ack
//!   bitfields, token authentication and RTT / loss estimation
//! - **Tick loop**: [`Transport`] drains the socket, dispatches to a
//!   [`TransportHandler`] and runs the timeout, resend, heartbeat and
//!   statistics sweeps
//! - **Seams**: [`DatagramSocket`] (std, tokio or [`MemoryNetwork`]) and
//!   [`Clock`] ([`SystemClock`] or [`ManualClock`])
//!
//! # Wire format
//!
//! ```text
//! ┌──────────┬───────────────────────────────────────┬─────────┬─────────┐
//! │ CRC32    │ kind | seq | ack | ack bits | token   │ payload │ padding │
//! │ 4 bytes  │ 3    | 16  | 16  | 32       | 64 bits │ ...     │ CONNECT │
//! └──────────┴───────────────────────────────────────┴─────────┴─────────┘
//! ```
//!
//! The CRC covers the protocol version followed by everything after the CRC,
//! so peers on different versions never see each other's packets.

mod config;
mod connection;
mod error;
mod handler;
mod header;
mod memory;
mod socket;
mod stats;
mod timing;
mod token;
#[allow(clippy::module_inception)]
mod transport;

pub use config::{TransportConfig, TransportConfigBuilder};
pub use connection::{is_acknowledged_in, is_sequence_greater, ClientConnection, ConnectionState};
pub use error::{is_transient_io, DropReason, TransportError, TransportResult};
pub use handler::{DisconnectReason, PacketReader, TransportHandler};
pub use header::{Header, PacketKind};
pub use memory::{Datagram, DatagramFilter, MemoryNetwork, MemorySocket};
pub use socket::{bind_udp, DatagramSocket};
pub use stats::NetworkStats;
pub use timing::{ema, Clock, ManualClock, SystemClock};
pub use token::generate_token;
pub use transport::{encoded_size, Transport};
