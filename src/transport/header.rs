//! Packet header.
//!
//! Wire format (after the 4-byte CRC32), 131 bits, MSB first:
//! ```text
//! +--------+----------+---------+-----------+------------+
//! | Kind   | Sequence | Ack     | Ack bits  | Token      |
//! | 3 bits | 16 bits  | 16 bits | 32 bits   | 64 bits    |
//! +--------+----------+---------+-----------+------------+
//! ```
//! The payload, if any, starts at the first bit after the token.

use crate::core::{Serialize, StreamError, PACKET_KIND_BITS};
use crate::stream::Stream;

/// Packet kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PacketKind {
    /// Handshake; always padded to the maximum packet size.
    Connect = 0,
    /// Fire-and-forget payload.
    Unreliable = 1,
    /// Payload retransmitted until acknowledged.
    Reliable = 2,
    /// Empty keepalive carrying acks.
    #[default]
    Heartbeat = 3,
    /// Graceful close.
    Disconnect = 4,
}

impl PacketKind {
    /// Parse a packet kind from its wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Connect),
            1 => Some(Self::Unreliable),
            2 => Some(Self::Reliable),
            3 => Some(Self::Heartbeat),
            4 => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// Wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether packets of this kind carry an application payload.
    pub fn has_payload(self) -> bool {
        matches!(self, Self::Unreliable | Self::Reliable)
    }

    /// Whether packets of this kind are tracked for retransmission.
    pub fn is_reliable(self) -> bool {
        matches!(self, Self::Connect | Self::Reliable)
    }
}

/// Fixed-layout packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Packet kind.
    pub kind: PacketKind,
    /// Sender's sequence number for this packet.
    pub sequence: u16,
    /// Newest sequence the sender has received from us.
    pub ack: u16,
    /// Bit `i` set if `ack - i - 1` was also received.
    pub ack_bits: u32,
    /// Handshake token (CONNECT) or session token (everything else).
    pub token: u64,
}

impl Serialize for Header {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> Result<(), StreamError> {
        let mut kind = self.kind.as_u8();
        stream.serialize_u8(&mut kind, PACKET_KIND_BITS);
        stream.serialize_u16(&mut self.sequence, 16);
        stream.serialize_u16(&mut self.ack, 16);
        stream.serialize_u32(&mut self.ack_bits, 32);
        stream.serialize_u64(&mut self.token, 64);
        stream.check()?;

        if S::IS_READING {
            self.kind = PacketKind::from_u8(kind).ok_or(StreamError::InvalidPacketKind(kind))?;
        }
        Ok(())
    }
}
