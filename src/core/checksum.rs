//! CRC32 packet checksum.
//!
//! The checksum covers the protocol version followed by the packet bytes, so
//! peers built against a different version fail verification and their
//! datagrams are dropped like any other corrupt packet.

use super::constants::PROTOCOL_VERSION_SIZE;

/// Compute the CRC32 of `version ‖ data`.
pub fn checksum(version: &[u8; PROTOCOL_VERSION_SIZE], data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(version);
    hasher.update(data);
    hasher.finalize()
}
