//! Bit stream reader.

use std::net::{Ipv4Addr, SocketAddrV4};

use glam::{Quat, Vec2, Vec3, Vec4};

use super::{BoundedRange, Stream};
use crate::core::{checksum, StreamError, CHECKSUM_SIZE, PROTOCOL_VERSION_SIZE};

/// Consumes values from a byte buffer at arbitrary bit granularity.
///
/// The reader owns its buffer: either a private copy ([`BitReader::from_slice`])
/// or any owned byte container such as a pooled receive buffer.
///
/// Once a read asks for more bits than remain, or a length prefix is
/// negative, the reader is marked corrupt and every later read returns
/// zero/empty without moving the cursor. The first failure is kept and
/// reported by [`Stream::check`].
#[derive(Debug, Clone)]
pub struct BitReader<B = Vec<u8>> {
    buffer: B,
    position: usize,
    error: Option<StreamError>,
}

impl BitReader<Vec<u8>> {
    /// Create a reader over a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

impl<B: AsRef<[u8]>> BitReader<B> {
    /// Create a reader positioned at the first bit of `buffer`.
    pub fn new(buffer: B) -> Self {
        Self {
            buffer,
            position: 0,
            error: None,
        }
    }

    /// Bits consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Unread bits.
    pub fn bits_remaining(&self) -> usize {
        (self.buffer.as_ref().len() * 8).saturating_sub(self.position)
    }

    /// Whether a read has failed.
    pub fn is_corrupt(&self) -> bool {
        self.error.is_some()
    }

    /// The first failure seen, if any.
    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    fn fail(&mut self, error: StreamError) {
        self.error.get_or_insert(error);
    }

    /// The whole underlying buffer, including consumed bytes.
    pub fn get_ref(&self) -> &B {
        &self.buffer
    }

    /// Give back the underlying buffer.
    pub fn into_inner(self) -> B {
        self.buffer
    }

    /// Read `bit_count` bits into the front of `out`, MSB first.
    ///
    /// Each output byte is reassembled from the current source byte shifted
    /// left by the bit offset plus the carry from the byte after it.
    fn read_into(&mut self, out: &mut [u8], bit_count: usize) -> bool {
        if self.is_corrupt() {
            return false;
        }
        if bit_count == 0 {
            return true;
        }
        if bit_count > self.bits_remaining() || bit_count > out.len() * 8 {
            self.fail(StreamError::Corrupt);
            return false;
        }

        let data = self.buffer.as_ref();
        let offset = self.position % 8;
        let mut index = self.position / 8;
        let byte_count = bit_count.div_ceil(8);

        for slot in &mut out[..byte_count] {
            let mut byte = data[index] << offset;
            if offset != 0 {
                if let Some(&next) = data.get(index + 1) {
                    byte |= next >> (8 - offset);
                }
            }
            *slot = byte;
            index += 1;
        }

        let tail = bit_count % 8;
        if tail != 0 {
            out[byte_count - 1] &= 0xFF << (8 - tail);
        }

        self.position += bit_count;
        true
    }

    /// Read `bit_count` bits into a fresh buffer, trailing bits zeroed.
    ///
    /// Returns an empty vector if the stream is or becomes corrupt.
    pub fn read_raw(&mut self, bit_count: usize) -> Vec<u8> {
        if self.is_corrupt() || bit_count > self.bits_remaining() {
            self.fail(StreamError::Corrupt);
            return Vec::new();
        }
        let mut out = vec![0u8; bit_count.div_ceil(8)];
        if self.read_into(&mut out, bit_count) {
            out
        } else {
            Vec::new()
        }
    }

    /// Split off the next `bit_count` bits as a reader of their own.
    ///
    /// Inverse of [`BitWriter::write_stream`](super::BitWriter::write_stream).
    /// The last byte of the new reader is zero-padded.
    pub fn read_stream(&mut self, bit_count: usize) -> BitReader {
        BitReader::new(self.read_raw(bit_count))
    }

    /// Read `bit_count` bits (0..=64) as an unsigned value.
    pub fn read_bits(&mut self, bit_count: u32) -> u64 {
        if bit_count == 0 || self.is_corrupt() {
            return 0;
        }
        if bit_count > 64 {
            self.fail(StreamError::Corrupt);
            return 0;
        }
        let mut bytes = [0u8; 8];
        if !self.read_into(&mut bytes, bit_count as usize) {
            return 0;
        }
        let value = u64::from_be_bytes(bytes);
        if bit_count == 64 {
            value
        } else {
            value >> (64 - bit_count)
        }
    }

    /// Read one bit.
    pub fn read_bool(&mut self) -> bool {
        self.read_bits(1) != 0
    }

    /// Read an unsigned 8-bit value.
    pub fn read_u8(&mut self, bit_count: u32) -> u8 {
        self.read_bits(bit_count.min(8)) as u8
    }

    /// Read an unsigned 16-bit value.
    pub fn read_u16(&mut self, bit_count: u32) -> u16 {
        self.read_bits(bit_count.min(16)) as u16
    }

    /// Read an unsigned 32-bit value.
    pub fn read_u32(&mut self, bit_count: u32) -> u32 {
        self.read_bits(bit_count.min(32)) as u32
    }

    /// Read an unsigned 64-bit value.
    pub fn read_u64(&mut self, bit_count: u32) -> u64 {
        self.read_bits(bit_count)
    }

    /// Read a zigzag-encoded signed 8-bit value.
    pub fn read_i8(&mut self, bit_count: u32) -> i8 {
        let mut value = 0;
        self.serialize_i8(&mut value, bit_count);
        value
    }

    /// Read a zigzag-encoded signed 16-bit value.
    pub fn read_i16(&mut self, bit_count: u32) -> i16 {
        let mut value = 0;
        self.serialize_i16(&mut value, bit_count);
        value
    }

    /// Read a zigzag-encoded signed 32-bit value.
    pub fn read_i32(&mut self, bit_count: u32) -> i32 {
        let mut value = 0;
        self.serialize_i32(&mut value, bit_count);
        value
    }

    /// Read a zigzag-encoded signed 64-bit value.
    pub fn read_i64(&mut self, bit_count: u32) -> i64 {
        let mut value = 0;
        self.serialize_i64(&mut value, bit_count);
        value
    }

    /// Read the raw bit pattern of an `f32`.
    pub fn read_f32(&mut self) -> f32 {
        f32::from_bits(self.read_bits(32) as u32)
    }

    /// Read the raw bit pattern of an `f64`.
    pub fn read_f64(&mut self) -> f64 {
        f64::from_bits(self.read_bits(64))
    }

    /// Read a float quantized to `range`.
    pub fn read_bounded_f32(&mut self, range: &BoundedRange) -> f32 {
        let mut value = 0.0;
        self.serialize_bounded_f32(&mut value, range);
        value
    }

    /// Read a 16-bit half float.
    pub fn read_half(&mut self) -> f32 {
        let mut value = 0.0;
        self.serialize_half(&mut value);
        value
    }

    /// Read a quantized 2D vector.
    pub fn read_vec2(&mut self, ranges: &[BoundedRange; 2]) -> Vec2 {
        let mut value = Vec2::ZERO;
        self.serialize_vec2(&mut value, ranges);
        value
    }

    /// Read a quantized 3D vector.
    pub fn read_vec3(&mut self, ranges: &[BoundedRange; 3]) -> Vec3 {
        let mut value = Vec3::ZERO;
        self.serialize_vec3(&mut value, ranges);
        value
    }

    /// Read a quantized 4D vector.
    pub fn read_vec4(&mut self, ranges: &[BoundedRange; 4]) -> Vec4 {
        let mut value = Vec4::ZERO;
        self.serialize_vec4(&mut value, ranges);
        value
    }

    /// Read a smallest-three compressed rotation.
    pub fn read_quat(&mut self, bits_per_element: u32) -> Quat {
        let mut value = Quat::IDENTITY;
        self.serialize_quat(&mut value, bits_per_element);
        value
    }

    /// Read a length-prefixed UTF-8 string.
    ///
    /// A negative or oversized length marks the stream corrupt; invalid
    /// UTF-8 fails it with [`StreamError::InvalidUtf8`]. Either way the
    /// result is an empty string.
    pub fn read_string(&mut self) -> String {
        let len = self.read_i32(32);
        if self.is_corrupt() {
            return String::new();
        }
        let Ok(len) = usize::try_from(len) else {
            self.fail(StreamError::Corrupt);
            return String::new();
        };
        let bytes = self.read_raw(len * 8);
        if self.is_corrupt() {
            return String::new();
        }
        match String::from_utf8(bytes) {
            Ok(value) => value,
            Err(_) => {
                self.fail(StreamError::InvalidUtf8);
                String::new()
            }
        }
    }

    /// Read an IPv4 address.
    pub fn read_ipv4(&mut self) -> Ipv4Addr {
        let mut value = Ipv4Addr::UNSPECIFIED;
        self.serialize_ipv4(&mut value);
        value
    }

    /// Read an IPv4 endpoint.
    pub fn read_socket_addr(&mut self) -> SocketAddrV4 {
        let mut value = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        self.serialize_socket_addr(&mut value);
        value
    }

    /// Read `len` whole bytes.
    pub fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        self.read_raw(len * 8)
    }

    /// Skip to the next byte boundary.
    pub fn align(&mut self) {
        let end = self.buffer.as_ref().len() * 8;
        self.position = (self.position.div_ceil(8) * 8).min(end);
    }

    /// Consume the leading CRC32 and compare it with the CRC of
    /// `version ‖ remaining bytes`.
    ///
    /// A mismatch is not corruption: the caller decides to drop the packet.
    /// The cursor must be byte-aligned.
    pub fn verify_checksum(&mut self, version: &[u8; PROTOCOL_VERSION_SIZE]) -> bool {
        debug_assert_eq!(self.position % 8, 0, "checksum must be byte-aligned");
        let start = self.position / 8;
        let stored = self.read_bits((CHECKSUM_SIZE * 8) as u32) as u32;
        if self.is_corrupt() {
            return false;
        }
        let body = &self.buffer.as_ref()[start + CHECKSUM_SIZE..];
        checksum(version, body) == stored
    }
}

impl<B: AsRef<[u8]>> Stream for BitReader<B> {
    const IS_READING: bool = true;

    fn is_corrupt(&self) -> bool {
        self.error.is_some()
    }

    fn check(&self) -> Result<(), StreamError> {
        self.error.clone().map_or(Ok(()), Err)
    }

    fn serialize_bits(&mut self, value: &mut u64, bit_count: u32) {
        *value = self.read_bits(bit_count);
    }

    fn serialize_raw(&mut self, bytes: &mut Vec<u8>, bit_count: usize) {
        *bytes = self.read_raw(bit_count);
    }

    fn serialize_string(&mut self, value: &mut String) {
        *value = self.read_string();
    }

    fn serialize_checksum(&mut self, version: &[u8; PROTOCOL_VERSION_SIZE]) -> bool {
        self.verify_checksum(version)
    }

    fn pad_to_byte(&mut self) {
        self.align();
    }
}
