//! Bit stream writer.

use std::net::{Ipv4Addr, SocketAddrV4};

use glam::{Quat, Vec2, Vec3, Vec4};

use super::{BoundedRange, Stream};
use crate::core::{checksum, CHECKSUM_SIZE, PROTOCOL_VERSION_SIZE};

/// Appends values to a growable buffer at arbitrary bit granularity.
///
/// Bits are written most-significant first. Bits past [`total_bits`] in the
/// final byte are always zero, so [`as_bytes`] can be sent as-is.
///
/// [`total_bits`]: BitWriter::total_bits
/// [`as_bytes`]: BitWriter::as_bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitWriter {
    buffer: Vec<u8>,
    total_bits: usize,
}

impl BitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with room for `bytes` bytes.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(bytes),
            total_bits: 0,
        }
    }

    /// Bits written so far.
    pub fn total_bits(&self) -> usize {
        self.total_bits
    }

    /// Bytes needed to hold everything written so far.
    pub fn len(&self) -> usize {
        self.total_bits.div_ceil(8)
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.total_bits == 0
    }

    /// The written bytes, final partial byte zero-padded.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.len()]
    }

    /// Consume the writer, returning its bytes.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buffer.truncate(self.len());
        self.buffer
    }

    /// Forget all written bits, keeping the allocation.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.total_bits = 0;
    }

    /// Append the leading `bit_count` bits of `source`.
    ///
    /// Each source byte lands across at most two destination bytes: the part
    /// shifted right by the current bit offset, and the carry shifted into
    /// the following byte.
    pub fn write_raw(&mut self, source: &[u8], bit_count: usize) {
        debug_assert!(bit_count <= source.len() * 8, "not enough source bits");
        let bit_count = bit_count.min(source.len() * 8);
        if bit_count == 0 {
            return;
        }

        let offset = self.total_bits % 8;
        let mut index = self.total_bits / 8;
        let byte_count = bit_count.div_ceil(8);
        let tail = bit_count % 8;

        self.buffer.resize((self.total_bits + bit_count).div_ceil(8), 0);

        for (i, &source_byte) in source[..byte_count].iter().enumerate() {
            let mut byte = source_byte;
            if tail != 0 && i == byte_count - 1 {
                byte &= 0xFF << (8 - tail);
            }

            self.buffer[index] |= byte >> offset;
            if offset != 0 {
                if let Some(next) = self.buffer.get_mut(index + 1) {
                    *next |= byte << (8 - offset);
                }
            }
            index += 1;
        }

        self.total_bits += bit_count;
    }

    /// Append the low `bit_count` bits of `value` (0..=64).
    pub fn write_bits(&mut self, value: u64, bit_count: u32) {
        debug_assert!(bit_count <= 64, "bit count {bit_count} exceeds 64");
        let bit_count = bit_count.min(64);
        if bit_count == 0 {
            return;
        }
        let aligned = if bit_count == 64 {
            value
        } else {
            value << (64 - bit_count)
        };
        self.write_raw(&aligned.to_be_bytes(), bit_count as usize);
    }

    /// Append one bit.
    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(u64::from(value), 1);
    }

    /// Append an unsigned 8-bit value.
    pub fn write_u8(&mut self, value: u8, bit_count: u32) {
        self.write_bits(u64::from(value), bit_count.min(8));
    }

    /// Append an unsigned 16-bit value.
    pub fn write_u16(&mut self, value: u16, bit_count: u32) {
        self.write_bits(u64::from(value), bit_count.min(16));
    }

    /// Append an unsigned 32-bit value.
    pub fn write_u32(&mut self, value: u32, bit_count: u32) {
        self.write_bits(u64::from(value), bit_count.min(32));
    }

    /// Append an unsigned 64-bit value.
    pub fn write_u64(&mut self, value: u64, bit_count: u32) {
        self.write_bits(value, bit_count);
    }

    /// Append a zigzag-encoded signed 8-bit value.
    pub fn write_i8(&mut self, mut value: i8, bit_count: u32) {
        self.serialize_i8(&mut value, bit_count);
    }

    /// Append a zigzag-encoded signed 16-bit value.
    pub fn write_i16(&mut self, mut value: i16, bit_count: u32) {
        self.serialize_i16(&mut value, bit_count);
    }

    /// Append a zigzag-encoded signed 32-bit value.
    pub fn write_i32(&mut self, mut value: i32, bit_count: u32) {
        self.serialize_i32(&mut value, bit_count);
    }

    /// Append a zigzag-encoded signed 64-bit value.
    pub fn write_i64(&mut self, mut value: i64, bit_count: u32) {
        self.serialize_i64(&mut value, bit_count);
    }

    /// Append the raw bit pattern of an `f32`.
    pub fn write_f32(&mut self, value: f32) {
        self.write_bits(u64::from(value.to_bits()), 32);
    }

    /// Append the raw bit pattern of an `f64`.
    pub fn write_f64(&mut self, value: f64) {
        self.write_bits(value.to_bits(), 64);
    }

    /// Append a float quantized to `range`.
    pub fn write_bounded_f32(&mut self, value: f32, range: &BoundedRange) {
        self.write_bits(u64::from(range.quantize(value)), range.bits_required());
    }

    /// Append a float as a 16-bit half.
    pub fn write_half(&mut self, mut value: f32) {
        self.serialize_half(&mut value);
    }

    /// Append a quantized 2D vector.
    pub fn write_vec2(&mut self, mut value: Vec2, ranges: &[BoundedRange; 2]) {
        self.serialize_vec2(&mut value, ranges);
    }

    /// Append a quantized 3D vector.
    pub fn write_vec3(&mut self, mut value: Vec3, ranges: &[BoundedRange; 3]) {
        self.serialize_vec3(&mut value, ranges);
    }

    /// Append a quantized 4D vector.
    pub fn write_vec4(&mut self, mut value: Vec4, ranges: &[BoundedRange; 4]) {
        self.serialize_vec4(&mut value, ranges);
    }

    /// Append a smallest-three compressed rotation.
    pub fn write_quat(&mut self, mut value: Quat, bits_per_element: u32) {
        self.serialize_quat(&mut value, bits_per_element);
    }

    /// Append a string: signed 32-bit byte count, then the UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) {
        let len = i32::try_from(value.len()).unwrap_or(i32::MAX);
        self.write_i32(len, 32);
        self.write_raw(value.as_bytes(), len as usize * 8);
    }

    /// Append an IPv4 address as four bytes.
    pub fn write_ipv4(&mut self, mut value: Ipv4Addr) {
        self.serialize_ipv4(&mut value);
    }

    /// Append an IPv4 endpoint (address bytes, then port).
    pub fn write_socket_addr(&mut self, mut value: SocketAddrV4) {
        self.serialize_socket_addr(&mut value);
    }

    /// Append every bit of `bytes`.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_raw(bytes, bytes.len() * 8);
    }

    /// Append the full bit content of another writer.
    pub fn write_stream(&mut self, other: &BitWriter) {
        self.write_raw(other.as_bytes(), other.total_bits);
    }

    /// Advance to the next byte boundary.
    pub fn align(&mut self) {
        self.total_bits = self.len() * 8;
    }

    /// Zero-fill until the stream is exactly `size` bytes long.
    ///
    /// Streams already at or past `size` are left alone.
    pub fn pad_to_end(&mut self, size: usize) {
        if self.total_bits < size * 8 {
            self.buffer.resize(size, 0);
            self.total_bits = size * 8;
        }
    }

    /// Prepend the CRC32 of `version ‖ contents` as four big-endian bytes.
    ///
    /// Must be the last operation before sending.
    pub fn write_checksum(&mut self, version: &[u8; PROTOCOL_VERSION_SIZE]) {
        let crc = checksum(version, self.as_bytes());
        let mut framed = Vec::with_capacity(CHECKSUM_SIZE + self.len());
        framed.extend_from_slice(&crc.to_be_bytes());
        framed.extend_from_slice(self.as_bytes());
        self.buffer = framed;
        self.total_bits += CHECKSUM_SIZE * 8;
    }
}

impl Stream for BitWriter {
    const IS_READING: bool = false;

    fn is_corrupt(&self) -> bool {
        false
    }

    fn serialize_bits(&mut self, value: &mut u64, bit_count: u32) {
        self.write_bits(*value, bit_count);
    }

    fn serialize_raw(&mut self, bytes: &mut Vec<u8>, bit_count: usize) {
        self.write_raw(bytes, bit_count);
    }

    fn serialize_string(&mut self, value: &mut String) {
        self.write_string(value);
    }

    fn serialize_checksum(&mut self, version: &[u8; PROTOCOL_VERSION_SIZE]) -> bool {
        self.write_checksum(version);
        true
    }

    fn pad_to_byte(&mut self) {
        self.align();
    }
}
