//! Bit-level serialization.
//!
//! [`BitWriter`] and [`BitReader`] pack values at arbitrary bit widths,
//! most-significant bit first, crossing byte boundaries freely. Both
//! implement [`Stream`], so a single `serialize` method describes a type's
//! wire layout for both directions:
//!
//! ```text
//!   writer:  value ──► serialize_u16(&mut v, 11) ──► 11 bits appended
//!   reader:  11 bits consumed ──► serialize_u16(&mut v, 11) ──► v overwritten
//! ```
//!
//! Reads past the end of the buffer flip the reader into a corrupt state;
//! from then on every read yields zero/empty values. Check
//! [`Stream::is_corrupt`] (or [`Stream::check`]) before trusting decoded
//! fields.

mod quantize;
mod reader;
mod writer;

use std::net::{Ipv4Addr, SocketAddrV4};

use glam::{Quat, Vec2, Vec3, Vec4};

pub use quantize::{f32_to_half, half_to_f32, BoundedRange, SmallestThree, QUAT_INDEX_BITS};
pub use reader::BitReader;
pub use writer::BitWriter;

use crate::core::{StreamError, PROTOCOL_VERSION_SIZE};

/// Zigzag-encode a signed integer so small magnitudes get small codes.
///
/// `0 → 0, -1 → 1, 1 → 2, -2 → 3, ...`
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(code: u64) -> i64 {
    ((code >> 1) as i64) ^ -((code & 1) as i64)
}

/// Direction-agnostic serialization over a bit stream.
///
/// Writers encode the referenced value and leave it untouched; readers
/// overwrite it with the decoded value. Widths are in bits; integer values
/// wider than the requested width are truncated to their low bits when
/// written.
pub trait Stream {
    /// `true` for readers.
    const IS_READING: bool;

    /// Whether a read has run past the end of the data.
    fn is_corrupt(&self) -> bool;

    /// Serialize the low `bit_count` bits (0..=64) of `value`.
    fn serialize_bits(&mut self, value: &mut u64, bit_count: u32);

    /// Serialize the leading `bit_count` bits of `bytes`.
    ///
    /// Readers replace `bytes` with `bit_count.div_ceil(8)` bytes, unused
    /// trailing bits zeroed.
    fn serialize_raw(&mut self, bytes: &mut Vec<u8>, bit_count: usize);

    /// Serialize a length-prefixed UTF-8 string.
    fn serialize_string(&mut self, value: &mut String);

    /// Writers prepend a CRC32 of `version ‖ contents`; readers strip and
    /// verify it. Returns `false` on a mismatch or a short buffer.
    fn serialize_checksum(&mut self, version: &[u8; PROTOCOL_VERSION_SIZE]) -> bool;

    /// Skip to the next byte boundary (zero bits on write).
    fn pad_to_byte(&mut self);

    /// `true` for writers.
    fn is_writing(&self) -> bool {
        !Self::IS_READING
    }

    /// The stream's first failure once it is corrupt.
    fn check(&self) -> Result<(), StreamError> {
        if self.is_corrupt() {
            Err(StreamError::Corrupt)
        } else {
            Ok(())
        }
    }

    /// Serialize a single-bit flag.
    fn serialize_bool(&mut self, value: &mut bool) {
        let mut raw = u64::from(*value);
        self.serialize_bits(&mut raw, 1);
        *value = raw != 0;
    }

    /// Serialize an unsigned 8-bit value in `bit_count` bits.
    fn serialize_u8(&mut self, value: &mut u8, bit_count: u32) {
        let mut raw = u64::from(*value);
        self.serialize_bits(&mut raw, bit_count.min(8));
        *value = raw as u8;
    }

    /// Serialize an unsigned 16-bit value in `bit_count` bits.
    fn serialize_u16(&mut self, value: &mut u16, bit_count: u32) {
        let mut raw = u64::from(*value);
        self.serialize_bits(&mut raw, bit_count.min(16));
        *value = raw as u16;
    }

    /// Serialize an unsigned 32-bit value in `bit_count` bits.
    fn serialize_u32(&mut self, value: &mut u32, bit_count: u32) {
        let mut raw = u64::from(*value);
        self.serialize_bits(&mut raw, bit_count.min(32));
        *value = raw as u32;
    }

    /// Serialize an unsigned 64-bit value in `bit_count` bits.
    fn serialize_u64(&mut self, value: &mut u64, bit_count: u32) {
        self.serialize_bits(value, bit_count.min(64));
    }

    /// Serialize a zigzag-encoded signed 8-bit value.
    fn serialize_i8(&mut self, value: &mut i8, bit_count: u32) {
        let mut raw = zigzag_encode(i64::from(*value));
        self.serialize_bits(&mut raw, bit_count.min(8));
        *value = zigzag_decode(raw) as i8;
    }

    /// Serialize a zigzag-encoded signed 16-bit value.
    fn serialize_i16(&mut self, value: &mut i16, bit_count: u32) {
        let mut raw = zigzag_encode(i64::from(*value));
        self.serialize_bits(&mut raw, bit_count.min(16));
        *value = zigzag_decode(raw) as i16;
    }

    /// Serialize a zigzag-encoded signed 32-bit value.
    fn serialize_i32(&mut self, value: &mut i32, bit_count: u32) {
        let mut raw = zigzag_encode(i64::from(*value));
        self.serialize_bits(&mut raw, bit_count.min(32));
        *value = zigzag_decode(raw) as i32;
    }

    /// Serialize a zigzag-encoded signed 64-bit value.
    fn serialize_i64(&mut self, value: &mut i64, bit_count: u32) {
        let mut raw = zigzag_encode(*value);
        self.serialize_bits(&mut raw, bit_count.min(64));
        *value = zigzag_decode(raw);
    }

    /// Serialize the full 32-bit pattern of an `f32`.
    fn serialize_f32(&mut self, value: &mut f32) {
        let mut raw = u64::from(value.to_bits());
        self.serialize_bits(&mut raw, 32);
        *value = f32::from_bits(raw as u32);
    }

    /// Serialize the full 64-bit pattern of an `f64`.
    fn serialize_f64(&mut self, value: &mut f64) {
        let mut raw = value.to_bits();
        self.serialize_bits(&mut raw, 64);
        *value = f64::from_bits(raw);
    }

    /// Serialize a float quantized to `range`.
    fn serialize_bounded_f32(&mut self, value: &mut f32, range: &BoundedRange) {
        let mut raw = u64::from(range.quantize(*value));
        self.serialize_bits(&mut raw, range.bits_required());
        if Self::IS_READING {
            *value = if self.is_corrupt() {
                0.0
            } else {
                range.dequantize(raw as u32)
            };
        }
    }

    /// Serialize a float as a 16-bit half.
    fn serialize_half(&mut self, value: &mut f32) {
        let mut raw = u64::from(f32_to_half(*value));
        self.serialize_bits(&mut raw, 16);
        if Self::IS_READING {
            *value = half_to_f32(raw as u16);
        }
    }

    /// Serialize a 2D vector, one range per component.
    fn serialize_vec2(&mut self, value: &mut Vec2, ranges: &[BoundedRange; 2]) {
        let mut components = value.to_array();
        for (component, range) in components.iter_mut().zip(ranges) {
            self.serialize_bounded_f32(component, range);
        }
        *value = Vec2::from_array(components);
    }

    /// Serialize a 3D vector, one range per component.
    fn serialize_vec3(&mut self, value: &mut Vec3, ranges: &[BoundedRange; 3]) {
        let mut components = value.to_array();
        for (component, range) in components.iter_mut().zip(ranges) {
            self.serialize_bounded_f32(component, range);
        }
        *value = Vec3::from_array(components);
    }

    /// Serialize a 4D vector, one range per component.
    fn serialize_vec4(&mut self, value: &mut Vec4, ranges: &[BoundedRange; 4]) {
        let mut components = value.to_array();
        for (component, range) in components.iter_mut().zip(ranges) {
            self.serialize_bounded_f32(component, range);
        }
        *value = Vec4::from_array(components);
    }

    /// Serialize a rotation with smallest-three compression: a 2-bit index
    /// followed by three components of `bits_per_element` bits each.
    fn serialize_quat(&mut self, value: &mut Quat, bits_per_element: u32) {
        let bits_per_element = bits_per_element.clamp(1, 32);
        let mut packed = SmallestThree::compress(*value, bits_per_element);

        let mut largest = u64::from(packed.largest);
        self.serialize_bits(&mut largest, QUAT_INDEX_BITS);
        packed.largest = largest as u8;
        for component in &mut packed.components {
            self.serialize_u32(component, bits_per_element);
        }

        if Self::IS_READING {
            *value = if self.is_corrupt() {
                Quat::IDENTITY
            } else {
                packed.decompress(bits_per_element)
            };
        }
    }

    /// Serialize an IPv4 address as four raw bytes.
    fn serialize_ipv4(&mut self, value: &mut Ipv4Addr) {
        let mut octets = value.octets();
        for octet in &mut octets {
            self.serialize_u8(octet, 8);
        }
        *value = Ipv4Addr::from(octets);
    }

    /// Serialize an IPv4 endpoint: four address bytes then a 16-bit port.
    fn serialize_socket_addr(&mut self, value: &mut SocketAddrV4) {
        let mut ip = *value.ip();
        let mut port = value.port();
        self.serialize_ipv4(&mut ip);
        self.serialize_u16(&mut port, 16);
        *value = SocketAddrV4::new(ip, port);
    }

    /// Serialize a byte array whose length both sides already know.
    fn serialize_bytes(&mut self, bytes: &mut Vec<u8>, len: usize) {
        self.serialize_raw(bytes, len * 8);
    }
}
