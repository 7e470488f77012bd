//! Lossy numeric encodings: bounded-range floats, half floats and
//! smallest-three quaternions.

use std::f32::consts::FRAC_1_SQRT_2;

use glam::{Quat, Vec4};

/// A closed float interval quantized to a fixed number of bits.
///
/// `dequantize(quantize(x))` differs from `x` by at most `precision` for any
/// `x` in `[min, max]`; values outside the interval are clamped first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundedRange {
    min: f32,
    max: f32,
    precision: f32,
    bits: u32,
    max_value: u32,
}

impl BoundedRange {
    /// Create a range where adjacent codes are at most `precision` apart.
    ///
    /// Requires `ceil(log2((max - min) / precision))` bits, at least 1 and at
    /// most 32. Swapped bounds are reordered.
    pub fn new(min: f32, max: f32, precision: f32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let span = f64::from(max) - f64::from(min);
        let steps = if precision > 0.0 {
            span / f64::from(precision)
        } else {
            f64::from(u32::MAX)
        };
        let bits = if steps <= 1.0 {
            1
        } else {
            (steps.log2().ceil() as u32).clamp(1, 32)
        };
        Self::from_parts(min, max, precision, bits)
    }

    /// Create a range that spends exactly `bits` bits (clamped to 1..=32).
    pub fn with_bits(min: f32, max: f32, bits: u32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let bits = bits.clamp(1, 32);
        let max_value = max_code(bits);
        let precision = ((f64::from(max) - f64::from(min)) / f64::from(max_value)) as f32;
        Self::from_parts(min, max, precision, bits)
    }

    fn from_parts(min: f32, max: f32, precision: f32, bits: u32) -> Self {
        Self {
            min,
            max,
            precision,
            bits,
            max_value: max_code(bits),
        }
    }

    /// Lower bound.
    pub fn min(&self) -> f32 {
        self.min
    }

    /// Upper bound.
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Requested precision.
    pub fn precision(&self) -> f32 {
        self.precision
    }

    /// Bits needed per quantized value.
    pub fn bits_required(&self) -> u32 {
        self.bits
    }

    /// Map `value` to a code in `[0, 2^bits - 1]`. NaN maps to 0.
    pub fn quantize(&self, value: f32) -> u32 {
        let span = f64::from(self.max) - f64::from(self.min);
        if value.is_nan() || span <= 0.0 {
            return 0;
        }
        let clamped = f64::from(value.clamp(self.min, self.max));
        let normalized = (clamped - f64::from(self.min)) / span;
        (normalized * f64::from(self.max_value)).round() as u32
    }

    /// Map a code back into the range. Codes above the maximum saturate.
    pub fn dequantize(&self, code: u32) -> f32 {
        let code = code.min(self.max_value);
        let span = f64::from(self.max) - f64::from(self.min);
        let normalized = f64::from(code) / f64::from(self.max_value);
        (f64::from(self.min) + normalized * span) as f32
    }
}

fn max_code(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

// =============================================================================
// HALF PRECISION
// =============================================================================

/// Convert to an IEEE 754 binary16 bit pattern, rounding to nearest even.
///
/// Values beyond the half range become infinity; NaN stays NaN.
pub fn f32_to_half(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x007F_FFFF;

    if exponent == 0xFF {
        let nan = if mantissa != 0 { 0x0200 } else { 0 };
        return sign | 0x7C00 | nan;
    }

    let half_exponent = exponent - 127 + 15;
    if half_exponent >= 0x1F {
        return sign | 0x7C00;
    }

    if half_exponent <= 0 {
        if half_exponent < -10 {
            return sign;
        }
        let full = mantissa | 0x0080_0000;
        let shift = (14 - half_exponent) as u32;
        let round_bit = 1u32 << (shift - 1);
        let mut half_mantissa = full >> shift;
        if full & round_bit != 0 && full & (3 * round_bit - 1) != 0 {
            half_mantissa += 1;
        }
        return sign | half_mantissa as u16;
    }

    let mut half = u32::from(sign) | ((half_exponent as u32) << 10) | (mantissa >> 13);
    // Carry out of the mantissa correctly bumps the exponent (up to infinity).
    let round_bit = 0x1000;
    if mantissa & round_bit != 0 && mantissa & (3 * round_bit - 1) != 0 {
        half += 1;
    }
    half as u16
}

/// Expand an IEEE 754 binary16 bit pattern.
pub fn half_to_f32(half: u16) -> f32 {
    let negative = half & 0x8000 != 0;
    let sign = u32::from(half & 0x8000) << 16;
    let exponent = u32::from((half >> 10) & 0x1F);
    let mantissa = u32::from(half & 0x03FF);

    match exponent {
        0 => {
            // Zero or subnormal: mantissa * 2^-24 is exact in f32.
            let magnitude = mantissa as f32 / 16_777_216.0;
            if negative { -magnitude } else { magnitude }
        }
        0x1F => f32::from_bits(sign | 0x7F80_0000 | (mantissa << 13)),
        _ => f32::from_bits(sign | ((exponent + 127 - 15) << 23) | (mantissa << 13)),
    }
}

// =============================================================================
// SMALLEST-THREE QUATERNIONS
// =============================================================================

/// Bits used for the index of the dropped component.
pub const QUAT_INDEX_BITS: u32 = 2;

/// A unit quaternion with its largest component dropped.
///
/// The dropped component is forced non-negative (`q` and `-q` describe the
/// same rotation), so it is recovered as `sqrt(1 - a² - b² - c²)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmallestThree {
    /// Index (x=0, y=1, z=2, w=3) of the dropped component.
    pub largest: u8,
    /// The remaining components in x, y, z, w order, quantized.
    pub components: [u32; 3],
}

fn quat_component_range(bits_per_element: u32) -> BoundedRange {
    BoundedRange::with_bits(-FRAC_1_SQRT_2, FRAC_1_SQRT_2, bits_per_element)
}

impl SmallestThree {
    /// Compress `rotation`, storing each kept component in `bits_per_element` bits.
    pub fn compress(rotation: Quat, bits_per_element: u32) -> Self {
        let unit = Vec4::from(rotation).try_normalize().unwrap_or(Vec4::W);
        let values = unit.to_array();

        let mut largest = 0;
        for i in 1..4 {
            if values[i].abs() > values[largest].abs() {
                largest = i;
            }
        }
        let flip = if values[largest] < 0.0 { -1.0 } else { 1.0 };

        let range = quat_component_range(bits_per_element);
        let mut components = [0u32; 3];
        let kept = (0..4).filter(|&i| i != largest);
        for (slot, i) in components.iter_mut().zip(kept) {
            *slot = range.quantize(values[i] * flip);
        }

        Self {
            largest: largest as u8,
            components,
        }
    }

    /// Rebuild the rotation.
    pub fn decompress(&self, bits_per_element: u32) -> Quat {
        let range = quat_component_range(bits_per_element);
        let largest = usize::from(self.largest & 0b11);

        let mut values = [0.0f32; 4];
        let mut sum_squares = 0.0;
        let kept = (0..4).filter(|&i| i != largest);
        for (&code, i) in self.components.iter().zip(kept) {
            let value = range.dequantize(code);
            sum_squares += value * value;
            values[i] = value;
        }
        values[largest] = (1.0 - sum_squares).max(0.0).sqrt();

        let unit = Vec4::from_array(values).try_normalize().unwrap_or(Vec4::W);
        Quat::from_vec4(unit)
    }
}
