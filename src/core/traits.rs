//! Core traits for Tickwire.

use super::error::StreamError;
use crate::stream::Stream;

/// A value that can travel through a bit stream.
///
/// One method covers both directions: when `S` is a reader the fields are
/// overwritten with decoded values, when it is a writer they are encoded.
/// Implementations should return [`StreamError::Corrupt`] once
/// `stream.is_corrupt()` reports a short read.
///
/// # Example
///
/// ```
/// use tickwire::prelude::*;
///
/// #[derive(Default)]
/// struct PlayerInput {
///     buttons: u8,
///     aim: f32,
/// }
///
/// impl Serialize for PlayerInput {
///     fn serialize<S: Stream>(&mut self, stream: &mut S) -> Result<(), StreamError> {
///         let aim_range = BoundedRange::new(-180.0, 180.0, 0.01);
///         stream.serialize_u8(&mut self.buttons, 6);
///         stream.serialize_bounded_f32(&mut self.aim, &aim_range);
///         stream.check()
///     }
/// }
///
/// let mut writer = BitWriter::new();
/// PlayerInput { buttons: 0b101, aim: 12.5 }.serialize(&mut writer).unwrap();
///
/// let mut reader = BitReader::from_slice(writer.as_bytes());
/// let mut input = PlayerInput::default();
/// input.serialize(&mut reader).unwrap();
/// assert_eq!(input.buttons, 0b101);
/// assert!((input.aim - 12.5).abs() <= 0.01);
/// ```
pub trait Serialize {
    /// Encode into or decode from `stream`.
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> Result<(), StreamError>;
}
