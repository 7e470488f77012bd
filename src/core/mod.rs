//! Core types shared by every layer: constants, errors, checksum, buffer pool
//! and the application serialization trait.

mod checksum;
mod constants;
mod error;
mod pool;
mod traits;

pub use checksum::checksum;
pub use constants::*;
pub use error::*;
pub use pool::{BufferPool, PooledBuffer};
pub use traits::Serialize;
