//! Protocol constants.
//!
//! Wire-level values are fixed by the protocol and MUST NOT be changed
//! without bumping the protocol version.

// =============================================================================
// CHECKSUM
// =============================================================================

/// Size of the CRC32 prefix on every datagram.
pub const CHECKSUM_SIZE: usize = 4;

/// Size of the application-supplied protocol version folded into the CRC.
pub const PROTOCOL_VERSION_SIZE: usize = 4;

/// Default protocol version.
pub const DEFAULT_PROTOCOL_VERSION: [u8; PROTOCOL_VERSION_SIZE] = *b"TW01";

// =============================================================================
// HEADER LAYOUT
// =============================================================================

/// Number of packet kinds (CONNECT, UNRELIABLE, RELIABLE, HEARTBEAT, DISCONNECT).
pub const PACKET_KIND_COUNT: u32 = 5;

/// Bits used for the packet kind: ceil(log2(PACKET_KIND_COUNT)).
pub const PACKET_KIND_BITS: u32 = 3;

/// Header size in bits (kind + sequence + ack + ack bits + token).
pub const HEADER_BITS: usize = PACKET_KIND_BITS as usize + 16 + 16 + 32 + 64;

/// Header size in whole bytes.
pub const HEADER_SIZE: usize = HEADER_BITS.div_ceil(8);

// =============================================================================
// PACKET SIZES
// =============================================================================

/// Minimum valid datagram size (checksum + header). Anything shorter is dropped.
pub const PACKET_MIN_SIZE: usize = CHECKSUM_SIZE + HEADER_SIZE;

/// Hard protocol cap on datagram size (Ethernet MTU minus IPv4 and UDP headers).
pub const PROTOCOL_MAX_PACKET_SIZE: usize = 1472;

/// Default maximum datagram size.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1200;

// =============================================================================
// RELIABILITY
// =============================================================================

/// Number of sequence numbers covered by the ack bitfield.
pub const ACK_WINDOW: u16 = 32;

/// Ring buffer size for per-sequence send records. Must exceed `ACK_WINDOW`.
pub const RTT_BUFFER_SIZE: usize = 128;

/// Weight of the previous value in the RTT and packet loss moving averages.
pub const EMA_HISTORY_WEIGHT: f64 = 0.9;

/// RTT assumed before the first sample arrives, in seconds.
pub const INITIAL_RTT: f64 = 0.25;

// =============================================================================
// TIMING (defaults, seconds)
// =============================================================================

/// Default tick interval (20 Hz).
pub const DEFAULT_TICK_INTERVAL: f64 = 1.0 / 20.0;

/// Default resend interval as a multiple of the tick interval.
pub const DEFAULT_RESEND_TICKS: f64 = 4.0;

/// Default silence before a peer is considered gone.
pub const DEFAULT_TIMEOUT: f64 = 10.0;

/// Default period between network statistics reports.
pub const DEFAULT_STATS_INTERVAL: f64 = 1.0;

/// Default number of buffers the pool retains per size class.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

const _: () = assert!(RTT_BUFFER_SIZE > ACK_WINDOW as usize);
const _: () = assert!(1 << PACKET_KIND_BITS >= PACKET_KIND_COUNT);
