//! Per-peer connection state.
//!
//! Tracks sequence numbers, the ack bitfield, token authentication and the
//! RTT / packet loss estimates for one remote address.

use std::net::SocketAddr;

use super::timing::ema;
use crate::core::{ACK_WINDOW, INITIAL_RTT, RTT_BUFFER_SIZE};

/// Connection lifecycle state. Closed connections are simply removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, tokens not yet exchanged in both directions.
    Pending,
    /// The peer's token is known; every packet must carry the session token.
    Authenticated,
}

/// What happened to one of our sent sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SendRecord {
    Empty,
    InFlight { sequence: u16, sent_at: f64 },
    Acked,
}

/// `a` is newer than `b` under 16-bit wraparound.
#[inline]
pub fn is_sequence_greater(a: u16, b: u16) -> bool {
    (a > b && a - b <= 32768) || (a < b && b - a > 32768)
}

/// Whether `sequence` is covered by an ack of `last` with bitfield `bits`.
///
/// `last` itself is always acknowledged; anything newer never is. Sequences
/// older than the 32-entry window cannot be checked and are reported as
/// acknowledged, so stale packets are never treated as new.
pub fn is_acknowledged_in(bits: u32, last: u16, sequence: u16) -> bool {
    if sequence == last {
        return true;
    }
    if is_sequence_greater(sequence, last) {
        return false;
    }
    let index = last.wrapping_sub(sequence).wrapping_sub(1);
    if index >= ACK_WINDOW {
        return true;
    }
    bits & (1 << index) != 0
}

/// Protocol state for one remote peer.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    address: SocketAddr,
    state: ConnectionState,

    local_sequence: u16,
    remote_sequence: u16,
    ack_bits: u32,

    local_token: u64,
    remote_token: u64,
    token_mismatches: u32,

    rtt: f64,
    packet_loss: f64,
    last_sent: f64,
    last_received: f64,
    sent_this_tick: bool,

    sends: [SendRecord; RTT_BUFFER_SIZE],
}

impl ClientConnection {
    /// Create a pending connection that will identify itself with `local_token`.
    pub fn new(address: SocketAddr, local_token: u64, now: f64) -> Self {
        Self {
            address,
            state: ConnectionState::Pending,
            local_sequence: 0,
            remote_sequence: 0,
            ack_bits: 0,
            local_token,
            remote_token: 0,
            token_mismatches: 0,
            rtt: INITIAL_RTT,
            packet_loss: 0.0,
            last_sent: now,
            last_received: now,
            sent_this_tick: false,
            sends: [SendRecord::Empty; RTT_BUFFER_SIZE],
        }
    }

    /// Remote address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the token exchange has completed.
    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// Sequence number of the last packet we sent.
    pub fn local_sequence(&self) -> u16 {
        self.local_sequence
    }

    /// Newest sequence number received from the peer.
    pub fn remote_sequence(&self) -> u16 {
        self.remote_sequence
    }

    /// Bitfield of the 32 sequences before [`remote_sequence`](Self::remote_sequence).
    pub fn ack_bits(&self) -> u32 {
        self.ack_bits
    }

    /// Token we generated for this peer.
    pub fn local_token(&self) -> u64 {
        self.local_token
    }

    /// Token the peer sent us (zero until authenticated).
    pub fn remote_token(&self) -> u64 {
        self.remote_token
    }

    /// Token carried by every post-handshake packet in both directions.
    pub fn effective_token(&self) -> u64 {
        self.local_token ^ self.remote_token
    }

    /// Consecutive token mismatches since the last good packet.
    pub fn token_mismatches(&self) -> u32 {
        self.token_mismatches
    }

    /// Smoothed round-trip time in seconds.
    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    /// Smoothed fraction of packets lost, in `[0, 1]`.
    pub fn packet_loss(&self) -> f64 {
        self.packet_loss
    }

    /// When we last sent to this peer.
    pub fn last_sent(&self) -> f64 {
        self.last_sent
    }

    /// When we last accepted a packet from this peer.
    pub fn last_received(&self) -> f64 {
        self.last_received
    }

    pub(crate) fn sent_this_tick(&self) -> bool {
        self.sent_this_tick
    }

    pub(crate) fn end_tick(&mut self) {
        self.sent_this_tick = false;
    }

    /// Check the token of a repeated handshake, which carries the peer's
    /// own token rather than the session token. Counts toward
    /// [`token_mismatches`](Self::token_mismatches) like [`authenticate`](Self::authenticate).
    pub(crate) fn verify_handshake_token(&mut self, token: u64, now: f64) -> bool {
        if token != self.remote_token {
            self.token_mismatches = self.token_mismatches.saturating_add(1);
            return false;
        }
        self.token_mismatches = 0;
        self.last_received = now;
        true
    }

    fn slot(sequence: u16) -> usize {
        usize::from(sequence) % RTT_BUFFER_SIZE
    }

    /// Claim the next sequence number for an outgoing packet.
    ///
    /// First folds a loss sample into the packet loss average: of the
    /// previous `RTT_BUFFER_SIZE - 1` sends that have been out longer than
    /// the current RTT, the fraction still unacknowledged.
    pub fn increment_sequence(&mut self, now: f64) -> u16 {
        let mut settled = 0u32;
        let mut lost = 0u32;
        for back in 0..RTT_BUFFER_SIZE as u16 - 1 {
            let sequence = self.local_sequence.wrapping_sub(back);
            match self.sends[Self::slot(sequence)] {
                SendRecord::InFlight { sent_at, .. } if now - sent_at > self.rtt => {
                    settled += 1;
                    lost += 1;
                }
                SendRecord::Acked => settled += 1,
                _ => {}
            }
        }
        if settled > 0 {
            self.packet_loss = ema(self.packet_loss, f64::from(lost) / f64::from(settled));
        }

        self.local_sequence = self.local_sequence.wrapping_add(1);
        self.sends[Self::slot(self.local_sequence)] = SendRecord::InFlight {
            sequence: self.local_sequence,
            sent_at: now,
        };
        self.last_sent = now;
        self.sent_this_tick = true;
        self.local_sequence
    }

    /// Check a received token.
    ///
    /// Before authentication any token is accepted as the peer's and the
    /// connection becomes authenticated. Afterwards the token must equal
    /// [`effective_token`](Self::effective_token) exactly.
    pub fn authenticate(&mut self, token: u64, now: f64) -> bool {
        match self.state {
            ConnectionState::Pending => {
                self.remote_token = token;
                self.state = ConnectionState::Authenticated;
            }
            ConnectionState::Authenticated if token != self.effective_token() => {
                self.token_mismatches = self.token_mismatches.saturating_add(1);
                return false;
            }
            ConnectionState::Authenticated => {}
        }
        self.token_mismatches = 0;
        self.last_received = now;
        true
    }

    /// Record receipt of `sequence` from the peer.
    pub fn acknowledge(&mut self, sequence: u16) {
        if sequence == self.remote_sequence {
            return;
        }
        if is_sequence_greater(sequence, self.remote_sequence) {
            let shift = u32::from(sequence.wrapping_sub(self.remote_sequence));
            let old_remote = 1u32.checked_shl(shift - 1).unwrap_or(0);
            self.ack_bits = self.ack_bits.checked_shl(shift).unwrap_or(0) | old_remote;
            self.remote_sequence = sequence;
        } else {
            let index = self.remote_sequence.wrapping_sub(sequence).wrapping_sub(1);
            if index < ACK_WINDOW {
                self.ack_bits |= 1 << index;
            }
        }
    }

    /// Whether `sequence` from the peer has already been received.
    pub fn is_acknowledged(&self, sequence: u16) -> bool {
        is_acknowledged_in(self.ack_bits, self.remote_sequence, sequence)
    }

    /// Fold an RTT sample for our packet `sequence`, acknowledged at `now`.
    ///
    /// Each send is sampled at most once. Acks for sends whose ring slot
    /// has since been reused are ignored.
    pub fn update_rtt(&mut self, sequence: u16, now: f64) {
        let slot = Self::slot(sequence);
        match self.sends[slot] {
            SendRecord::InFlight { sequence: sent, sent_at } if sent == sequence => {
                self.rtt = ema(self.rtt, (now - sent_at).max(0.0));
                self.sends[slot] = SendRecord::Acked;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn test_sequence_ordering() {
        assert!(is_sequence_greater(5, 3));
        assert!(!is_sequence_greater(3, 5));
        assert!(!is_sequence_greater(7, 7));
        assert!(is_sequence_greater(1, 65535));
        assert!(!is_sequence_greater(65535, 1));
        assert!(is_sequence_greater(32768, 0));
        assert!(!is_sequence_greater(32769, 0));
    }

    #[test]
    fn test_static_is_acknowledged() {
        assert!(is_acknowledged_in(0, 100, 100));
        assert!(!is_acknowledged_in(u32::MAX, 100, 101));
        assert!(is_acknowledged_in(0b1, 100, 99));
        assert!(!is_acknowledged_in(0b1, 100, 98));
        assert!(is_acknowledged_in(1 << 31, 100, 68));
        // Wraparound: 65535 is one behind 0.
        assert!(is_acknowledged_in(0b1, 0, 65535));
    }

    #[test]
    fn test_acknowledge_newest() {
        let mut conn = ClientConnection::new(test_addr(1), 7, 0.0);
        conn.acknowledge(100);
        assert!(conn.is_acknowledged(100));
        assert_eq!(conn.remote_sequence(), 100);

        conn.acknowledge(101);
        assert_eq!(conn.remote_sequence(), 101);
        assert!(conn.is_acknowledged(100));
        assert!(conn.is_acknowledged(101));

        // Late duplicate of 100 keeps it acknowledged and does not move remote.
        conn.acknowledge(100);
        assert!(conn.is_acknowledged(100));
        assert_eq!(conn.remote_sequence(), 101);

        assert!(!conn.is_acknowledged(99));
        assert!(!conn.is_acknowledged(102));
    }

    #[test]
    fn test_acknowledge_out_of_order() {
        let mut conn = ClientConnection::new(test_addr(1), 7, 0.0);
        conn.acknowledge(10);
        conn.acknowledge(14);
        assert!(!conn.is_acknowledged(13));
        assert!(!conn.is_acknowledged(11));
        conn.acknowledge(12);
        assert!(conn.is_acknowledged(12));
        assert!(conn.is_acknowledged(10));
        assert!(!conn.is_acknowledged(13));
        assert_eq!(conn.ack_bits() & 0xFF, 0b1010);
    }

    #[test]
    fn test_acknowledge_large_jump_clears_window() {
        let mut conn = ClientConnection::new(test_addr(1), 7, 0.0);
        conn.acknowledge(1);
        conn.acknowledge(2);
        conn.acknowledge(40);
        assert_eq!(conn.ack_bits(), 0);
        conn.acknowledge(72);
        // 40 sits exactly at the edge of the window.
        assert_eq!(conn.ack_bits(), 1 << 31);
        assert!(conn.is_acknowledged(40));
        assert!(!conn.is_acknowledged(41));
    }

    #[test]
    fn test_acknowledge_wraparound() {
        let mut conn = ClientConnection::new(test_addr(1), 7, 0.0);
        conn.acknowledge(30000);
        conn.acknowledge(60000);
        conn.acknowledge(65534);
        conn.acknowledge(65535);
        conn.acknowledge(1);
        assert_eq!(conn.remote_sequence(), 1);
        assert!(conn.is_acknowledged(65535));
        assert!(conn.is_acknowledged(65534));
        assert!(!conn.is_acknowledged(0));
    }

    #[test]
    fn test_trust_on_first_use() {
        let mut conn = ClientConnection::new(test_addr(1), 0xAAAA, 0.0);
        assert_eq!(conn.state(), ConnectionState::Pending);

        assert!(conn.authenticate(0x5555, 1.0));
        assert!(conn.is_authenticated());
        assert_eq!(conn.remote_token(), 0x5555);
        assert_eq!(conn.effective_token(), 0xFFFF);
        assert_eq!(conn.last_received(), 1.0);

        assert!(conn.authenticate(0xFFFF, 2.0));
        assert!(!conn.authenticate(0x5555, 3.0));
        assert!(!conn.authenticate(0, 3.0));
        assert_eq!(conn.token_mismatches(), 2);
        assert_eq!(conn.last_received(), 2.0);

        assert!(conn.authenticate(0xFFFF, 4.0));
        assert_eq!(conn.token_mismatches(), 0);
    }

    #[test]
    fn test_handshake_token_shares_mismatch_count() {
        let mut conn = ClientConnection::new(test_addr(1), 0xAAAA, 0.0);
        assert!(conn.authenticate(0x5555, 1.0));

        assert!(!conn.verify_handshake_token(0xFFFF, 2.0));
        assert!(!conn.authenticate(0x5555, 2.0));
        assert_eq!(conn.token_mismatches(), 2);
        assert_eq!(conn.last_received(), 1.0);

        assert!(conn.verify_handshake_token(0x5555, 3.0));
        assert_eq!(conn.token_mismatches(), 0);
        assert_eq!(conn.last_received(), 3.0);
    }

    #[test]
    fn test_sequence_increments_and_wraps() {
        let mut conn = ClientConnection::new(test_addr(1), 7, 0.0);
        assert_eq!(conn.increment_sequence(0.0), 1);
        assert_eq!(conn.increment_sequence(0.0), 2);
        conn.local_sequence = u16::MAX;
        assert_eq!(conn.increment_sequence(0.0), 0);
        assert!(conn.sent_this_tick());
    }

    #[test]
    fn test_rtt_sampled_once() {
        let mut conn = ClientConnection::new(test_addr(1), 7, 0.0);
        let sequence = conn.increment_sequence(10.0);
        conn.update_rtt(sequence, 10.5);
        let expected = INITIAL_RTT * 0.9 + 0.5 * 0.1;
        assert!((conn.rtt() - expected).abs() < 1e-9);

        conn.update_rtt(sequence, 20.0);
        assert!((conn.rtt() - expected).abs() < 1e-9);

        // Never-sent sequences are ignored.
        conn.update_rtt(99, 20.0);
        assert!((conn.rtt() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_late_ack_ignored_after_slot_reuse() {
        let mut conn = ClientConnection::new(test_addr(1), 7, 0.0);
        let old = conn.increment_sequence(0.0);
        let mut newest = old;
        for _ in 0..RTT_BUFFER_SIZE {
            newest = conn.increment_sequence(10.0);
        }
        assert_eq!(ClientConnection::slot(old), ClientConnection::slot(newest));

        // The ack for `old` arrives after its slot went to `newest`.
        conn.update_rtt(old, 10.0);
        assert_eq!(conn.rtt(), INITIAL_RTT);

        // `newest` is still in flight and samples normally.
        conn.update_rtt(newest, 10.5);
        let expected = INITIAL_RTT * 0.9 + 0.5 * 0.1;
        assert!((conn.rtt() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_packet_loss_mixed_acks() {
        let mut conn = ClientConnection::new(test_addr(1), 7, 0.0);
        let sent: Vec<u16> = (0..4).map(|_| conn.increment_sequence(0.0)).collect();
        // Nothing has been out longer than the RTT yet.
        assert_eq!(conn.packet_loss(), 0.0);

        conn.update_rtt(sent[0], 0.05);
        conn.update_rtt(sent[2], 0.05);

        // Two of four settled sends lost.
        conn.increment_sequence(1.0);
        assert!((conn.packet_loss() - 0.05).abs() < 1e-12);

        // The send at 1.0 is lost too: three of five.
        conn.increment_sequence(2.0);
        assert!((conn.packet_loss() - (0.05 * 0.9 + 0.6 * 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_packet_loss_estimate() {
        let mut conn = ClientConnection::new(test_addr(1), 7, 0.0);
        let mut now = 0.0;
        for _ in 0..10 {
            conn.increment_sequence(now);
            now += 1.0;
        }
        // Nothing acked and everything older than the RTT: all lost.
        conn.increment_sequence(now);
        assert!(conn.packet_loss() > 0.0);

        let mut acked = ClientConnection::new(test_addr(2), 7, 0.0);
        let mut now = 0.0;
        for _ in 0..10 {
            let sequence = acked.increment_sequence(now);
            acked.update_rtt(sequence, now + 0.01);
            now += 1.0;
        }
        assert_eq!(acked.packet_loss(), 0.0);
    }
}
