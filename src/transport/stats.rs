//! Traffic counters.

use std::collections::HashMap;

use super::error::DropReason;

/// Cumulative transport statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Datagrams handed to the socket.
    pub packets_sent: u64,
    /// Datagrams accepted past checksum and header validation.
    pub packets_received: u64,
    /// Bits handed to the socket.
    pub bits_sent: u64,
    /// Bits of every datagram read from the socket, dropped ones included.
    pub bits_received: u64,
    /// Reliable packets sent again under a new sequence.
    pub retransmits: u64,
    /// Dropped datagrams by reason.
    pub dropped: HashMap<DropReason, u64>,
}

impl NetworkStats {
    /// Total dropped datagrams.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.values().sum()
    }

    /// Dropped datagrams for one reason.
    pub fn dropped_for(&self, reason: DropReason) -> u64 {
        self.dropped.get(&reason).copied().unwrap_or(0)
    }

    pub(crate) fn record_drop(&mut self, reason: DropReason) {
        *self.dropped.entry(reason).or_default() += 1;
    }
}

/// Bit counters over the current reporting window.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RateWindow {
    started: f64,
    bits_out: u64,
    bits_in: u64,
}

impl RateWindow {
    pub(crate) fn new(now: f64) -> Self {
        Self {
            started: now,
            bits_out: 0,
            bits_in: 0,
        }
    }

    pub(crate) fn add_out(&mut self, bits: u64) {
        self.bits_out += bits;
    }

    pub(crate) fn add_in(&mut self, bits: u64) {
        self.bits_in += bits;
    }

    /// If `interval` has elapsed, return `(out_bps, in_bps)` and restart.
    pub(crate) fn roll(&mut self, now: f64, interval: f64) -> Option<(f64, f64)> {
        let elapsed = now - self.started;
        if elapsed < interval {
            return None;
        }
        let rates = (
            self.bits_out as f64 / elapsed,
            self.bits_in as f64 / elapsed,
        );
        *self = Self::new(now);
        Some(rates)
    }
}
