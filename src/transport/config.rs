//! Transport configuration.

use crate::core::{
    ConfigError, DEFAULT_MAX_PACKET_SIZE, DEFAULT_POOL_CAPACITY, DEFAULT_PROTOCOL_VERSION,
    DEFAULT_RESEND_TICKS, DEFAULT_STATS_INTERVAL, DEFAULT_TICK_INTERVAL, DEFAULT_TIMEOUT,
    PACKET_MIN_SIZE, PROTOCOL_MAX_PACKET_SIZE, PROTOCOL_VERSION_SIZE,
};

/// Transport configuration. Times are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Folded into every checksum; peers with a different value cannot talk.
    pub protocol_version: [u8; PROTOCOL_VERSION_SIZE],

    /// Largest datagram sent or accepted. CONNECT packets are padded to it.
    pub max_packet_size: usize,

    /// Expected time between `update` calls.
    pub tick_interval: f64,

    /// Age at which an unacknowledged reliable packet is sent again.
    pub resend_interval: f64,

    /// Silence after which a peer is dropped.
    pub timeout: f64,

    /// Period of `on_network_stats` reports.
    pub stats_interval: f64,

    /// Disconnect a peer after this many consecutive token mismatches.
    /// `None` only logs and drops the offending packets.
    pub token_mismatch_limit: Option<u32>,

    /// Idle receive buffers kept for reuse.
    pub pool_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            tick_interval: DEFAULT_TICK_INTERVAL,
            resend_interval: DEFAULT_TICK_INTERVAL * DEFAULT_RESEND_TICKS,
            timeout: DEFAULT_TIMEOUT,
            stats_interval: DEFAULT_STATS_INTERVAL,
            token_mismatch_limit: None,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl TransportConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::new()
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let min = PACKET_MIN_SIZE + 1;
        if !(min..=PROTOCOL_MAX_PACKET_SIZE).contains(&self.max_packet_size) {
            return Err(ConfigError::PacketSize {
                size: self.max_packet_size,
                min,
                max: PROTOCOL_MAX_PACKET_SIZE,
            });
        }

        for (name, value) in [
            ("tick_interval", self.tick_interval),
            ("resend_interval", self.resend_interval),
            ("timeout", self.timeout),
            ("stats_interval", self.stats_interval),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Interval { name, value });
            }
        }
        Ok(())
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Clone)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
    resend_ticks: Option<f64>,
}

impl Default for TransportConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
            resend_ticks: Some(DEFAULT_RESEND_TICKS),
        }
    }

    /// Set the protocol version.
    pub fn protocol_version(mut self, version: [u8; PROTOCOL_VERSION_SIZE]) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// Set the maximum packet size.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.config.max_packet_size = size;
        self
    }

    /// Set the tick interval. Unless [`resend_interval`](Self::resend_interval)
    /// is set explicitly, the resend interval follows it.
    pub fn tick_interval(mut self, seconds: f64) -> Self {
        self.config.tick_interval = seconds;
        self
    }

    /// Set the resend interval directly.
    pub fn resend_interval(mut self, seconds: f64) -> Self {
        self.config.resend_interval = seconds;
        self.resend_ticks = None;
        self
    }

    /// Set the peer timeout.
    pub fn timeout(mut self, seconds: f64) -> Self {
        self.config.timeout = seconds;
        self
    }

    /// Set the statistics interval.
    pub fn stats_interval(mut self, seconds: f64) -> Self {
        self.config.stats_interval = seconds;
        self
    }

    /// Disconnect after `limit` consecutive token mismatches.
    pub fn token_mismatch_limit(mut self, limit: u32) -> Self {
        self.config.token_mismatch_limit = Some(limit.max(1));
        self
    }

    /// Set the number of idle buffers kept for reuse.
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_capacity = capacity;
        self
    }

    /// Validate and return the configuration.
    pub fn build(mut self) -> Result<TransportConfig, ConfigError> {
        if let Some(ticks) = self.resend_ticks {
            self.config.resend_interval = self.config.tick_interval * ticks;
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_packet_size, 1200);
        assert!((config.resend_interval - 0.2).abs() < 1e-12);
        assert_eq!(config.token_mismatch_limit, None);
    }

    #[test]
    fn test_builder() {
        let config = TransportConfig::builder()
            .protocol_version(*b"TEST")
            .max_packet_size(1472)
            .tick_interval(0.01)
            .timeout(3.0)
            .token_mismatch_limit(5)
            .build()
            .unwrap();

        assert_eq!(&config.protocol_version, b"TEST");
        assert_eq!(config.max_packet_size, 1472);
        assert!((config.resend_interval - 0.04).abs() < 1e-12);
        assert_eq!(config.timeout, 3.0);
        assert_eq!(config.token_mismatch_limit, Some(5));
    }

    #[test]
    fn test_explicit_resend_interval_wins() {
        let config = TransportConfig::builder()
            .resend_interval(0.5)
            .tick_interval(0.01)
            .build()
            .unwrap();
        assert_eq!(config.resend_interval, 0.5);
    }

    #[test]
    fn test_rejects_bad_packet_size() {
        assert!(matches!(
            TransportConfig::builder().max_packet_size(1500).build(),
            Err(ConfigError::PacketSize { size: 1500, .. })
        ));
        assert!(matches!(
            TransportConfig::builder().max_packet_size(PACKET_MIN_SIZE).build(),
            Err(ConfigError::PacketSize { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_interval() {
        assert!(matches!(
            TransportConfig::builder().timeout(0.0).build(),
            Err(ConfigError::Interval { name: "timeout", .. })
        ));
        assert!(matches!(
            TransportConfig::builder().stats_interval(f64::NAN).build(),
            Err(ConfigError::Interval { name: "stats_interval", .. })
        ));
    }
}
