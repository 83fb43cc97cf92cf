//! Mock network configuration
//!
//! Link behaviour is drawn per envelope: every copy gets its own latency, so
//! two envelopes sent back to back over the same link may arrive in either
//! order once jitter is non-zero.

use std::time::Duration;

/// Configuration for mock network behavior
#[derive(Debug, Clone)]
pub struct MockNetworkConfig {
    /// Simulated latency range (min, max) in milliseconds
    pub latency_range: (u64, u64),
    /// Jitter factor for latency variance (0.0 = no jitter, 1.0 = high jitter)
    pub jitter_factor: f64,
    /// Envelope loss rate (0.0 = no loss, 1.0 = all envelopes lost)
    pub packet_loss_rate: f64,
    /// Probability of envelope duplication (0.0 = never, 1.0 = always)
    pub duplication_rate: f64,
    /// Capacity of each peer's event channel
    pub event_buffer_size: usize,
}

impl Default for MockNetworkConfig {
    fn default() -> Self {
        Self {
            latency_range: (5, 20),
            jitter_factor: 0.1,
            packet_loss_rate: 0.0,
            duplication_rate: 0.0,
            event_buffer_size: 1024,
        }
    }
}

impl MockNetworkConfig {
    /// Immediate, in-order, lossless links
    pub fn ideal() -> Self {
        Self {
            latency_range: (0, 0),
            jitter_factor: 0.0,
            ..Self::default()
        }
    }

    /// Widely varying latency so envelopes overtake each other
    pub fn jittery() -> Self {
        Self {
            latency_range: (1, 40),
            jitter_factor: 0.8,
            duplication_rate: 0.05,
            ..Self::default()
        }
    }

    /// Drops and duplicates envelopes on top of jitter
    pub fn lossy() -> Self {
        Self {
            latency_range: (5, 60),
            jitter_factor: 0.3,
            packet_loss_rate: 0.1,
            duplication_rate: 0.05,
            ..Self::default()
        }
    }

    /// Draw the latency of one envelope copy
    pub fn sample_latency(&self) -> Duration {
        let (min, max) = self.latency_range;
        let base = fastrand::u64(min..=max.max(min));

        let millis = if self.jitter_factor > 0.0 {
            let jitter_amount = (base as f64 * self.jitter_factor) as u64;
            let jitter = fastrand::u64(0..=jitter_amount * 2);
            base.saturating_add(jitter).saturating_sub(jitter_amount)
        } else {
            base
        };
        Duration::from_millis(millis)
    }

    pub fn should_drop(&self) -> bool {
        self.packet_loss_rate > 0.0 && fastrand::f64() < self.packet_loss_rate
    }

    pub fn should_duplicate(&self) -> bool {
        self.duplication_rate > 0.0 && fastrand::f64() < self.duplication_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ideal_has_no_latency() {
        let config = MockNetworkConfig::ideal();
        for _ in 0..32 {
            assert_eq!(config.sample_latency(), Duration::ZERO);
        }
        assert!(!config.should_drop());
        assert!(!config.should_duplicate());
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = MockNetworkConfig {
            latency_range: (10, 20),
            jitter_factor: 0.5,
            ..MockNetworkConfig::default()
        };
        for _ in 0..256 {
            let latency = config.sample_latency().as_millis() as u64;
            assert!((5..=30).contains(&latency), "latency {latency} out of range");
        }
    }

    #[test]
    fn test_presets() {
        assert_eq!(MockNetworkConfig::lossy().packet_loss_rate, 0.1);
        assert_eq!(MockNetworkConfig::jittery().latency_range, (1, 40));
        assert_eq!(MockNetworkConfig::default().event_buffer_size, 1024);
    }
}
