//! Centralized Configuration Management
//!
//! This module consolidates the configuration structures used by the overlay
//! manager, the broadcast modules, the reliable delivery tracker and the
//! runtime dispatch loop.

use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::{FogletError, Result};

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

/// Log level for console logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

// ----------------------------------------------------------------------------
// Duration Encoding
// ----------------------------------------------------------------------------

/// Serde adapter writing a `Duration` as whole milliseconds
mod duration_millis {
    use core::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ----------------------------------------------------------------------------
// Overlay Configuration
// ----------------------------------------------------------------------------

/// Configuration for the overlay manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// When false, `use()` always resolves to the base RPS layer
    pub enabled: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ----------------------------------------------------------------------------
// Broadcast Configuration
// ----------------------------------------------------------------------------

/// Configuration for broadcast buffering and deduplication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Maximum number of not-yet-deliverable messages held per module
    pub max_pending: usize,
    /// Maximum number of delivered message ids remembered for deduplication
    pub max_delivered_ids: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_pending: 1024,
            max_delivered_ids: 65_536,
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery Configuration
// ----------------------------------------------------------------------------

/// Configuration for reliable re-propagation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum number of retry attempts per neighbour
    pub max_retries: u32,
    /// Initial retry delay
    #[serde(with = "duration_millis")]
    pub initial_retry_delay: Duration,
    /// Maximum retry delay (for exponential backoff)
    #[serde(with = "duration_millis")]
    pub max_retry_delay: Duration,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f32,
    /// Timeout for acknowledgment from a neighbour
    #[serde(with = "duration_millis")]
    pub confirmation_timeout: Duration,
    /// Number of recent messages re-sent to a newly arrived neighbour
    pub retain_recent: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            confirmation_timeout: Duration::from_secs(60),
            retain_recent: 256,
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the data and control channels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Buffer size for network events (transport → dispatch loop)
    pub event_buffer_size: usize,
    /// Buffer size for view notifications (peer view → observers)
    pub control_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 128,
            control_buffer_size: 64,
        }
    }
}

// ----------------------------------------------------------------------------
// Dispatch Configuration
// ----------------------------------------------------------------------------

/// Configuration of the runtime dispatch loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Interval between module ticks (drives retransmission)
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
        }
    }
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of a Foglet peer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FogletConfig {
    pub overlay: OverlayConfig,
    pub broadcast: BroadcastConfig,
    pub delivery: DeliveryConfig,
    pub channels: ChannelConfig,
    pub dispatch: DispatchConfig,
    pub log_level: LogLevel,
}

impl FogletConfig {
    /// Configuration tuned for tests: fast ticks and short retry delays
    pub fn testing() -> Self {
        Self {
            delivery: DeliveryConfig {
                max_retries: 3,
                initial_retry_delay: Duration::from_millis(50),
                max_retry_delay: Duration::from_millis(400),
                backoff_multiplier: 2.0,
                confirmation_timeout: Duration::from_secs(5),
                retain_recent: 64,
            },
            channels: ChannelConfig {
                event_buffer_size: 1024,
                control_buffer_size: 256,
            },
            dispatch: DispatchConfig {
                tick_interval: Duration::from_millis(25),
            },
            log_level: LogLevel::Debug,
            ..Self::default()
        }
    }

    /// Configuration for memory-constrained peers
    pub fn low_memory() -> Self {
        Self {
            broadcast: BroadcastConfig {
                max_pending: 128,
                max_delivered_ids: 4096,
            },
            channels: ChannelConfig {
                event_buffer_size: 32,
                control_buffer_size: 16,
            },
            ..Self::default()
        }
    }

    /// Check the configuration for values that would stall the runtime
    pub fn validate(&self) -> Result<()> {
        if self.channels.event_buffer_size == 0 || self.channels.control_buffer_size == 0 {
            return Err(FogletError::config_error("channel buffer sizes must be non-zero"));
        }
        if self.broadcast.max_pending == 0 {
            return Err(FogletError::config_error("broadcast.max_pending must be non-zero"));
        }
        if self.broadcast.max_delivered_ids == 0 {
            return Err(FogletError::config_error(
                "broadcast.max_delivered_ids must be non-zero",
            ));
        }
        if self.dispatch.tick_interval.is_zero() {
            return Err(FogletError::config_error("dispatch.tick_interval must be non-zero"));
        }
        if self.delivery.backoff_multiplier < 1.0 {
            return Err(FogletError::config_error(
                "delivery.backoff_multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
