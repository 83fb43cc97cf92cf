//! Foglet Builder API
//!
//! Provides a builder-style API for consumers (simulations, tests) to supply
//! the base random-peer-sampling layer and get back a running [`Foglet`].

use foglet_core::{
    EventReceiver, FogletConfig, FogletError, FogletResult, LogLevel, Network, PeerId,
};
use std::sync::Arc;
use tracing::info;

use crate::foglet::Foglet;
use crate::logging::init_console_logging;

// ----------------------------------------------------------------------------
// Foglet Builder
// ----------------------------------------------------------------------------

/// Console logging requested for the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleLogging {
    Off,
    /// Level taken from `FogletConfig::log_level`
    FromConfig,
    Level(LogLevel),
}

/// Builder for a Foglet peer
pub struct FogletBuilder {
    peer_id: PeerId,
    config: FogletConfig,
    rps: Option<(Arc<dyn Network>, EventReceiver)>,
    console_logging: ConsoleLogging,
}

impl FogletBuilder {
    /// Create a new builder for the peer `peer_id`
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            config: FogletConfig::default(),
            rps: None,
            console_logging: ConsoleLogging::Off,
        }
    }

    /// Set the Foglet configuration
    pub fn with_config(mut self, config: FogletConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a console subscriber at the configured `log_level`
    pub fn with_logging(mut self) -> Self {
        self.console_logging = ConsoleLogging::FromConfig;
        self
    }

    /// Install a console subscriber at `level`, overriding the configuration
    pub fn with_console_logging(mut self, level: LogLevel) -> Self {
        self.console_logging = ConsoleLogging::Level(level);
        self
    }

    /// Leave the global subscriber alone
    pub fn with_no_logging(mut self) -> Self {
        self.console_logging = ConsoleLogging::Off;
        self
    }

    /// Set the base layer and the event stream it feeds
    pub fn rps<N>(mut self, network: Arc<N>, events: EventReceiver) -> Self
    where
        N: Network + 'static,
    {
        let network: Arc<dyn Network> = network;
        self.rps = Some((network, events));
        self
    }

    /// Validate the configuration and start the dispatch task
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build_and_start(self) -> FogletResult<Foglet> {
        let console_level = self.console_level();
        let (rps, events) = self.rps.ok_or_else(|| {
            FogletError::config_error("a random-peer-sampling network is required")
        })?;
        self.config.validate()?;

        if let Some(level) = console_level {
            init_console_logging(level);
        }

        info!("Building Foglet peer {} on {}", self.peer_id, rps.name());
        Foglet::start(self.peer_id, self.config, rps, events)
    }

    fn console_level(&self) -> Option<LogLevel> {
        match self.console_logging {
            ConsoleLogging::Off => None,
            ConsoleLogging::FromConfig => Some(self.config.log_level),
            ConsoleLogging::Level(level) => Some(level),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
