//! Foglet Harness - In-Memory Network Simulation
//!
//! Stands in for a real random-peer-sampling service when exercising Foglet
//! peers in tests and simulations:
//!
//! - **MockNetwork**: shared hub that peers join to obtain their base layer
//! - **MockRps**: per-peer [`foglet_core::Network`] with symmetric links
//! - **Network models**: ideal, jittery and lossy link behaviour
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use foglet_harness::MockNetwork;
//! use foglet_core::PeerId;
//!
//! let network = MockNetwork::jittery();
//! let (rps_a, events_a) = network.join(PeerId::new("a"))?;
//! let (rps_b, events_b) = network.join(PeerId::new("b"))?;
//! network.link(rps_a.local(), rps_b.local()).await?;
//! ```

mod config;
mod network;

pub use config::MockNetworkConfig;
pub use network::{MockNetwork, MockNetworkStats, MockRps};
