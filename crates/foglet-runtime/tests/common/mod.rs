//! Shared fixtures for runtime integration tests

#![allow(dead_code)]

use foglet_core::PeerId;
use foglet_harness::{MockNetwork, MockNetworkConfig};
use foglet_runtime::{Foglet, FogletBuilder, FogletConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Received `(origin, payload)` pairs, in delivery order
pub type Log = Arc<Mutex<Vec<(PeerId, Vec<u8>)>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn eventually<F>(limit: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Peers sharing one mock network
pub struct Cluster {
    pub network: MockNetwork,
    pub peers: Vec<Foglet>,
}

impl Cluster {
    /// Start one peer per name; no links yet
    pub async fn start(names: &[&str], config: MockNetworkConfig) -> anyhow::Result<Self> {
        let network = MockNetwork::new(config);
        let mut cluster = Self {
            network,
            peers: Vec::new(),
        };
        for name in names {
            cluster.add_peer(name).await?;
        }
        Ok(cluster)
    }

    pub async fn add_peer(&mut self, name: &str) -> anyhow::Result<usize> {
        let id = PeerId::new(name);
        let (rps, events) = self.network.join(id.clone())?;
        let foglet = FogletBuilder::new(id)
            .with_config(FogletConfig::testing())
            .with_no_logging()
            .rps(rps, events)
            .build_and_start()
            .await?;
        self.peers.push(foglet);
        Ok(self.peers.len() - 1)
    }

    pub fn id(&self, index: usize) -> PeerId {
        self.peers[index].id().clone()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(|peer| peer.id().clone()).collect()
    }

    /// Link two peers and wait until both views hold the other
    pub async fn link(&self, a: usize, b: usize) -> anyhow::Result<()> {
        self.network.link(&self.id(a), &self.id(b)).await?;
        let (id_a, id_b) = (self.id(a), self.id(b));
        let linked = eventually(Duration::from_secs(2), || {
            self.peers[a].view().lock().contains(&id_b)
                && self.peers[b].view().lock().contains(&id_a)
        })
        .await;
        anyhow::ensure!(linked, "{} and {} never saw each other", id_a, id_b);
        Ok(())
    }

    /// Link every pair of peers
    pub async fn full_mesh(&self) -> anyhow::Result<()> {
        for a in 0..self.peers.len() {
            for b in a + 1..self.peers.len() {
                self.link(a, b).await?;
            }
        }
        Ok(())
    }

    pub async fn shutdown(self) {
        for peer in &self.peers {
            peer.shutdown().await;
        }
    }
}
