//! Foglet Runtime
//!
//! This crate runs Foglet peers on top of `foglet-core`:
//! - [`Foglet`]: one peer, owning its overlay chain, peer view and modules
//! - [`FogletBuilder`]: configures and starts a peer on a base RPS layer
//! - [`ModuleRegistry`]: name-keyed module table used for envelope routing
//! - [`DispatchTask`]: the per-peer task draining network events
//!
//! `foglet-core` holds the protocol logic and stable types; this crate only
//! wires them to a tokio runtime.

mod builder;
mod foglet;
mod logging;
mod registry;
mod tasks;

pub use builder::FogletBuilder;
pub use foglet::Foglet;
pub use logging::init_console_logging;
pub use registry::ModuleRegistry;
pub use tasks::DispatchTask;

// Re-export core types for convenience
pub use foglet_core::{
    Answer, AnswerId, Binding, CausalBroadcast, FifoBroadcast, FogletConfig, FogletError,
    FogletResult, HandlerId, LogLevel, Module, ModuleContext, PeerId, ReliableBroadcast, Unicast,
    ViewEvent,
};
