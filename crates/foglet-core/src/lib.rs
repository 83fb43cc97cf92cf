//! Foglet Core
//!
//! Protocol logic for a peer-to-peer overlay messaging stack. Given a
//! random-peer-sampling service providing direct links, this crate layers
//! topology-shaping overlays on top of it and provides unicast and ordered
//! broadcast (FIFO, causal, reliable) over whichever layer is active.
//!
//! The crate never touches a socket: transports plug in through
//! [`transport::Network`] and feed [`transport::NetworkEvent`]s to the runtime.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod answer;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod modules;
pub mod overlay;
pub mod transport;
pub mod types;
pub mod view;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use answer::{Answer, AnswerId, AnswerQueue, PendingAnswer, Stamped};
pub use clock::{ScalarClock, Stamp, VectorTime, VersionVector};
pub use config::{
    BroadcastConfig, ChannelConfig, DeliveryConfig, DispatchConfig, FogletConfig, LogLevel,
    OverlayConfig,
};
pub use delivery::{DeliveryStats, DeliveryStatus, DeliveryTracker};
pub use errors::{FogletError, FogletResult, HandlerError, HandlerResult, Result, TransportError};
pub use modules::broadcast::{
    Broadcast, BroadcastStats, CausalBroadcast, FifoBroadcast, ReliableBroadcast,
};
pub use modules::unicast::{Unicast, UNICAST_PROTOCOL};
pub use modules::{Handler, HandlerId, Module, ModuleContext};
pub use overlay::{
    LayerRecord, NetworkHandle, OverlayBuilder, OverlayContext, OverlayManager, SharedView,
    BASE_LAYER_ID,
};
pub use transport::{
    create_event_channel, Envelope, EventReceiver, EventSender, Neighbours, Network, NetworkEvent,
};
pub use types::{MessageId, PeerId, SystemTimeSource, TimeSource, Timestamp};
pub use view::{Binding, PeerView, ViewEvent};
