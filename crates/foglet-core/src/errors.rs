//! Error types for the Foglet stack
//!
//! This module contains the error taxonomy shared by the overlay manager, the
//! peer view, the logical clocks and the messaging modules, plus the transport
//! errors surfaced by network layers.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised by a network layer when sending or managing links
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Peer not found: {peer_id}")]
    PeerNotFound { peer_id: String },
    #[error("Connection failed to peer {peer_id}: {reason}")]
    ConnectionFailed { peer_id: String, reason: String },
    #[error("Send to peer {peer_id} failed: {reason}")]
    SendFailed { peer_id: String, reason: String },
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Foglet stack
#[derive(Debug, thiserror::Error)]
pub enum FogletError {
    /// Missing or invalid configuration, fatal at construction time
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// A peer already holds a physical binding
    #[error("Peer {peer_id} is already connected")]
    AlreadyConnected { peer_id: String },

    /// Operation on an unknown peer, layer or module
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Removal of a binding the peer does not hold
    #[error("Peer {peer_id} does not own binding {binding}")]
    NotOwned { peer_id: String, binding: String },

    /// Malformed clock or vector input
    #[error("Structure error: {reason}")]
    Structure { reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Channel communication error between the dispatch task and its owner
    #[error("Channel error: {message}")]
    Channel { message: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl FogletError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        FogletError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a not-found error for the given kind of entity
    pub fn not_found<T: Into<String>>(kind: &'static str, id: T) -> Self {
        FogletError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a structure error with a reason
    pub fn structure<T: Into<String>>(reason: T) -> Self {
        FogletError::Structure {
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        FogletError::Channel {
            message: message.into(),
        }
    }

    /// Create a transport peer-not-found error
    pub fn peer_not_found<P: Into<String>>(peer_id: P) -> Self {
        FogletError::Transport(TransportError::PeerNotFound {
            peer_id: peer_id.into(),
        })
    }

    /// Whether this error was produced by the transport layer
    pub fn is_transport(&self) -> bool {
        matches!(self, FogletError::Transport(_))
    }
}

// ----------------------------------------------------------------------------
// Handler Errors
// ----------------------------------------------------------------------------

/// Error type returned by application callbacks
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by application callbacks
pub type HandlerResult = core::result::Result<(), HandlerError>;

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, FogletError>;
pub type FogletResult<T> = Result<T>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
