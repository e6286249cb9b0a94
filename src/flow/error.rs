//! Flow error types
//!
//! Only protocol violations, precondition failures and transport failures
//! surface to callers. Malformed inbound data and cleanup failures are
//! logged where they happen and never reach this type.

use thiserror::Error;

use super::transport::TransportError;
use super::types::{PadDataType, TrackKind};

/// Result type for flow operations
pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Error, Debug)]
pub enum FlowError {
    // ─────────────────────────────────────────────────────────────────────────────
    // Protocol Violations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Operation invoked against the pad's direction/type contract
    #[error("Pad '{pad_id}' rejected operation: {reason}")]
    ProtocolViolation { pad_id: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────────
    // Precondition Failures
    // ─────────────────────────────────────────────────────────────────────────────

    /// Pad has no transport attached
    #[error("Pad '{0}' is not attached to a transport")]
    TransportNotAttached(String),

    /// Stream carries tracks, but none of the pad's kind
    #[error("Stream track kind mismatch: expected {expected}, got {actual}")]
    TrackKindMismatch {
        expected: PadDataType,
        actual: TrackKind,
    },

    /// Stream carries no track at all
    #[error("Stream for pad '{0}' has no {1} track")]
    EmptyStream(String, PadDataType),

    #[error("{0}")]
    DeviceNotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    DeviceBusy(String),

    /// No device access was provided to the engine, or the device failed
    #[error("Media device unavailable: {0}")]
    DeviceUnavailable(String),

    // ─────────────────────────────────────────────────────────────────────────────
    // Transport Failures
    // ─────────────────────────────────────────────────────────────────────────────

    #[error("Already connected or connecting")]
    AlreadyConnected,

    #[error("Connection timed out after {0} ms")]
    ConnectTimeout(u64),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // ─────────────────────────────────────────────────────────────────────────────
    // Data / Registry Errors
    // ─────────────────────────────────────────────────────────────────────────────

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Node '{node_id}' already has a pad with id '{pad_id}'")]
    DuplicatePad { node_id: String, pad_id: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlowError {
    pub fn protocol(pad_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            pad_id: pad_id.into(),
            reason: reason.into(),
        }
    }

    /// Operation was invoked against the direction/type contract
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }

    /// Missing attachment, device, permission or matching track
    pub fn is_precondition_failure(&self) -> bool {
        matches!(
            self,
            Self::TransportNotAttached(_)
                | Self::TrackKindMismatch { .. }
                | Self::EmptyStream(..)
                | Self::DeviceNotFound(_)
                | Self::PermissionDenied(_)
                | Self::DeviceBusy(_)
                | Self::DeviceUnavailable(_)
        )
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ConnectTimeout(_) | Self::AlreadyConnected
        )
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
