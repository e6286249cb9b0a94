//! Real-time transport seam
//!
//! The engine consumes the room transport as an opaque capability:
//! connect/disconnect, publish/unpublish local tracks, reliable data, room
//! metadata, and a stream of room events. Connection negotiation, codecs and
//! reconnection stay inside the implementation.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::media::MediaTrack;
use super::types::{TrackKind, TrackSource};

/// Errors that can occur in the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Track publish failed: {0}")]
    PublishFailed(String),

    #[error("Data send failed: {0}")]
    SendFailed(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal transport error: {0}")]
    Internal(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Remote participant as seen by the routing protocol
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantInfo {
    pub identity: String,
    pub name: String,
    /// Participant is an agent/worker rather than a human client
    pub is_agent: bool,
}

impl ParticipantInfo {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Default::default()
        }
    }

    pub fn agent(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            is_agent: true,
            ..Default::default()
        }
    }
}

/// Remote track publication metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackPublicationInfo {
    pub sid: String,
    pub name: String,
    pub kind: TrackKind,
    pub source: TrackSource,
}

/// Options for publishing a local track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// Deterministic track name used to recover pad identity remotely
    pub name: String,
    pub source: TrackSource,
}

/// Handle to a track registered with the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedTrack {
    pub sid: String,
    pub name: String,
}

/// Events emitted by a connected transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    TrackSubscribed {
        track: Arc<dyn MediaTrack>,
        publication: TrackPublicationInfo,
        participant: ParticipantInfo,
    },
    TrackUnsubscribed {
        track: Arc<dyn MediaTrack>,
        publication: TrackPublicationInfo,
        participant: ParticipantInfo,
    },
    DataReceived {
        payload: Bytes,
        participant: Option<ParticipantInfo>,
        reliable: bool,
        topic: Option<String>,
    },
    ParticipantConnected(ParticipantInfo),
    ParticipantDisconnected(ParticipantInfo),
    RoomMetadataChanged(String),
}

/// Real-time media transport consumed by the engine
#[async_trait]
pub trait Transport: Send + Sync {
    /// Join the room. Returns the receiver for subsequent room events.
    async fn connect(
        &self,
        url: &str,
        token: &str,
    ) -> TransportResult<mpsc::UnboundedReceiver<TransportEvent>>;

    async fn disconnect(&self) -> TransportResult<()>;

    /// Room metadata, available once connected
    fn room_metadata(&self) -> Option<String>;

    async fn publish_track(
        &self,
        track: Arc<dyn MediaTrack>,
        options: PublishOptions,
    ) -> TransportResult<PublishedTrack>;

    async fn unpublish_track(&self, sid: &str) -> TransportResult<()>;

    /// Send on the default reliable data channel
    async fn send_reliable(&self, payload: Bytes, topic: Option<&str>) -> TransportResult<()>;
}
