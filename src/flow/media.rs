//! Media handles and host-supplied media capabilities
//!
//! The flow layer never touches devices or playback directly. Hosts inject:
//! - [`MediaDevices`] for microphone/camera capture
//! - [`PlaybackHost`] to create hidden playback sinks on demand
//! - [`OutputSink`] implementations bound to individual pads

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::types::TrackKind;

/// A single media track handle (local capture or remote subscription)
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    fn is_enabled(&self) -> bool;

    /// Enable or disable the track at its source without unpublishing it
    fn set_enabled(&self, enabled: bool);

    /// Stop the track and release the underlying capture or subscription
    fn stop(&self);

    /// Access to the concrete track type for transport adapters
    fn as_any(&self) -> &dyn Any;
}

/// A set of tracks delivered or published together
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    /// Wrap a single track as a stream
    pub fn from_track(track: Arc<dyn MediaTrack>) -> Self {
        Self::new(vec![track])
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn first_track(&self, kind: TrackKind) -> Option<Arc<dyn MediaTrack>> {
        self.tracks_of(kind).next().cloned()
    }

    pub fn contains_track(&self, track_id: &str) -> bool {
        self.tracks.iter().any(|t| t.id() == track_id)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

// =============================================================================
// Playback
// =============================================================================

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Playback sink error: {0}")]
    Playback(String),
}

/// Something a stream can be rendered into (speaker, video surface, recorder)
pub trait OutputSink: Send + Sync {
    fn attach(&self, stream: &MediaStream) -> Result<(), MediaError>;

    fn detach(&self);
}

/// Creates and destroys hidden playback sinks for pads that need one
pub trait PlaybackHost: Send + Sync {
    fn create_sink(&self, label: &str) -> Result<Arc<dyn OutputSink>, MediaError>;

    fn destroy_sink(&self, sink: &Arc<dyn OutputSink>);
}

// =============================================================================
// Devices
// =============================================================================

/// Errors reported by the host's device layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("device busy")]
    Busy,
    #[error("{0}")]
    Other(String),
}

/// Capture constraints passed through to the host
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub device_id: Option<String>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Whether at least one capture device of this kind exists
    async fn has_device(&self, kind: TrackKind) -> Result<bool, DeviceError>;

    /// Open a capture track, prompting for permission if needed
    async fn capture(
        &self,
        kind: TrackKind,
        options: &CaptureOptions,
    ) -> Result<Arc<dyn MediaTrack>, DeviceError>;
}

/// Host capabilities shared by every pad an engine creates
#[derive(Clone, Default)]
pub struct MediaEnvironment {
    pub devices: Option<Arc<dyn MediaDevices>>,
    pub playback: Option<Arc<dyn PlaybackHost>>,
}

impl MediaEnvironment {
    pub fn with_devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn with_playback(mut self, playback: Arc<dyn PlaybackHost>) -> Self {
        self.playback = Some(playback);
        self
    }
}

impl fmt::Debug for MediaEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaEnvironment")
            .field("devices", &self.devices.is_some())
            .field("playback", &self.playback.is_some())
            .finish()
    }
}
