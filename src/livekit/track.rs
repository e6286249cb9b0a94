//! LiveKit track wrapper
//!
//! [`LiveKitTrack`] adapts LiveKit's remote tracks and local capture sources
//! to the [`MediaTrack`] trait. [`extract_native_track`] is the only place
//! that recovers the LiveKit shape from a trait object.

use livekit::prelude::{
    LocalAudioTrack, LocalTrack, LocalVideoTrack, RemoteTrack, TrackKind as LkTrackKind,
    TrackSource as LkTrackSource,
};
use livekit::webrtc::audio_source::RtcAudioSource;
use livekit::webrtc::video_source::RtcVideoSource;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::flow::media::MediaTrack;
use crate::flow::transport::{TransportError, TransportResult};
use crate::flow::types::{TrackKind, TrackSource};

/// Underlying LiveKit handle
#[derive(Clone)]
pub enum NativeTrack {
    /// Subscribed track from a remote participant
    Remote(RemoteTrack),
    /// Local audio capture, turned into a named track at publish time
    AudioSource(RtcAudioSource),
    /// Local video capture, turned into a named track at publish time
    VideoSource(RtcVideoSource),
}

pub struct LiveKitTrack {
    id: String,
    kind: TrackKind,
    native: NativeTrack,
    enabled: AtomicBool,
    /// Published handle of a local source, so mute and stop reach the room
    local: Mutex<Option<LocalTrack>>,
}

impl LiveKitTrack {
    pub fn from_remote(track: RemoteTrack) -> Self {
        let kind = from_livekit_kind(track.kind());
        Self {
            id: track.sid().to_string(),
            kind,
            native: NativeTrack::Remote(track),
            enabled: AtomicBool::new(true),
            local: Mutex::new(None),
        }
    }

    pub fn from_audio_source(source: RtcAudioSource) -> Self {
        Self::local(TrackKind::Audio, NativeTrack::AudioSource(source))
    }

    pub fn from_video_source(source: RtcVideoSource) -> Self {
        Self::local(TrackKind::Video, NativeTrack::VideoSource(source))
    }

    fn local(kind: TrackKind, native: NativeTrack) -> Self {
        Self {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            kind,
            native,
            enabled: AtomicBool::new(true),
            local: Mutex::new(None),
        }
    }

    pub fn native(&self) -> &NativeTrack {
        &self.native
    }

    /// Create the named local track LiveKit publishes. The handle is kept
    /// so later enable, disable and stop calls apply to the published track.
    pub fn to_local_track(&self, name: &str) -> TransportResult<LocalTrack> {
        let track = match &self.native {
            NativeTrack::AudioSource(source) => {
                LocalTrack::Audio(LocalAudioTrack::create_audio_track(name, source.clone()))
            }
            NativeTrack::VideoSource(source) => {
                LocalTrack::Video(LocalVideoTrack::create_video_track(name, source.clone()))
            }
            NativeTrack::Remote(_) => {
                return Err(TransportError::Unsupported(
                    "remote tracks cannot be republished".to_string(),
                ));
            }
        };

        let mut local = self.local.lock();
        if !self.enabled.load(Ordering::SeqCst) {
            set_local_enabled(&track, false);
        }
        *local = Some(track.clone());
        Ok(track)
    }
}

fn set_local_enabled(track: &LocalTrack, enabled: bool) {
    match (track, enabled) {
        (LocalTrack::Audio(t), true) => t.enable(),
        (LocalTrack::Audio(t), false) => t.disable(),
        (LocalTrack::Video(t), true) => t.enable(),
        (LocalTrack::Video(t), false) => t.disable(),
    }
}

impl MediaTrack for LiveKitTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        let local = self.local.lock();
        self.enabled.store(enabled, Ordering::SeqCst);
        match &self.native {
            NativeTrack::Remote(track) => match (track, enabled) {
                (RemoteTrack::Audio(t), true) => t.enable(),
                (RemoteTrack::Audio(t), false) => t.disable(),
                (RemoteTrack::Video(t), true) => t.enable(),
                (RemoteTrack::Video(t), false) => t.disable(),
            },
            NativeTrack::AudioSource(_) | NativeTrack::VideoSource(_) => {
                if let Some(track) = local.as_ref() {
                    set_local_enabled(track, enabled);
                }
            }
        }
    }

    fn stop(&self) {
        self.set_enabled(false);
        // stopped tracks are never re-enabled
        self.local.lock().take();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for LiveKitTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let native = match &self.native {
            NativeTrack::Remote(_) => "remote",
            NativeTrack::AudioSource(_) => "audio-source",
            NativeTrack::VideoSource(_) => "video-source",
        };
        f.debug_struct("LiveKitTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("native", &native)
            .finish()
    }
}

/// Recover the LiveKit handle behind a track trait object
pub fn extract_native_track(track: &Arc<dyn MediaTrack>) -> TransportResult<&LiveKitTrack> {
    track
        .as_any()
        .downcast_ref::<LiveKitTrack>()
        .ok_or_else(|| TransportError::Unsupported("unsupported track shape".to_string()))
}

pub(crate) fn to_livekit_source(source: TrackSource) -> LkTrackSource {
    match source {
        TrackSource::Microphone => LkTrackSource::Microphone,
        TrackSource::Camera => LkTrackSource::Camera,
        TrackSource::Unknown => LkTrackSource::Unknown,
    }
}

pub(crate) fn from_livekit_source(source: LkTrackSource) -> TrackSource {
    match source {
        LkTrackSource::Microphone => TrackSource::Microphone,
        LkTrackSource::Camera => TrackSource::Camera,
        _ => TrackSource::Unknown,
    }
}

pub(crate) fn from_livekit_kind(kind: LkTrackKind) -> TrackKind {
    match kind {
        LkTrackKind::Audio => TrackKind::Audio,
        LkTrackKind::Video => TrackKind::Video,
    }
}
