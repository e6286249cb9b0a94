//! In-memory collaborators for flow integration tests
//!
//! - `MockTransport`: records publishes, unpublishes and reliable sends,
//!   injects room events, optionally holds `connect` until released
//! - `MockTrack`: media track that remembers enable/stop calls
//! - `MockDevices`: scripted device availability and capture errors
//! - `MockOutputSink` / `MockPlaybackHost`: observable playback sinks

// Each test binary uses a different subset of these helpers
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

use waav_flow::flow::media::{
    CaptureOptions, DeviceError, MediaDevices, MediaError, MediaStream, MediaTrack, OutputSink,
    PlaybackHost,
};
use waav_flow::flow::transport::{
    ParticipantInfo, PublishOptions, PublishedTrack, TrackPublicationInfo, Transport,
    TransportError, TransportEvent, TransportResult,
};
use waav_flow::flow::types::{TrackKind, TrackSource};

// =============================================================================
// Transport
// =============================================================================

#[derive(Default)]
pub struct MockTransport {
    metadata: Mutex<Option<String>>,
    gates: Vec<Arc<Notify>>,
    sender: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    pub fail_connect: AtomicBool,
    pub fail_publish: AtomicBool,
    pub fail_unpublish: AtomicBool,
    pub fail_send: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    next_sid: AtomicU64,
    published: Mutex<Vec<(PublishedTrack, PublishOptions)>>,
    unpublished: Mutex<Vec<String>>,
    sent: Mutex<Vec<(Bytes, Option<String>)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_metadata(metadata: impl Into<String>) -> Arc<Self> {
        let transport = Self::default();
        *transport.metadata.lock() = Some(metadata.into());
        Arc::new(transport)
    }

    /// `connect` blocks until the returned notify is signalled
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let (transport, mut gates) = Self::gated_calls(1);
        (transport, gates.remove(0))
    }

    /// The n-th `connect` call blocks on the n-th notify; later calls pass
    pub fn gated_calls(count: usize) -> (Arc<Self>, Vec<Arc<Notify>>) {
        let gates: Vec<_> = (0..count).map(|_| Arc::new(Notify::new())).collect();
        let transport = Self {
            gates: gates.clone(),
            ..Default::default()
        };
        (Arc::new(transport), gates)
    }

    pub fn failing_connect() -> Arc<Self> {
        let transport = Self::default();
        transport.fail_connect.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// Push a room event into the engine's event loop
    pub fn emit(&self, event: TransportEvent) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(event);
        }
    }

    pub fn emit_data(&self, message: &Value) {
        self.emit(TransportEvent::DataReceived {
            payload: Bytes::from(message.to_string()),
            participant: Some(ParticipantInfo::agent("agent-backend")),
            reliable: true,
            topic: None,
        });
    }

    /// Same as `emit_data` but on the lossy channel
    pub fn emit_lossy_data(&self, message: &Value) {
        self.emit(TransportEvent::DataReceived {
            payload: Bytes::from(message.to_string()),
            participant: Some(ParticipantInfo::agent("agent-backend")),
            reliable: false,
            topic: None,
        });
    }

    pub fn published(&self) -> Vec<(PublishedTrack, PublishOptions)> {
        self.published.lock().clone()
    }

    pub fn unpublished(&self) -> Vec<String> {
        self.unpublished.lock().clone()
    }

    /// Reliable messages sent so far, decoded as JSON
    pub fn sent_messages(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|(bytes, _)| serde_json::from_slice(bytes).unwrap())
            .collect()
    }

    pub fn sent_topics(&self) -> Vec<Option<String>> {
        self.sent.lock().iter().map(|(_, topic)| topic.clone()).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        _url: &str,
        _token: &str,
    ) -> TransportResult<mpsc::UnboundedReceiver<TransportEvent>> {
        let call = self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gates.get(call) {
            gate.notified().await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("room refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock() = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().take();
        Ok(())
    }

    fn room_metadata(&self) -> Option<String> {
        self.metadata.lock().clone()
    }

    async fn publish_track(
        &self,
        _track: Arc<dyn MediaTrack>,
        options: PublishOptions,
    ) -> TransportResult<PublishedTrack> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed("publish rejected".to_string()));
        }
        let published = PublishedTrack {
            sid: format!("TR_{}", self.next_sid.fetch_add(1, Ordering::SeqCst)),
            name: options.name.clone(),
        };
        self.published
            .lock()
            .push((published.clone(), options));
        Ok(published)
    }

    async fn unpublish_track(&self, sid: &str) -> TransportResult<()> {
        self.unpublished.lock().push(sid.to_string());
        if self.fail_unpublish.load(Ordering::SeqCst) {
            return Err(TransportError::Internal("unpublish rejected".to_string()));
        }
        Ok(())
    }

    async fn send_reliable(&self, payload: Bytes, topic: Option<&str>) -> TransportResult<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("channel closed".to_string()));
        }
        self.sent.lock().push((payload, topic.map(str::to_string)));
        Ok(())
    }
}

// =============================================================================
// Tracks
// =============================================================================

#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl MockTrack {
    pub fn new(id: &str, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn audio(id: &str) -> Arc<Self> {
        Self::new(id, TrackKind::Audio)
    }

    pub fn video(id: &str) -> Arc<Self> {
        Self::new(id, TrackKind::Video)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
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
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn stream_of(track: &Arc<MockTrack>) -> MediaStream {
    MediaStream::from_track(Arc::clone(track) as Arc<dyn MediaTrack>)
}

pub fn track_subscribed(track: &Arc<MockTrack>, identity: &str) -> TransportEvent {
    TransportEvent::TrackSubscribed {
        track: Arc::clone(track) as Arc<dyn MediaTrack>,
        publication: publication_for(track, TrackSource::Unknown),
        participant: ParticipantInfo::new(identity),
    }
}

pub fn track_unsubscribed(track: &Arc<MockTrack>, identity: &str) -> TransportEvent {
    TransportEvent::TrackUnsubscribed {
        track: Arc::clone(track) as Arc<dyn MediaTrack>,
        publication: publication_for(track, TrackSource::Unknown),
        participant: ParticipantInfo::new(identity),
    }
}

pub fn publication_for(track: &Arc<MockTrack>, source: TrackSource) -> TrackPublicationInfo {
    TrackPublicationInfo {
        sid: format!("PUB_{}", track.id()),
        name: track.id(),
        kind: track.kind(),
        source,
    }
}

// =============================================================================
// Devices
// =============================================================================

#[derive(Default)]
pub struct MockDevices {
    pub missing: AtomicBool,
    pub probe_error: Mutex<Option<DeviceError>>,
    pub capture_error: Mutex<Option<DeviceError>>,
    pub captured: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockDevices {
    pub fn available() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn missing() -> Arc<Self> {
        let devices = Self::default();
        devices.missing.store(true, Ordering::SeqCst);
        Arc::new(devices)
    }

    pub fn failing_capture(error: DeviceError) -> Arc<Self> {
        let devices = Self::default();
        *devices.capture_error.lock() = Some(error);
        Arc::new(devices)
    }

    pub fn failing_probe(error: DeviceError) -> Arc<Self> {
        let devices = Self::default();
        *devices.probe_error.lock() = Some(error);
        Arc::new(devices)
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn has_device(&self, _kind: TrackKind) -> Result<bool, DeviceError> {
        if let Some(error) = self.probe_error.lock().clone() {
            return Err(error);
        }
        Ok(!self.missing.load(Ordering::SeqCst))
    }

    async fn capture(
        &self,
        kind: TrackKind,
        _options: &CaptureOptions,
    ) -> Result<Arc<dyn MediaTrack>, DeviceError> {
        if let Some(error) = self.capture_error.lock().clone() {
            return Err(error);
        }
        let track = MockTrack::new(&format!("capture-{kind}"), kind);
        self.captured.lock().push(Arc::clone(&track));
        Ok(track as Arc<dyn MediaTrack>)
    }
}

// =============================================================================
// Playback
// =============================================================================

#[derive(Default)]
pub struct MockOutputSink {
    pub attached: Mutex<Option<String>>,
    pub attach_calls: AtomicUsize,
    pub detach_calls: AtomicUsize,
}

impl MockOutputSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attached_stream(&self) -> Option<String> {
        self.attached.lock().clone()
    }
}

impl OutputSink for MockOutputSink {
    fn attach(&self, stream: &MediaStream) -> Result<(), MediaError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        *self.attached.lock() = Some(stream.id().to_string());
        Ok(())
    }

    fn detach(&self) {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);
        self.attached.lock().take();
    }
}

#[derive(Default)]
pub struct MockPlaybackHost {
    pub created: Mutex<Vec<(String, Arc<MockOutputSink>)>>,
    pub destroyed: AtomicUsize,
}

impl MockPlaybackHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_sink(&self) -> Option<Arc<MockOutputSink>> {
        self.created.lock().last().map(|(_, sink)| Arc::clone(sink))
    }
}

impl PlaybackHost for MockPlaybackHost {
    fn create_sink(&self, label: &str) -> Result<Arc<dyn OutputSink>, MediaError> {
        let sink = MockOutputSink::new();
        self.created
            .lock()
            .push((label.to_string(), Arc::clone(&sink)));
        Ok(sink as Arc<dyn OutputSink>)
    }

    fn destroy_sink(&self, _sink: &Arc<dyn OutputSink>) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll until `condition` holds or a second passes
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
