//! Pads: typed, directional endpoints on a node
//!
//! A pad's identity, direction and data type are fixed at construction.
//! Only runtime state mutates: the current stream, publish/subscribe flags,
//! the enable flag, a property value and the bound output sink.
//!
//! # State machine
//!
//! ```text
//!            publish / capture(true)              set_stream(Some) / inbound data
//!   publishing <───────────────────── idle ─────────────────────────────> subscribed
//!              ─────────────────────>      <─────────────────────────────
//!            unpublish / capture(false)                 set_stream(None)
//! ```

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::discovery::PadSpec;
use super::error::{FlowError, FlowResult};
use super::events::{EventBus, PadEvent};
use super::media::{
    CaptureOptions, DeviceError, MediaEnvironment, MediaStream, MediaTrack, OutputSink,
};
use super::transport::{PublishOptions, PublishedTrack, Transport, TransportError};
use super::types::{
    PadDataType, PadDirection, PadMessage, PadMessageKind, SubscribeState, TrackKind, TrackSource,
};

/// Payload accepted by [`Pad::publish`]
#[derive(Debug, Clone)]
pub enum PadPayload {
    /// Media for audio/video pads
    Stream(MediaStream),
    /// Serializable data for trigger/data pads
    Data(Value),
}

/// Options for [`Pad::set_enabled`]
#[derive(Clone, Default)]
pub struct EnableOptions {
    /// Output to route enabled audio to. A hidden sink is created when absent.
    pub output: Option<Arc<dyn OutputSink>>,
}

/// Shared collaborators handed to every pad the engine creates
#[derive(Clone, Default)]
pub struct PadContext {
    pub transport: Option<Arc<dyn Transport>>,
    pub media: MediaEnvironment,
    /// Topic for outbound reliable envelopes
    pub data_topic: Option<String>,
}

#[derive(Default)]
struct PadState {
    stream: Option<MediaStream>,
    track: Option<Arc<dyn MediaTrack>>,
    published: Option<PublishedTrack>,
    publishing: bool,
    connected: bool,
    subscribed: bool,
    enabled: bool,
    value: Option<Value>,
    output: Option<Arc<dyn OutputSink>>,
    output_managed: bool,
}

pub struct Pad {
    id: String,
    node_id: String,
    name: String,
    direction: PadDirection,
    data_type: PadDataType,
    backend_type: Option<String>,
    category: Option<String>,
    allowed_types: Vec<String>,
    next_pads: Vec<String>,
    previous_pad: Option<String>,
    data_topic: Option<String>,
    media: MediaEnvironment,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    state: Mutex<PadState>,
    events: EventBus<PadEvent>,
}

impl Pad {
    pub fn new(node_id: impl Into<String>, spec: PadSpec, ctx: &PadContext) -> Self {
        let state = PadState {
            enabled: true,
            value: spec.value,
            ..Default::default()
        };
        Self {
            id: spec.id,
            node_id: node_id.into(),
            name: spec.name,
            direction: spec.direction,
            data_type: spec.data_type,
            backend_type: spec.backend_type,
            category: spec.category,
            allowed_types: spec.allowed_types,
            next_pads: spec.next_pads,
            previous_pad: spec.previous_pad,
            data_topic: ctx.data_topic.clone(),
            media: ctx.media.clone(),
            transport: RwLock::new(ctx.transport.clone()),
            state: Mutex::new(state),
            events: EventBus::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Human display label
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    pub fn data_type(&self) -> &PadDataType {
        &self.data_type
    }

    pub fn backend_type(&self) -> Option<&str> {
        self.backend_type.as_deref()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn allowed_types(&self) -> &[String] {
        &self.allowed_types
    }

    pub fn next_pads(&self) -> &[String] {
        &self.next_pads
    }

    pub fn previous_pad(&self) -> Option<&str> {
        self.previous_pad.as_deref()
    }

    pub fn is_source_pad(&self) -> bool {
        self.direction == PadDirection::Source
    }

    pub fn is_sink_pad(&self) -> bool {
        self.direction == PadDirection::Sink
    }

    /// Holds a persistent value rather than a transient stream
    pub fn is_property_pad(&self) -> bool {
        self.backend_type
            .as_deref()
            .is_some_and(|t| t.contains("Property"))
            || self
                .category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case("property"))
    }

    /// Name tagged on published tracks: `{nodeId}-{padId}-{dataType}`
    pub fn track_name(&self) -> String {
        format!("{}-{}-{}", self.node_id, self.id, self.data_type)
    }

    pub fn events(&self) -> &EventBus<PadEvent> {
        &self.events
    }

    // -------------------------------------------------------------------------
    // Runtime state
    // -------------------------------------------------------------------------

    pub fn is_publishing(&self) -> bool {
        self.state.lock().publishing
    }

    pub fn get_connection_state(&self) -> bool {
        self.state.lock().connected
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscribed
    }

    pub fn subscribe_state(&self) -> SubscribeState {
        if self.state.lock().subscribed {
            SubscribeState::Subscribed
        } else {
            SubscribeState::Unsubscribed
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn stream(&self) -> Option<MediaStream> {
        self.state.lock().stream.clone()
    }

    pub fn track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.state.lock().track.clone()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.read().is_some()
    }

    pub fn get_value(&self) -> Option<Value> {
        self.state.lock().value.clone()
    }

    /// Store a property value. Not gated by direction.
    pub fn set_value(&self, value: Value) {
        self.state.lock().value = Some(value.clone());
        self.events.emit(&PadEvent::DataReceived(value));
    }

    // -------------------------------------------------------------------------
    // Outbound operations
    // -------------------------------------------------------------------------

    pub async fn publish(&self, payload: PadPayload) -> FlowResult<()> {
        match payload {
            PadPayload::Stream(stream) => self.publish_stream(stream).await,
            PadPayload::Data(value) => self.publish_data(value).await,
        }
    }

    /// Publish a media stream on an audio/video source pad
    pub async fn publish_stream(&self, stream: MediaStream) -> FlowResult<()> {
        self.require_source("publish")?;
        let kind = self.data_type.track_kind().ok_or_else(|| {
            FlowError::protocol(&self.id, "only audio and video pads publish media streams")
        })?;
        let transport = self.require_transport()?;

        let track = match stream.first_track(kind) {
            Some(track) => track,
            None => {
                return Err(match stream.tracks().first() {
                    Some(other) => FlowError::TrackKindMismatch {
                        expected: self.data_type.clone(),
                        actual: other.kind(),
                    },
                    None => FlowError::EmptyStream(self.id.clone(), self.data_type.clone()),
                });
            }
        };

        if let Some(err) = self.release_media(Some(&transport)).await {
            warn!(pad_id = %self.id, error = %err, "Failed to unpublish previous stream");
        }

        if kind == TrackKind::Audio {
            track.set_enabled(self.is_enabled());
        }

        let options = PublishOptions {
            name: self.track_name(),
            source: TrackSource::for_kind(kind),
        };
        let published = transport.publish_track(Arc::clone(&track), options).await?;

        info!(
            node_id = %self.node_id,
            pad_id = %self.id,
            track_sid = %published.sid,
            track_name = %published.name,
            "Published {} track", kind
        );

        let output = {
            let mut state = self.state.lock();
            state.stream = Some(stream.clone());
            state.track = Some(track);
            state.published = Some(published);
            state.publishing = true;
            state.connected = true;
            state.output.clone()
        };
        if let Some(output) = output {
            attach_output(&self.id, &output, &stream);
        }

        self.events.emit(&PadEvent::ConnectionChanged(true));
        Ok(())
    }

    /// Send serializable data from a trigger/data source pad
    pub async fn publish_data(&self, payload: Value) -> FlowResult<()> {
        self.require_source("publish")?;
        if self.data_type.is_media() {
            return Err(FlowError::protocol(
                &self.id,
                "audio and video pads publish media streams, not data",
            ));
        }
        let transport = self.require_transport()?;

        let kind = if self.data_type == PadDataType::Trigger {
            PadMessageKind::Trigger
        } else {
            PadMessageKind::Data
        };
        self.send_envelope(&transport, kind, payload).await?;

        {
            let mut state = self.state.lock();
            state.publishing = true;
            state.connected = true;
        }
        self.events.emit(&PadEvent::ConnectionChanged(true));
        Ok(())
    }

    /// Stop publishing. Idempotent.
    pub async fn unpublish(&self) -> FlowResult<()> {
        self.require_source("unpublish")?;

        let active = {
            let state = self.state.lock();
            state.publishing || state.published.is_some()
        };
        if !active {
            return Ok(());
        }

        let transport = self.transport.read().clone();
        let failure = self.release_media(transport.as_ref()).await;
        {
            let mut state = self.state.lock();
            state.publishing = false;
            state.connected = false;
        }
        self.events.emit(&PadEvent::ConnectionChanged(false));

        debug!(pad_id = %self.id, "Unpublished");
        match failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Fire a trigger over the reliable channel
    pub async fn trigger(&self, payload: Option<Value>) -> FlowResult<()> {
        if self.data_type != PadDataType::Trigger {
            return Err(FlowError::protocol(
                &self.id,
                format!("trigger requires a trigger pad, this pad carries {}", self.data_type),
            ));
        }
        self.require_source("trigger")?;
        let transport = self.require_transport()?;

        self.send_envelope(&transport, PadMessageKind::Trigger, payload.unwrap_or(Value::Null))
            .await
    }

    pub async fn set_microphone_enabled(
        &self,
        enabled: bool,
        options: CaptureOptions,
    ) -> FlowResult<()> {
        self.set_capture_enabled(TrackKind::Audio, enabled, &options)
            .await
    }

    pub async fn set_video_enabled(
        &self,
        enabled: bool,
        options: CaptureOptions,
    ) -> FlowResult<()> {
        self.set_capture_enabled(TrackKind::Video, enabled, &options)
            .await
    }

    /// Enable or disable the audio track at its source without tearing down
    /// the publication
    pub fn set_enabled(&self, enabled: bool, options: EnableOptions) -> FlowResult<()> {
        if self.data_type != PadDataType::Audio {
            return Err(FlowError::protocol(
                &self.id,
                "set_enabled is only supported on audio pads",
            ));
        }
        self.require_source("set_enabled")?;

        match options.output {
            Some(output) => self.set_output(Some(output)),
            None => self.ensure_output(),
        }

        let (track, stream, output) = {
            let mut state = self.state.lock();
            state.enabled = enabled;
            (state.track.clone(), state.stream.clone(), state.output.clone())
        };

        if let Some(track) = track {
            track.set_enabled(enabled);
        }
        if enabled {
            if let (Some(output), Some(stream)) = (output, stream) {
                attach_output(&self.id, &output, &stream);
            }
        }

        debug!(pad_id = %self.id, enabled, "Pad audio enable flag changed");
        Ok(())
    }

    /// Bind an externally owned output sink, replacing any current one
    pub fn set_output(&self, output: Option<Arc<dyn OutputSink>>) {
        let (previous, managed, stream) = {
            let mut state = self.state.lock();
            let previous = std::mem::replace(&mut state.output, output.clone());
            let managed = std::mem::replace(&mut state.output_managed, false);
            (previous, managed, state.stream.clone())
        };

        if let Some(previous) = previous {
            previous.detach();
            if managed {
                if let Some(host) = &self.media.playback {
                    host.destroy_sink(&previous);
                }
            }
        }
        if let (Some(output), Some(stream)) = (output, stream) {
            attach_output(&self.id, &output, &stream);
        }
    }

    // -------------------------------------------------------------------------
    // Inbound mutation (routing protocol)
    // -------------------------------------------------------------------------

    /// Attach or clear an inbound stream. Used by the engine's routing.
    pub fn set_stream(&self, stream: Option<MediaStream>) {
        match stream {
            Some(stream) => {
                let track = match self.data_type.track_kind() {
                    Some(kind) => stream.first_track(kind),
                    None => stream.tracks().first().cloned(),
                };
                let (previous, output, enabled, was_subscribed) = {
                    let mut state = self.state.lock();
                    let previous = state.stream.replace(stream.clone());
                    state.track = track.clone();
                    let was_subscribed = std::mem::replace(&mut state.subscribed, true);
                    state.connected = true;
                    (previous, state.output.clone(), state.enabled, was_subscribed)
                };

                if let Some(previous) = previous.filter(|p| p.id() != stream.id()) {
                    previous.stop_all();
                }
                if let Some(track) = track.filter(|t| t.kind() == TrackKind::Audio) {
                    track.set_enabled(enabled);
                }
                if let Some(output) = output {
                    attach_output(&self.id, &output, &stream);
                }

                debug!(pad_id = %self.id, stream_id = %stream.id(), "Stream attached");
                self.events.emit(&PadEvent::StreamReceived(Some(stream)));
                if !was_subscribed {
                    self.events
                        .emit(&PadEvent::SubscribeStateChanged(SubscribeState::Subscribed));
                }
            }
            None => {
                let (previous, output, was_subscribed) = {
                    let mut state = self.state.lock();
                    let previous = state.stream.take();
                    state.track = None;
                    let was_subscribed = std::mem::replace(&mut state.subscribed, false);
                    state.connected = state.publishing;
                    (previous, state.output.clone(), was_subscribed)
                };

                if let Some(previous) = previous {
                    previous.stop_all();
                }
                if let Some(output) = output {
                    output.detach();
                }

                debug!(pad_id = %self.id, "Stream cleared");
                self.events.emit(&PadEvent::StreamReceived(None));
                if was_subscribed {
                    self.events
                        .emit(&PadEvent::SubscribeStateChanged(SubscribeState::Unsubscribed));
                }
            }
        }
    }

    /// Re-emit an inbound reliable message as a pad event
    pub fn receive_message(&self, kind: PadMessageKind, message: Value) {
        let was_subscribed = std::mem::replace(&mut self.state.lock().subscribed, true);
        if !was_subscribed {
            self.events
                .emit(&PadEvent::SubscribeStateChanged(SubscribeState::Subscribed));
        }

        let event = match kind {
            PadMessageKind::Trigger => PadEvent::TriggerReceived(Some(message)),
            PadMessageKind::Data => PadEvent::DataReceived(message),
            PadMessageKind::Stream => PadEvent::StreamData(message),
        };
        self.events.emit(&event);
    }

    // -------------------------------------------------------------------------
    // Cleanup
    // -------------------------------------------------------------------------

    /// Release everything the pad owns. Best-effort: each step runs even if
    /// an earlier one failed, and failures are only logged.
    pub async fn cleanup(&self) {
        let (stream, published, output, managed) = {
            let mut state = self.state.lock();
            let taken = (
                state.stream.take(),
                state.published.take(),
                state.output.take(),
                state.output_managed,
            );
            *state = PadState {
                enabled: state.enabled,
                value: state.value.take(),
                ..Default::default()
            };
            taken
        };

        if let Some(stream) = stream {
            stream.stop_all();
        }
        if let Some(published) = published {
            let transport = self.transport.read().clone();
            match transport {
                Some(transport) => {
                    if let Err(e) = transport.unpublish_track(&published.sid).await {
                        warn!(
                            pad_id = %self.id,
                            track_sid = %published.sid,
                            error = %e,
                            "Failed to unpublish track during cleanup"
                        );
                    }
                }
                None => warn!(
                    pad_id = %self.id,
                    "Published track without transport during cleanup"
                ),
            }
        }

        if let Some(output) = output {
            output.detach();
            if managed {
                if let Some(host) = &self.media.playback {
                    host.destroy_sink(&output);
                }
            }
        }

        *self.transport.write() = None;
        self.events.clear();
        debug!(node_id = %self.node_id, pad_id = %self.id, "Pad cleaned up");
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn require_source(&self, operation: &str) -> FlowResult<()> {
        if self.is_source_pad() {
            Ok(())
        } else {
            Err(FlowError::protocol(
                &self.id,
                format!("{operation} is only allowed on source pads (pad is {})", self.direction),
            ))
        }
    }

    fn require_transport(&self) -> FlowResult<Arc<dyn Transport>> {
        self.transport
            .read()
            .clone()
            .ok_or_else(|| FlowError::TransportNotAttached(self.id.clone()))
    }

    async fn send_envelope(
        &self,
        transport: &Arc<dyn Transport>,
        kind: PadMessageKind,
        payload: Value,
    ) -> FlowResult<()> {
        let message = PadMessage::new(&self.node_id, &self.id, kind, payload);
        let bytes = serde_json::to_vec(&message)?;
        transport
            .send_reliable(Bytes::from(bytes), self.data_topic.as_deref())
            .await?;
        debug!(node_id = %self.node_id, pad_id = %self.id, kind = ?kind, "Sent pad message");
        Ok(())
    }

    /// Drop the current stream and publication, stopping owned tracks.
    /// Returns the transport error if unpublishing failed.
    async fn release_media(
        &self,
        transport: Option<&Arc<dyn Transport>>,
    ) -> Option<TransportError> {
        let (stream, published, output) = {
            let mut state = self.state.lock();
            state.track = None;
            state.publishing = false;
            state.connected = state.subscribed;
            (state.stream.take(), state.published.take(), state.output.clone())
        };

        if let Some(stream) = stream {
            stream.stop_all();
        }
        if let Some(output) = output {
            output.detach();
        }
        match (published, transport) {
            (Some(published), Some(transport)) => {
                transport.unpublish_track(&published.sid).await.err()
            }
            _ => None,
        }
    }

    fn ensure_output(&self) {
        if self.state.lock().output.is_some() {
            return;
        }
        let Some(host) = &self.media.playback else {
            debug!(pad_id = %self.id, "No playback host, enable flag applies to the track only");
            return;
        };
        match host.create_sink(&self.track_name()) {
            Ok(sink) => {
                let mut state = self.state.lock();
                state.output = Some(sink);
                state.output_managed = true;
            }
            Err(e) => warn!(pad_id = %self.id, error = %e, "Failed to create playback sink"),
        }
    }

    async fn set_capture_enabled(
        &self,
        kind: TrackKind,
        enabled: bool,
        options: &CaptureOptions,
    ) -> FlowResult<()> {
        let device = device_label(kind);
        if self.data_type.track_kind() != Some(kind) {
            return Err(FlowError::protocol(
                &self.id,
                format!("{device} control requires a {kind} pad"),
            ));
        }
        self.require_source(&format!("{device} control"))?;

        if !enabled {
            return self.unpublish().await;
        }

        self.require_transport()?;
        let devices = self.media.devices.clone().ok_or_else(|| {
            FlowError::DeviceUnavailable("no media device access configured".to_string())
        })?;

        match devices.has_device(kind).await {
            Ok(true) => {}
            Ok(false) => return Err(device_error(kind, DeviceError::NotFound)),
            Err(e) => return Err(device_error(kind, e)),
        }

        let track = devices
            .capture(kind, options)
            .await
            .map_err(|e| device_error(kind, e))?;

        if let Err(e) = self
            .publish_stream(MediaStream::from_track(Arc::clone(&track)))
            .await
        {
            track.stop();
            return Err(e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pad")
            .field("id", &self.id)
            .field("node_id", &self.node_id)
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("data_type", &self.data_type)
            .field("backend_type", &self.backend_type)
            .finish()
    }
}

fn attach_output(pad_id: &str, output: &Arc<dyn OutputSink>, stream: &MediaStream) {
    if let Err(e) = output.attach(stream) {
        warn!(pad_id = %pad_id, error = %e, "Failed to attach stream to output");
    }
}

fn device_label(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Audio => "microphone",
        TrackKind::Video => "camera",
    }
}

fn device_error(kind: TrackKind, err: DeviceError) -> FlowError {
    let (lower, upper) = match kind {
        TrackKind::Audio => ("microphone", "Microphone"),
        TrackKind::Video => ("camera", "Camera"),
    };
    match err {
        DeviceError::NotFound => FlowError::DeviceNotFound(format!("No {lower} found")),
        DeviceError::PermissionDenied => {
            FlowError::PermissionDenied(format!("{upper} permission denied"))
        }
        DeviceError::Busy => FlowError::DeviceBusy(format!(
            "{upper} is already in use by another application"
        )),
        DeviceError::Other(msg) => FlowError::DeviceUnavailable(format!("{lower}: {msg}")),
    }
}
