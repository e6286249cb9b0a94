//! Flow engine: connection lifecycle, node registry and inbound routing
//!
//! The engine owns the transport session and the node registry. It is a
//! cheap `Clone` handle; clones share one session.
//!
//! # Connection state machine
//!
//! ```text
//!   disconnected ──connect()──> connecting ──transport joined──> connected
//!        ^                          │                                │
//!        └──────── failure ─────────┘                                │
//!        └──────────────────────── disconnect() ─────────────────────┘
//! ```
//!
//! `disconnect()` publishes the `disconnected` state before teardown runs,
//! so observers may see it while node cleanup is still in flight.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::discovery::{DiscoveryProtocol, NodeSpec, parse_node_discovery, parse_room_metadata};
use super::error::{FlowError, FlowResult};
use super::events::{EngineEvent, EventBus, NodeEvent};
use super::media::{MediaEnvironment, MediaStream, MediaTrack};
use super::node::Node;
use super::pad::{Pad, PadContext};
use super::routing::{InboundMessage, RoutingRules, decode_inbound};
use super::transport::{
    ParticipantInfo, TrackPublicationInfo, Transport, TransportError, TransportEvent,
};
use super::types::{ConnectionDetails, ConnectionState, RunState};
use crate::config::FlowConfig;

#[derive(Default)]
struct Registry {
    nodes: HashMap<String, Arc<Node>>,
    /// Registration order
    order: Vec<String>,
    publisher: Option<Arc<Node>>,
}

impl Registry {
    fn ordered(&self) -> Vec<Arc<Node>> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .cloned()
            .collect()
    }

    fn drain(&mut self) -> Vec<Arc<Node>> {
        let nodes = self.ordered();
        self.nodes.clear();
        self.order.clear();
        self.publisher = None;
        nodes
    }
}

struct EngineInner {
    transport: Arc<dyn Transport>,
    config: FlowConfig,
    rules: RoutingRules,
    media: MediaEnvironment,
    connection: RwLock<ConnectionState>,
    /// Bumped by every connect and disconnect under the connection lock.
    /// A connect only completes while its attempt is still current.
    attempt: AtomicU64,
    /// Held while a connect completes and for the whole of a disconnect
    lifecycle: AsyncMutex<()>,
    run_state: RwLock<RunState>,
    registry: RwLock<Registry>,
    /// Cancels the transport event loop
    event_loop: Mutex<Option<CancellationToken>>,
    events: EventBus<EngineEvent>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, config: FlowConfig) -> Self {
        Self::with_media(transport, config, MediaEnvironment::default())
    }

    /// Create an engine whose pads can capture devices and manage playback
    pub fn with_media(
        transport: Arc<dyn Transport>,
        config: FlowConfig,
        media: MediaEnvironment,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                transport,
                rules: RoutingRules::from_config(&config),
                config,
                media,
                connection: RwLock::new(ConnectionState::Disconnected),
                attempt: AtomicU64::new(0),
                lifecycle: AsyncMutex::new(()),
                run_state: RwLock::new(RunState::Idle),
                registry: RwLock::new(Registry::default()),
                event_loop: Mutex::new(None),
                events: EventBus::new(),
            }),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection.read()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn run_state(&self) -> RunState {
        *self.inner.run_state.read()
    }

    pub fn config(&self) -> &FlowConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus<EngineEvent> {
        &self.inner.events
    }

    pub fn get_node(&self, id: &str) -> Option<Arc<Node>> {
        self.inner.registry.read().nodes.get(id).cloned()
    }

    /// Registered nodes in discovery order
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.inner.registry.read().ordered()
    }

    pub fn nodes_by_type(&self, node_type: &str) -> Vec<Arc<Node>> {
        self.nodes()
            .into_iter()
            .filter(|n| n.is_type(node_type))
            .collect()
    }

    /// Node representing the local client's outbound media
    pub fn publisher_node(&self) -> Option<Arc<Node>> {
        self.inner.registry.read().publisher.clone()
    }

    pub fn find_pad(&self, node_id: &str, pad_id: &str) -> Option<Arc<Pad>> {
        self.get_node(node_id)?.get_pad(pad_id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Join the room and run discovery.
    ///
    /// Only legal from `disconnected`. Any failure rolls the engine back to
    /// `disconnected` and releases the partially opened transport before the
    /// error is returned. A `disconnect` issued while the transport is still
    /// joining wins: this attempt then fails without touching the state.
    pub async fn connect(&self, details: ConnectionDetails) -> FlowResult<()> {
        let attempt = {
            let mut connection = self.inner.connection.write();
            if *connection != ConnectionState::Disconnected {
                return Err(FlowError::AlreadyConnected);
            }
            *connection = ConnectionState::Connecting;
            self.inner.attempt.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.emit_connection_state(ConnectionState::Connecting);
        self.set_run_state(RunState::Starting);
        info!(url = %details.url, discovery = ?self.inner.config.discovery, attempt, "Connecting");

        let opened = self.open_transport(&details).await;
        let _lifecycle = self.inner.lifecycle.lock().await;
        if !self.is_current(attempt) {
            return Err(self.abandon_attempt(attempt, opened).await);
        }

        match opened {
            Ok(events) => {
                if self.inner.config.discovery == DiscoveryProtocol::Metadata {
                    self.discover_from_metadata();
                }
                self.spawn_event_loop(events);
                self.transition(ConnectionState::Connecting, ConnectionState::Connected);
                self.set_run_state(RunState::Running);
                info!(nodes = self.inner.registry.read().nodes.len(), "Connected");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Connect failed, rolling back");
                self.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                self.release_session().await;
                self.set_run_state(RunState::Idle);
                self.inner.events.emit(&EngineEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Leave the room and release every node. No-op when disconnected.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let previous = {
            let mut connection = self.inner.connection.write();
            if *connection == ConnectionState::Disconnected {
                return;
            }
            self.inner.attempt.fetch_add(1, Ordering::SeqCst);
            std::mem::replace(&mut *connection, ConnectionState::Disconnected)
        };
        self.emit_connection_state(ConnectionState::Disconnected);
        self.set_run_state(RunState::Stopping);
        info!(from = %previous, "Disconnecting");

        self.release_session().await;

        self.set_run_state(RunState::Idle);
        info!("Disconnected");
    }

    async fn open_transport(
        &self,
        details: &ConnectionDetails,
    ) -> FlowResult<mpsc::UnboundedReceiver<TransportEvent>> {
        let timeout_ms = self.inner.config.connect_timeout_ms;
        let events = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.inner.transport.connect(&details.url, &details.token),
        )
        .await
        .map_err(|_| FlowError::ConnectTimeout(timeout_ms))??;
        Ok(events)
    }

    /// Whether `attempt` is the connect the engine is still waiting on
    fn is_current(&self, attempt: u64) -> bool {
        let connection = self.inner.connection.read();
        *connection == ConnectionState::Connecting
            && self.inner.attempt.load(Ordering::SeqCst) == attempt
    }

    /// Finish a connect that a `disconnect` overtook. The state belongs to
    /// whoever came later; only a session nobody else is using gets closed.
    async fn abandon_attempt(
        &self,
        attempt: u64,
        opened: FlowResult<mpsc::UnboundedReceiver<TransportEvent>>,
    ) -> FlowError {
        let idle = self.connection_state() == ConnectionState::Disconnected;
        warn!(attempt, idle, "Connect overtaken by disconnect");

        if idle {
            if opened.is_ok() {
                if let Err(e) = self.inner.transport.disconnect().await {
                    warn!(error = %e, "Transport disconnect failed");
                }
            }
            self.set_run_state(RunState::Idle);
        }

        match opened {
            Err(e) => e,
            Ok(_) => FlowError::Transport(TransportError::ConnectionFailed(
                "disconnected while connecting".to_string(),
            )),
        }
    }

    /// Stop the event loop, clean up nodes and close the transport.
    /// Every step runs regardless of earlier failures.
    async fn release_session(&self) {
        if let Some(token) = self.inner.event_loop.lock().take() {
            token.cancel();
        }

        let nodes = self.inner.registry.write().drain();
        for node in &nodes {
            node.cleanup().await;
        }
        debug!(nodes = nodes.len(), "Node registry cleared");

        if let Err(e) = self.inner.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }
    }

    fn spawn_event_loop(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else {
                            debug!("Transport event channel closed");
                            break;
                        };
                        let Some(inner) = weak.upgrade() else { break };
                        Engine { inner }.handle_transport_event(event).await;
                    }
                }
            }
            debug!("Transport event loop stopped");
        });

        *self.inner.event_loop.lock() = Some(token);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        {
            let mut connection = self.inner.connection.write();
            if *connection != from {
                return false;
            }
            *connection = to;
        }
        self.emit_connection_state(to);
        true
    }

    fn emit_connection_state(&self, state: ConnectionState) {
        debug!(state = %state, "Connection state changed");
        self.inner
            .events
            .emit(&EngineEvent::ConnectionStateChanged(state));
    }

    fn set_run_state(&self, state: RunState) {
        {
            let mut run_state = self.inner.run_state.write();
            if *run_state == state {
                return;
            }
            *run_state = state;
        }
        debug!(state = %state, "Run state changed");
        self.inner.events.emit(&EngineEvent::RunStateChanged(state));
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    fn discover_from_metadata(&self) {
        let Some(metadata) = self.inner.transport.room_metadata() else {
            warn!("Room metadata unavailable, no nodes discovered");
            return;
        };
        match parse_room_metadata(&metadata) {
            Ok(specs) => {
                self.register_nodes(specs, "metadata");
            }
            Err(e) => warn!(error = %e, "Ignoring room metadata"),
        }
    }

    /// Register a discovery batch. Known node ids are skipped; the publisher
    /// is resolved and `nodes-discovered` fires once the whole batch is in.
    fn register_nodes(&self, specs: Vec<NodeSpec>, source: &'static str) -> usize {
        let ctx = self.pad_context();
        let (added, total) = {
            let mut guard = self.inner.registry.write();
            let registry = &mut *guard;
            let mut added = 0;

            for spec in specs {
                if registry.nodes.contains_key(&spec.id) {
                    debug!(node_id = %spec.id, "Skipping already registered node");
                    continue;
                }
                let node = Arc::new(Node::new(&spec.id, &spec.node_type));
                for pad_spec in spec.pads {
                    let pad = Arc::new(Pad::new(&spec.id, pad_spec, &ctx));
                    if let Err(e) = node.add_pad(pad) {
                        warn!(error = %e, "Skipping pad");
                    }
                }
                debug!(
                    node_id = %spec.id,
                    node_type = %spec.node_type,
                    pads = node.pad_count(),
                    "Registered node"
                );
                registry.order.push(spec.id.clone());
                registry.nodes.insert(spec.id, node);
                added += 1;
            }

            if registry.publisher.is_none() {
                let role = &self.inner.config.publisher_role;
                registry.publisher = registry
                    .order
                    .iter()
                    .filter_map(|id| registry.nodes.get(id))
                    .find(|n| n.is_type(role))
                    .cloned();
            }
            (added, registry.nodes.len())
        };

        info!(source, added, total, "Discovery batch applied");
        self.inner.events.emit(&EngineEvent::NodesDiscovered);
        added
    }

    fn pad_context(&self) -> PadContext {
        PadContext {
            transport: Some(Arc::clone(&self.inner.transport)),
            media: self.inner.media.clone(),
            data_topic: self.inner.config.data_topic.clone(),
        }
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Route one transport event. Never fails: unroutable or malformed input
    /// is logged and dropped.
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => debug!("Transport reports connected"),
            TransportEvent::Disconnected { reason } => {
                warn!(reason = %reason, "Transport disconnected");
                self.disconnect().await;
            }
            TransportEvent::TrackSubscribed {
                track,
                publication,
                participant,
            } => self.route_track(track, &publication, &participant, true),
            TransportEvent::TrackUnsubscribed {
                track,
                publication,
                participant,
            } => self.route_track(track, &publication, &participant, false),
            TransportEvent::DataReceived {
                payload,
                participant,
                topic,
                reliable,
            } => {
                if !reliable {
                    debug!(bytes = payload.len(), "Ignoring lossy data packet");
                    return;
                }
                debug!(
                    bytes = payload.len(),
                    from = participant.as_ref().map(|p| p.identity.as_str()).unwrap_or(""),
                    topic = topic.as_deref().unwrap_or(""),
                    "Data received"
                );
                self.route_data(&payload);
            }
            TransportEvent::ParticipantConnected(participant) => {
                debug!(identity = %participant.identity, "Participant connected");
            }
            TransportEvent::ParticipantDisconnected(participant) => {
                debug!(identity = %participant.identity, "Participant disconnected");
            }
            TransportEvent::RoomMetadataChanged(metadata) => {
                if self.inner.config.discovery == DiscoveryProtocol::Metadata {
                    match parse_room_metadata(&metadata) {
                        Ok(specs) => {
                            self.register_nodes(specs, "metadata");
                        }
                        Err(e) => warn!(error = %e, "Ignoring updated room metadata"),
                    }
                }
            }
        }
    }

    fn route_track(
        &self,
        track: Arc<dyn MediaTrack>,
        publication: &TrackPublicationInfo,
        participant: &ParticipantInfo,
        subscribed: bool,
    ) {
        let kind = track.kind();
        let nodes = self.nodes();
        let rules = &self.inner.rules;

        let target = match rules.resolve_node(&participant.identity, &nodes) {
            Some((node, strategy)) => {
                debug!(
                    identity = %participant.identity,
                    node_id = %node.id(),
                    strategy = ?strategy,
                    "Resolved track owner"
                );
                Some(Arc::clone(node))
            }
            None if rules.is_tts_candidate(kind, publication, participant) => {
                let node = rules.tts_fallback_node(&nodes).cloned();
                if let Some(node) = &node {
                    debug!(
                        identity = %participant.identity,
                        node_id = %node.id(),
                        "Routing agent audio to TTS node"
                    );
                }
                node
            }
            None => None,
        };

        let Some(node) = target else {
            if subscribed {
                warn!(
                    identity = %participant.identity,
                    track_sid = %publication.sid,
                    kind = %kind,
                    "Dropping unroutable track"
                );
            }
            return;
        };

        let pads = node.get_output_pads(Some(&kind.data_type()));
        if subscribed {
            let stream = MediaStream::from_track(track);
            for pad in &pads {
                pad.set_stream(Some(stream.clone()));
            }
            debug!(node_id = %node.id(), pads = pads.len(), "Track attached");
            node.events().emit(&NodeEvent::StreamReceived(stream));
        } else {
            let track_id = track.id();
            for pad in pads
                .iter()
                .filter(|p| p.stream().is_some_and(|s| s.contains_track(&track_id)))
            {
                pad.set_stream(None);
            }
            debug!(node_id = %node.id(), track_sid = %publication.sid, "Track detached");
        }
    }

    fn route_data(&self, payload: &[u8]) {
        let message = match decode_inbound(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed data message");
                return;
            }
        };

        match message {
            InboundMessage::Discovery(message) => {
                if self.inner.config.discovery != DiscoveryProtocol::Push {
                    debug!("Ignoring node discovery push in metadata mode");
                    return;
                }
                match parse_node_discovery(&message) {
                    Ok(specs) => {
                        self.register_nodes(specs, "push");
                    }
                    Err(e) => warn!(error = %e, "Dropping node discovery message"),
                }
            }
            InboundMessage::Pad {
                node_id,
                pad_id,
                kind,
                message,
            } => {
                let Some(node) = self.get_node(&node_id) else {
                    warn!(node_id = %node_id, "Data for unknown node");
                    return;
                };
                node.events().emit(&NodeEvent::DataReceived(message.clone()));

                let Some(pad_id) = pad_id else { return };
                match node.get_pad(&pad_id) {
                    Some(pad) => {
                        debug!(
                            node_id = %node_id,
                            pad_id = %pad_id,
                            kind = ?kind,
                            "Routing message to pad"
                        );
                        pad.receive_message(kind, message);
                    }
                    None => warn!(node_id = %node_id, pad_id = %pad_id, "Data for unknown pad"),
                }
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("connection", &self.connection_state())
            .field("run_state", &self.run_state())
            .field("nodes", &self.inner.registry.read().order)
            .finish()
    }
}
