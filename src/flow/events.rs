//! Typed event buses owned by pads, nodes and the engine
//!
//! Each component owns an [`EventBus`] field keyed by event name. Listeners
//! are snapshotted before dispatch, so a listener may subscribe or
//! unsubscribe from inside its own callback.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::media::MediaStream;
use super::types::{ConnectionState, RunState, SubscribeState};

/// An event that can be dispatched through an [`EventBus`]
pub trait Event: Send + Sync + 'static {
    /// Name listeners subscribe under
    fn name(&self) -> &'static str;
}

/// Callback type for bus listeners.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct EventBus<E: Event> {
    listeners: RwLock<HashMap<&'static str, Vec<(ListenerId, Listener<E>)>>>,
    next_id: AtomicU64,
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to events with the given name
    pub fn on<F>(&self, name: &'static str, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(name)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;
        for entries in listeners.values_mut() {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
        }
        listeners.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Dispatch an event to every listener registered under its name
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = match self.listeners.read().get(event.name()) {
            Some(entries) => entries.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.read().get(name).map_or(0, Vec::len)
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("EventBus")
            .field("events", &listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Pad events
// =============================================================================

#[derive(Debug, Clone)]
pub enum PadEvent {
    DataReceived(serde_json::Value),
    /// `None` when an inbound stream was cleared
    StreamReceived(Option<MediaStream>),
    /// Inbound reliable message of type `stream`; shares the stream-received name
    StreamData(serde_json::Value),
    TriggerReceived(Option<serde_json::Value>),
    ConnectionChanged(bool),
    SubscribeStateChanged(SubscribeState),
}

impl PadEvent {
    pub const DATA_RECEIVED: &'static str = "data-received";
    pub const STREAM_RECEIVED: &'static str = "stream-received";
    pub const TRIGGER_RECEIVED: &'static str = "trigger-received";
    pub const CONNECTION_CHANGED: &'static str = "connection-changed";
    pub const SUBSCRIBE_STATE_CHANGED: &'static str = "subscribe-state-changed";
}

impl Event for PadEvent {
    fn name(&self) -> &'static str {
        match self {
            PadEvent::DataReceived(_) => Self::DATA_RECEIVED,
            PadEvent::StreamReceived(_) | PadEvent::StreamData(_) => Self::STREAM_RECEIVED,
            PadEvent::TriggerReceived(_) => Self::TRIGGER_RECEIVED,
            PadEvent::ConnectionChanged(_) => Self::CONNECTION_CHANGED,
            PadEvent::SubscribeStateChanged(_) => Self::SUBSCRIBE_STATE_CHANGED,
        }
    }
}

// =============================================================================
// Node events
// =============================================================================

#[derive(Debug, Clone)]
pub enum NodeEvent {
    DataReceived(serde_json::Value),
    StreamReceived(MediaStream),
}

impl NodeEvent {
    pub const DATA_RECEIVED: &'static str = "data-received";
    pub const STREAM_RECEIVED: &'static str = "stream-received";
}

impl Event for NodeEvent {
    fn name(&self) -> &'static str {
        match self {
            NodeEvent::DataReceived(_) => Self::DATA_RECEIVED,
            NodeEvent::StreamReceived(_) => Self::STREAM_RECEIVED,
        }
    }
}

// =============================================================================
// Engine events
// =============================================================================

#[derive(Debug, Clone)]
pub enum EngineEvent {
    ConnectionStateChanged(ConnectionState),
    RunStateChanged(RunState),
    /// Fired once per completed discovery batch
    NodesDiscovered,
    Error(String),
}

impl EngineEvent {
    pub const CONNECTION_STATE_CHANGED: &'static str = "connection-state-changed";
    pub const RUN_STATE_CHANGED: &'static str = "run-state-changed";
    pub const NODES_DISCOVERED: &'static str = "nodes-discovered";
    pub const ERROR: &'static str = "error";
}

impl Event for EngineEvent {
    fn name(&self) -> &'static str {
        match self {
            EngineEvent::ConnectionStateChanged(_) => Self::CONNECTION_STATE_CHANGED,
            EngineEvent::RunStateChanged(_) => Self::RUN_STATE_CHANGED,
            EngineEvent::NodesDiscovered => Self::NODES_DISCOVERED,
            EngineEvent::Error(_) => Self::ERROR,
        }
    }
}
