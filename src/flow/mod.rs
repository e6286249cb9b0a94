//! Workflow graph layer over a real-time media transport
//!
//! The backend runs a graph of processing nodes (VAD, STT, LLM, TTS, human
//! endpoints). This module discovers that graph after joining a room, exposes
//! each node's typed pads, and routes inbound tracks and reliable messages to
//! the right pad.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                         FLOW ENGINE ARCHITECTURE                             │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  Transport (room: tracks, reliable data, metadata)                           │
//! │         │                                                                    │
//! │         ▼                                                                    │
//! │  Engine event loop ──► Discovery (metadata | node_discovery push)            │
//! │         │                      │                                             │
//! │         │                      ▼                                             │
//! │         │              Node registry ──► Node ──► Pad                        │
//! │         ▼                                          ▲                         │
//! │  Routing (identity resolution, TTS fallback) ──────┘                         │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Wire envelope
//!
//! Pads exchange reliable messages shaped as
//! `{nodeId, padId, type: "trigger" | "data" | "stream", payload, timestamp}`.
//! The backend announces its graph with
//! `{type: "node_discovery", nodes: [{id, type, pads: [...]}]}`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waav_flow::config::FlowConfig;
//! use waav_flow::flow::prelude::*;
//!
//! # async fn run(transport: Arc<dyn Transport>) -> FlowResult<()> {
//! let engine = Engine::new(transport, FlowConfig::default());
//! engine.events().on(EngineEvent::NODES_DISCOVERED, |_| println!("graph ready"));
//! engine
//!     .connect(ConnectionDetails::new("wss://example.livekit.cloud", "token"))
//!     .await?;
//!
//! if let Some(pad) = engine.find_pad("vad", "speech_started") {
//!     pad.events().on(PadEvent::TRIGGER_RECEIVED, |event| println!("{event:?}"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod node;
pub mod pad;
pub mod routing;
pub mod transport;
pub mod types;

pub use discovery::{DiscoveryProtocol, NodeSpec, PadSpec};
pub use engine::Engine;
pub use error::{FlowError, FlowResult};
pub use events::{EngineEvent, EventBus, ListenerId, NodeEvent, PadEvent};
pub use media::{MediaEnvironment, MediaStream, MediaTrack};
pub use node::Node;
pub use pad::{EnableOptions, Pad, PadContext, PadPayload};
pub use transport::{Transport, TransportError, TransportEvent};
pub use types::{
    ConnectionDetails, ConnectionState, PadDataType, PadDirection, PadMessage, PadMessageKind,
    RunState, SubscribeState, TrackKind, TrackSource,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::discovery::DiscoveryProtocol;
    pub use super::engine::Engine;
    pub use super::error::{FlowError, FlowResult};
    pub use super::events::{EngineEvent, NodeEvent, PadEvent};
    pub use super::media::{CaptureOptions, MediaEnvironment, MediaStream, MediaTrack};
    pub use super::node::Node;
    pub use super::pad::{EnableOptions, Pad, PadPayload};
    pub use super::transport::{Transport, TransportEvent};
    pub use super::types::{
        ConnectionDetails, ConnectionState, PadDataType, PadDirection, RunState, TrackKind,
    };
}
