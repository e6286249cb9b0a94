//! Shared enums and wire types for the flow layer
//!
//! Pad direction and data type are open-ended across protocol versions, so
//! both parse leniently from backend strings instead of failing on unknown
//! values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved envelope type for backend graph pushes
pub const NODE_DISCOVERY_TYPE: &str = "node_discovery";

/// Direction of a pad relative to its node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadDirection {
    /// Emits or publishes outward
    Source,
    /// Receives or consumes
    Sink,
    /// Backend type carried neither marker; the pad is unroutable
    Unknown,
}

impl PadDirection {
    /// Parse an explicit direction label (`source`/`output`, `sink`/`input`)
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "source" | "output" | "out" => Self::Source,
            "sink" | "input" | "in" => Self::Sink,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PadDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PadDirection::Source => write!(f, "source"),
            PadDirection::Sink => write!(f, "sink"),
            PadDirection::Unknown => write!(f, "unknown"),
        }
    }
}

/// Kind of data a pad carries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PadDataType {
    Audio,
    Video,
    Trigger,
    Data,
    Text,
    Boolean,
    Integer,
    Number,
    /// Any type introduced by a newer backend
    Other(String),
}

impl PadDataType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "audio" => Self::Audio,
            "video" => Self::Video,
            "trigger" => Self::Trigger,
            "data" | "json" | "" => Self::Data,
            "text" | "string" => Self::Text,
            "boolean" | "bool" => Self::Boolean,
            "integer" | "int" => Self::Integer,
            "number" | "float" => Self::Number,
            other => Self::Other(other.to_string()),
        }
    }

    /// Media kind carried by this pad, if it is a media pad
    pub fn track_kind(&self) -> Option<TrackKind> {
        match self {
            Self::Audio => Some(TrackKind::Audio),
            Self::Video => Some(TrackKind::Video),
            _ => None,
        }
    }

    pub fn is_media(&self) -> bool {
        self.track_kind().is_some()
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Trigger => "trigger",
            Self::Data => "data",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for PadDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PadDataType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PadDataType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn data_type(&self) -> PadDataType {
        match self {
            TrackKind::Audio => PadDataType::Audio,
            TrackKind::Video => PadDataType::Video,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Source tag attached to a published track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackSource {
    Microphone,
    Camera,
    #[default]
    Unknown,
}

impl TrackSource {
    pub fn for_kind(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => TrackSource::Microphone,
            TrackKind::Video => TrackSource::Camera,
        }
    }
}

/// Engine connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Engine run state, tracked independently of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Starting => write!(f, "starting"),
            RunState::Running => write!(f, "running"),
            RunState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Inbound subscription state of a pad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscribeState {
    #[default]
    Unsubscribed,
    Subscribed,
}

/// Message kind carried in the reliable-channel envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadMessageKind {
    Trigger,
    Data,
    Stream,
}

impl PadMessageKind {
    /// Unknown kinds are treated as data
    pub fn parse(value: &str) -> Self {
        match value {
            "trigger" => Self::Trigger,
            "stream" => Self::Stream,
            _ => Self::Data,
        }
    }
}

/// Reliable-channel envelope exchanged with the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PadMessage {
    pub node_id: String,
    pub pad_id: String,
    #[serde(rename = "type")]
    pub kind: PadMessageKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: u64,
}

impl PadMessage {
    pub fn new(
        node_id: impl Into<String>,
        pad_id: impl Into<String>,
        kind: PadMessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            pad_id: pad_id.into(),
            kind,
            payload,
            timestamp: now_millis(),
        }
    }
}

/// Connection details handed out by the session API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDetails {
    pub url: String,
    pub token: String,
}

impl ConnectionDetails {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
