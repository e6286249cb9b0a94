//! Graph discovery
//!
//! Decodes out-of-band graph descriptions into [`NodeSpec`]s. Two variants
//! exist and a session uses exactly one of them:
//!
//! - **Room metadata** (`DiscoveryProtocol::Metadata`): a JSON blob on the
//!   room, read once during connect. Pad maps either carry explicit
//!   direction/type or are inferred from key suffixes (`_source`, `_sink`,
//!   `_trigger`, `_ref`). Nodes without a pad map get a per-type template.
//! - **Data push** (`DiscoveryProtocol::Push`): a `node_discovery` message on
//!   the reliable channel listing nodes and pads. Direction is derived from
//!   the backend pad type (`...Source...` / `...Sink...`).
//!
//! Everything here is a pure function over strings and JSON; the engine owns
//! materialisation into nodes and pads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{NODE_DISCOVERY_TYPE, PadDataType, PadDirection};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Room metadata is empty")]
    EmptyMetadata,

    #[error("Invalid discovery JSON: {0}")]
    InvalidJson(String),

    #[error("No flow description found in room metadata")]
    MissingFlow,

    #[error("Not a node discovery message")]
    NotDiscovery,
}

/// Which discovery source a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryProtocol {
    /// Graph read from room metadata during connect
    Metadata,
    /// Graph pushed by the backend as a `node_discovery` data message
    #[default]
    Push,
}

impl FromStr for DiscoveryProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metadata" | "room_metadata" | "legacy" => Ok(Self::Metadata),
            "push" | "data" | "node_discovery" => Ok(Self::Push),
            other => Err(format!("unknown discovery protocol '{other}'")),
        }
    }
}

/// Decoded description of one pad
#[derive(Debug, Clone, PartialEq)]
pub struct PadSpec {
    pub id: String,
    pub name: String,
    pub direction: PadDirection,
    pub data_type: PadDataType,
    pub backend_type: Option<String>,
    pub category: Option<String>,
    pub value: Option<Value>,
    pub allowed_types: Vec<String>,
    pub next_pads: Vec<String>,
    pub previous_pad: Option<String>,
}

impl PadSpec {
    pub fn new(id: impl Into<String>, direction: PadDirection, data_type: PadDataType) -> Self {
        let id = id.into();
        Self {
            name: display_name_from_id(&id),
            id,
            direction,
            data_type,
            backend_type: None,
            category: None,
            value: None,
            allowed_types: Vec::new(),
            next_pads: Vec::new(),
            previous_pad: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// Decoded description of one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub id: String,
    pub node_type: String,
    pub pads: Vec<PadSpec>,
}

// =============================================================================
// Naming conventions
// =============================================================================

/// Infer direction and data type from a pad key suffix.
///
/// Returns `None` for keys that are configuration parameters, not pads.
pub fn infer_pad_from_key(key: &str) -> Option<(PadDirection, PadDataType)> {
    let (base, direction) = split_pad_suffix(key)?;
    let data_type = match key.rsplit('_').next() {
        Some("trigger") => PadDataType::Trigger,
        Some("ref") => PadDataType::Data,
        _ => infer_data_type(base),
    };
    Some((direction, data_type))
}

/// Guess a data type from substrings of a pad name
pub fn infer_data_type(name: &str) -> PadDataType {
    let lower = name.to_ascii_lowercase();
    if lower.contains("audio") {
        PadDataType::Audio
    } else if lower.contains("video") {
        PadDataType::Video
    } else if lower.contains("text") {
        PadDataType::Text
    } else {
        PadDataType::Data
    }
}

/// Strip a pad suffix, returning the remaining name and the implied direction
fn split_pad_suffix(key: &str) -> Option<(&str, PadDirection)> {
    const SUFFIXES: [(&str, PadDirection); 4] = [
        ("_source", PadDirection::Source),
        ("_sink", PadDirection::Sink),
        ("_trigger", PadDirection::Source),
        ("_ref", PadDirection::Sink),
    ];
    SUFFIXES
        .iter()
        .find_map(|(suffix, direction)| key.strip_suffix(suffix).map(|base| (base, *direction)))
}

/// Derive direction from a backend pad type such as `PropertySourcePad`
pub fn direction_from_backend_type(pad_type: &str) -> PadDirection {
    if pad_type.contains("Source") {
        PadDirection::Source
    } else if pad_type.contains("Sink") {
        PadDirection::Sink
    } else {
        PadDirection::Unknown
    }
}

/// `audio_in-left` -> `Audio In Left`. Only the first letter of each word
/// changes case.
pub fn display_name_from_id(id: &str) -> String {
    id.split(['_', '-', '.', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Last-resort pad set for a node type with no pad map at all
pub fn node_template(node_type: &str) -> Vec<PadSpec> {
    use PadDataType::*;
    use PadDirection::*;

    let pads: &[(&str, PadDirection, PadDataType)] =
        match node_type.to_ascii_lowercase().as_str() {
            "human" => &[("audio_out", Source, Audio), ("video_out", Source, Video)],
            "vad" => &[
                ("audio_in", Sink, Audio),
                ("speech_started", Source, Trigger),
                ("speech_ended", Source, Trigger),
            ],
            "stt" => &[("audio_in", Sink, Audio), ("text_out", Source, Text)],
            "llm" => &[("text_in", Sink, Text), ("text_out", Source, Text)],
            "tts" => &[("text_in", Sink, Text), ("audio_out", Source, Audio)],
            "output" => &[("audio_in", Sink, Audio), ("video_in", Sink, Video)],
            _ => &[],
        };

    pads.iter()
        .map(|(id, direction, data_type)| PadSpec::new(*id, *direction, data_type.clone()))
        .collect()
}

// =============================================================================
// Room metadata
// =============================================================================

/// Decode the room metadata blob into node descriptions
pub fn parse_room_metadata(metadata: &str) -> Result<Vec<NodeSpec>, DiscoveryError> {
    if metadata.trim().is_empty() {
        return Err(DiscoveryError::EmptyMetadata);
    }
    let root: Value =
        serde_json::from_str(metadata).map_err(|e| DiscoveryError::InvalidJson(e.to_string()))?;

    let definitions = flow_node_definitions(&root).ok_or(DiscoveryError::MissingFlow)?;

    Ok(definitions
        .into_iter()
        .filter_map(|definition| match definition.as_object() {
            Some(object) => parse_node_definition(object),
            None => {
                warn!("Skipping non-object node definition in room metadata");
                None
            }
        })
        .collect())
}

/// Node definitions from `app.flows[].nodes`, `flows[].nodes`, or the
/// legacy single `flow.nodes`
fn flow_node_definitions(root: &Value) -> Option<Vec<&Value>> {
    let flows = root
        .pointer("/app/flows")
        .or_else(|| root.get("flows"))
        .and_then(Value::as_array);

    if let Some(flows) = flows {
        let nodes: Vec<&Value> = flows
            .iter()
            .filter_map(|flow| flow.get("nodes").and_then(Value::as_array))
            .flatten()
            .collect();
        return Some(nodes);
    }

    root.pointer("/flow/nodes")
        .or_else(|| root.pointer("/app/flow/nodes"))
        .and_then(Value::as_array)
        .map(|nodes| nodes.iter().collect())
}

fn string_field<'a>(
    object: &'a Map<String, Value>,
    primary: &str,
    fallback: &str,
) -> Option<&'a str> {
    object
        .get(primary)
        .and_then(Value::as_str)
        .or_else(|| object.get(fallback).and_then(Value::as_str))
}

fn parse_node_definition(object: &Map<String, Value>) -> Option<NodeSpec> {
    let Some(id) = string_field(object, "id", "node_id") else {
        warn!("Skipping node definition without an id");
        return None;
    };
    let node_type = string_field(object, "type", "node_type").unwrap_or("unknown");

    let pad_map = object.get("pad_data").or_else(|| object.get("pads"));
    let pads = match pad_map {
        Some(Value::Object(map)) => parse_pad_map(map),
        Some(_) => {
            warn!(node_id = %id, "Pad map is not an object, using type template");
            node_template(node_type)
        }
        None => node_template(node_type),
    };

    Some(NodeSpec {
        id: id.to_string(),
        node_type: node_type.to_string(),
        pads,
    })
}

fn parse_pad_map(map: &Map<String, Value>) -> Vec<PadSpec> {
    let mut pads = Vec::new();
    for (key, entry) in map {
        if let Some(spec) = explicit_pad(key, entry) {
            pads.push(spec);
            continue;
        }
        let Some((direction, data_type)) = infer_pad_from_key(key) else {
            debug!(key = %key, "Treating pad map key as configuration parameter");
            continue;
        };
        let base = split_pad_suffix(key).map_or(key.as_str(), |(base, _)| base);
        let mut spec = PadSpec::new(key.as_str(), direction, data_type)
            .with_name(display_name_from_id(base));
        if let Some(value) = entry.get("value") {
            spec.value = Some(value.clone());
        }
        pads.push(spec);
    }
    pads
}

/// Rich metadata entries declare their own direction and type
fn explicit_pad(key: &str, entry: &Value) -> Option<PadSpec> {
    let object = entry.as_object()?;
    let direction = PadDirection::parse(object.get("direction")?.as_str()?);
    let data_type = string_field(object, "data_type", "type")
        .map(PadDataType::parse)
        .unwrap_or_else(|| infer_data_type(key));

    let mut spec = PadSpec::new(key, direction, data_type);
    if let Some(name) = object.get("name").and_then(Value::as_str) {
        spec.name = name.to_string();
    }
    spec.category = object
        .get("category")
        .and_then(Value::as_str)
        .map(str::to_string);
    spec.value = object.get("value").cloned();
    spec.allowed_types = string_list(object.get("allowed_types"));
    Some(spec)
}

// =============================================================================
// Push discovery
// =============================================================================

#[derive(Debug, Deserialize)]
struct NodeDiscoveryMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    nodes: Vec<DiscoveredNode>,
}

#[derive(Debug, Deserialize)]
struct DiscoveredNode {
    id: String,
    #[serde(rename = "type", default)]
    node_type: String,
    #[serde(default)]
    pads: Vec<DiscoveredPad>,
}

#[derive(Debug, Deserialize)]
struct DiscoveredPad {
    id: String,
    #[serde(rename = "type", default)]
    pad_type: String,
    #[serde(default)]
    data_type: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    allowed_types: Option<Value>,
    #[serde(default)]
    next_pads: Option<Value>,
    #[serde(default)]
    previous_pad: Option<Value>,
    #[serde(default)]
    category: Option<String>,
}

/// Whether an inbound envelope is a discovery push
pub fn is_node_discovery(message: &Value) -> bool {
    message.get("type").and_then(Value::as_str) == Some(NODE_DISCOVERY_TYPE)
}

/// Decode a `node_discovery` push into node descriptions
pub fn parse_node_discovery(message: &Value) -> Result<Vec<NodeSpec>, DiscoveryError> {
    let decoded: NodeDiscoveryMessage = serde_json::from_value(message.clone())
        .map_err(|e| DiscoveryError::InvalidJson(e.to_string()))?;
    if decoded.kind != NODE_DISCOVERY_TYPE {
        return Err(DiscoveryError::NotDiscovery);
    }

    Ok(decoded
        .nodes
        .into_iter()
        .map(|node| NodeSpec {
            pads: node.pads.into_iter().map(pad_from_push).collect(),
            id: node.id,
            node_type: node.node_type,
        })
        .collect())
}

fn pad_from_push(pad: DiscoveredPad) -> PadSpec {
    let direction = direction_from_backend_type(&pad.pad_type);
    let data_type = pad
        .data_type
        .as_deref()
        .map(PadDataType::parse)
        .unwrap_or(PadDataType::Data);

    let mut spec = PadSpec::new(pad.id, direction, data_type);
    spec.backend_type = Some(pad.pad_type).filter(|t| !t.is_empty());
    spec.category = pad.category;
    spec.value = pad.value;
    spec.allowed_types = string_list(pad.allowed_types.as_ref());
    spec.next_pads = string_list(pad.next_pads.as_ref());
    spec.previous_pad = pad.previous_pad.as_ref().and_then(pad_reference);
    spec
}

/// Topology references arrive either as bare ids or as `{id: ...}` objects
fn pad_reference(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Object(object) => object
            .get("id")
            .or_else(|| object.get("pad_id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(pad_reference).collect(),
        Some(other) => pad_reference(other).into_iter().collect(),
        None => Vec::new(),
    }
}
