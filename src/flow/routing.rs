//! Inbound routing: transport events to nodes and pads
//!
//! Identity resolution runs in a fixed priority order:
//!
//! 1. Reserved publisher identities (`human`, `publisher`) map to the first
//!    node of the publisher role.
//! 2. The `node-<id>` prefix convention.
//! 3. Exact match against a registered node id.
//! 4. The first registered node id contained in the identity.
//!
//! Audio tracks that resolve to nothing may still be routed to a TTS node
//! when they look like agent speech. All functions here are pure over the
//! registry snapshot handed in by the engine.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use super::discovery::is_node_discovery;
use super::node::Node;
use super::transport::{ParticipantInfo, TrackPublicationInfo};
use super::types::{PadDataType, PadMessageKind, TrackKind, TrackSource};
use crate::config::FlowConfig;

/// Strategy that resolved a participant identity to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMatch {
    PublisherIdentity,
    NodePrefix,
    Exact,
    Substring,
}

/// Role names and identity conventions used during routing
#[derive(Debug, Clone)]
pub struct RoutingRules {
    pub publisher_role: String,
    pub publisher_identities: Vec<String>,
    pub tts_role: String,
    pub node_identity_prefix: String,
    pub agent_identity_prefix: String,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self::from_config(&FlowConfig::default())
    }
}

impl RoutingRules {
    pub fn from_config(config: &FlowConfig) -> Self {
        Self {
            publisher_role: config.publisher_role.clone(),
            publisher_identities: config.publisher_identities.clone(),
            tts_role: config.tts_role.clone(),
            node_identity_prefix: config.node_identity_prefix.clone(),
            agent_identity_prefix: config.agent_identity_prefix.clone(),
        }
    }

    /// Resolve the node owning a remote participant's tracks
    pub fn resolve_node<'a>(
        &self,
        identity: &str,
        nodes: &'a [Arc<Node>],
    ) -> Option<(&'a Arc<Node>, IdentityMatch)> {
        if self
            .publisher_identities
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(identity))
        {
            if let Some(node) = nodes.iter().find(|n| n.is_type(&self.publisher_role)) {
                return Some((node, IdentityMatch::PublisherIdentity));
            }
        }

        if !self.node_identity_prefix.is_empty() {
            if let Some((_, rest)) = identity.split_once(self.node_identity_prefix.as_str()) {
                if let Some(node) = nodes.iter().find(|n| n.id() == rest) {
                    return Some((node, IdentityMatch::NodePrefix));
                }
            }
        }

        if let Some(node) = nodes.iter().find(|n| n.id() == identity) {
            return Some((node, IdentityMatch::Exact));
        }

        nodes
            .iter()
            .find(|n| !n.id().is_empty() && identity.contains(n.id()))
            .map(|node| (node, IdentityMatch::Substring))
    }

    /// Whether an unresolved track looks like synthesized agent speech
    pub fn is_tts_candidate(
        &self,
        kind: TrackKind,
        publication: &TrackPublicationInfo,
        participant: &ParticipantInfo,
    ) -> bool {
        if kind != TrackKind::Audio {
            return false;
        }
        participant.is_agent
            || publication.source == TrackSource::Microphone
            || (!self.agent_identity_prefix.is_empty()
                && participant.identity.starts_with(&self.agent_identity_prefix))
    }

    /// First TTS-role node exposing an audio source pad
    pub fn tts_fallback_node<'a>(&self, nodes: &'a [Arc<Node>]) -> Option<&'a Arc<Node>> {
        nodes.iter().find(|n| {
            n.is_type(&self.tts_role) && !n.get_output_pads(Some(&PadDataType::Audio)).is_empty()
        })
    }
}

// =============================================================================
// Inbound reliable messages
// =============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InboundError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Message carries neither a discovery type nor a nodeId")]
    MissingNodeId,
}

/// Decoded reliable-channel message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `node_discovery` push, handed to discovery as-is
    Discovery(Value),
    /// Envelope addressed to a node and optionally one of its pads.
    /// `message` is the whole decoded envelope.
    Pad {
        node_id: String,
        pad_id: Option<String>,
        kind: PadMessageKind,
        message: Value,
    },
}

/// Decode a reliable-channel payload
pub fn decode_inbound(payload: &[u8]) -> Result<InboundMessage, InboundError> {
    let message: Value =
        serde_json::from_slice(payload).map_err(|e| InboundError::InvalidJson(e.to_string()))?;
    if !message.is_object() {
        return Err(InboundError::NotAnObject);
    }
    if is_node_discovery(&message) {
        return Ok(InboundMessage::Discovery(message));
    }

    let node_id = message
        .get("nodeId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(InboundError::MissingNodeId)?
        .to_string();
    let pad_id = message
        .get("padId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let kind = message
        .get("type")
        .and_then(Value::as_str)
        .map_or(PadMessageKind::Data, PadMessageKind::parse);

    Ok(InboundMessage::Pad {
        node_id,
        pad_id,
        kind,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::discovery::PadSpec;
    use crate::flow::pad::{Pad, PadContext};
    use crate::flow::types::PadDirection;
    use serde_json::json;

    fn node(id: &str, node_type: &str) -> Arc<Node> {
        Arc::new(Node::new(id, node_type))
    }

    fn tts_node(id: &str) -> Arc<Node> {
        let node = node(id, "TTS");
        node.add_pad(Arc::new(Pad::new(
            id,
            PadSpec::new("audio_out", PadDirection::Source, PadDataType::Audio),
            &PadContext::default(),
        )))
        .unwrap();
        node
    }

    fn publication(source: TrackSource) -> TrackPublicationInfo {
        TrackPublicationInfo {
            sid: "TR_1".to_string(),
            name: "track".to_string(),
            kind: TrackKind::Audio,
            source,
        }
    }

    #[test]
    fn test_publisher_identity_maps_to_role() {
        let rules = RoutingRules::default();
        let nodes = vec![node("vad-1", "vad"), node("h1", "human")];

        let (found, strategy) = rules.resolve_node("publisher", &nodes).unwrap();
        assert_eq!(found.id(), "h1");
        assert_eq!(strategy, IdentityMatch::PublisherIdentity);

        let (found, _) = rules.resolve_node("Human", &nodes).unwrap();
        assert_eq!(found.id(), "h1");
    }

    #[test]
    fn test_publisher_identity_without_role_falls_through() {
        let rules = RoutingRules::default();
        let nodes = vec![node("human", "vad")];
        let (found, strategy) = rules.resolve_node("human", &nodes).unwrap();
        assert_eq!(found.id(), "human");
        assert_eq!(strategy, IdentityMatch::Exact);
    }

    #[test]
    fn test_node_prefix_then_exact_then_substring() {
        let rules = RoutingRules::default();
        let nodes = vec![node("llm", "llm"), node("tts1", "tts")];

        assert_eq!(
            rules.resolve_node("node-tts1", &nodes).map(|(n, s)| (n.id(), s)),
            Some(("tts1", IdentityMatch::NodePrefix))
        );
        assert_eq!(
            rules.resolve_node("llm", &nodes).map(|(n, s)| (n.id(), s)),
            Some(("llm", IdentityMatch::Exact))
        );
        assert_eq!(
            rules.resolve_node("agent-tts1-worker", &nodes).map(|(n, s)| (n.id(), s)),
            Some(("tts1", IdentityMatch::Substring))
        );
        assert!(rules.resolve_node("stranger", &nodes).is_none());
    }

    #[test]
    fn test_prefix_with_unknown_id_falls_back_to_substring() {
        let rules = RoutingRules::default();
        let nodes = vec![node("n1", "vad")];
        let (found, strategy) = rules.resolve_node("node-n1-extra", &nodes).unwrap();
        assert_eq!(found.id(), "n1");
        assert_eq!(strategy, IdentityMatch::Substring);
    }

    #[test]
    fn test_tts_candidate_heuristics() {
        let rules = RoutingRules::default();
        let person = ParticipantInfo::new("someone");

        assert!(rules.is_tts_candidate(
            TrackKind::Audio,
            &publication(TrackSource::Unknown),
            &ParticipantInfo::agent("worker")
        ));
        assert!(rules.is_tts_candidate(
            TrackKind::Audio,
            &publication(TrackSource::Microphone),
            &person
        ));
        assert!(rules.is_tts_candidate(
            TrackKind::Audio,
            &publication(TrackSource::Unknown),
            &ParticipantInfo::new("agent-42")
        ));
        assert!(!rules.is_tts_candidate(
            TrackKind::Audio,
            &publication(TrackSource::Unknown),
            &person
        ));
        assert!(!rules.is_tts_candidate(
            TrackKind::Video,
            &publication(TrackSource::Microphone),
            &ParticipantInfo::agent("worker")
        ));
    }

    #[test]
    fn test_tts_fallback_picks_first_with_audio_source() {
        let rules = RoutingRules::default();
        let nodes = vec![node("tts0", "tts"), tts_node("tts1"), tts_node("tts2")];
        assert_eq!(rules.tts_fallback_node(&nodes).unwrap().id(), "tts1");
        assert!(rules.tts_fallback_node(&nodes[..1]).is_none());
    }

    #[test]
    fn test_decode_pad_message() {
        let payload = json!({"nodeId": "n1", "padId": "p1", "type": "trigger", "payload": {"x": 1}, "timestamp": 123});
        let decoded = decode_inbound(payload.to_string().as_bytes()).unwrap();
        assert_eq!(
            decoded,
            InboundMessage::Pad {
                node_id: "n1".to_string(),
                pad_id: Some("p1".to_string()),
                kind: PadMessageKind::Trigger,
                message: payload,
            }
        );
    }

    #[test]
    fn test_decode_defaults_to_data() {
        let decoded = decode_inbound(br#"{"nodeId": "n1", "type": "weird"}"#).unwrap();
        match decoded {
            InboundMessage::Pad { pad_id, kind, .. } => {
                assert_eq!(pad_id, None);
                assert_eq!(kind, PadMessageKind::Data);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_discovery_and_failures() {
        assert!(matches!(
            decode_inbound(br#"{"type": "node_discovery", "nodes": []}"#),
            Ok(InboundMessage::Discovery(_))
        ));
        assert!(matches!(
            decode_inbound(b"\xff\x00"),
            Err(InboundError::InvalidJson(_))
        ));
        assert_eq!(decode_inbound(b"[1, 2]"), Err(InboundError::NotAnObject));
        assert_eq!(
            decode_inbound(br#"{"padId": "p1"}"#),
            Err(InboundError::MissingNodeId)
        );
    }
}
