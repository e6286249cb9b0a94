//! Workflow nodes
//!
//! A node is a named, typed container of pads. Its type is free text
//! assigned by the backend (`vad`, `tts`, `human`, ...), not a closed enum.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::error::{FlowError, FlowResult};
use super::events::{EventBus, NodeEvent};
use super::pad::Pad;
use super::types::{PadDataType, PadDirection};

pub struct Node {
    id: String,
    node_type: String,
    pads: RwLock<HashMap<String, Arc<Pad>>>,
    events: EventBus<NodeEvent>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            pads: RwLock::new(HashMap::new()),
            events: EventBus::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Case-insensitive type comparison
    pub fn is_type(&self, role: &str) -> bool {
        self.node_type.eq_ignore_ascii_case(role)
    }

    pub fn events(&self) -> &EventBus<NodeEvent> {
        &self.events
    }

    /// Attach a pad. Rejects ids already present on this node.
    pub fn add_pad(&self, pad: Arc<Pad>) -> FlowResult<()> {
        let mut pads = self.pads.write();
        if pads.contains_key(pad.id()) {
            return Err(FlowError::DuplicatePad {
                node_id: self.id.clone(),
                pad_id: pad.id().to_string(),
            });
        }
        pads.insert(pad.id().to_string(), pad);
        Ok(())
    }

    pub fn get_pad(&self, id: &str) -> Option<Arc<Pad>> {
        self.pads.read().get(id).cloned()
    }

    pub fn pads(&self) -> Vec<Arc<Pad>> {
        self.pads.read().values().cloned().collect()
    }

    pub fn pad_count(&self) -> usize {
        self.pads.read().len()
    }

    pub fn get_source_pads(&self) -> Vec<Arc<Pad>> {
        self.filter_pads(|p| p.direction() == PadDirection::Source)
    }

    pub fn get_sink_pads(&self) -> Vec<Arc<Pad>> {
        self.filter_pads(|p| p.direction() == PadDirection::Sink)
    }

    /// Sink pads, optionally restricted to one data type
    pub fn get_input_pads(&self, data_type: Option<&PadDataType>) -> Vec<Arc<Pad>> {
        self.filter_pads(|p| {
            p.direction() == PadDirection::Sink && data_type.is_none_or(|t| p.data_type() == t)
        })
    }

    /// Source pads, optionally restricted to one data type
    pub fn get_output_pads(&self, data_type: Option<&PadDataType>) -> Vec<Arc<Pad>> {
        self.filter_pads(|p| {
            p.direction() == PadDirection::Source && data_type.is_none_or(|t| p.data_type() == t)
        })
    }

    /// Look a pad up by display name (case-insensitive), direction and type
    pub fn get_pad_by_name(
        &self,
        name: &str,
        direction: PadDirection,
        data_type: &PadDataType,
    ) -> Option<Arc<Pad>> {
        self.pads
            .read()
            .values()
            .find(|p| {
                p.direction() == direction
                    && p.data_type() == data_type
                    && p.name().eq_ignore_ascii_case(name)
            })
            .cloned()
    }

    pub fn get_audio_source_pad_by_name(&self, name: &str) -> Option<Arc<Pad>> {
        self.get_pad_by_name(name, PadDirection::Source, &PadDataType::Audio)
    }

    pub fn get_audio_sink_pad_by_name(&self, name: &str) -> Option<Arc<Pad>> {
        self.get_pad_by_name(name, PadDirection::Sink, &PadDataType::Audio)
    }

    pub fn get_video_source_pad_by_name(&self, name: &str) -> Option<Arc<Pad>> {
        self.get_pad_by_name(name, PadDirection::Source, &PadDataType::Video)
    }

    pub fn get_video_sink_pad_by_name(&self, name: &str) -> Option<Arc<Pad>> {
        self.get_pad_by_name(name, PadDirection::Sink, &PadDataType::Video)
    }

    pub fn get_trigger_source_pad_by_name(&self, name: &str) -> Option<Arc<Pad>> {
        self.get_pad_by_name(name, PadDirection::Source, &PadDataType::Trigger)
    }

    pub fn get_data_source_pad_by_name(&self, name: &str) -> Option<Arc<Pad>> {
        self.get_pad_by_name(name, PadDirection::Source, &PadDataType::Data)
    }

    pub fn get_data_sink_pad_by_name(&self, name: &str) -> Option<Arc<Pad>> {
        self.get_pad_by_name(name, PadDirection::Sink, &PadDataType::Data)
    }

    /// Clean up every pad, then forget them
    pub async fn cleanup(&self) {
        let pads: Vec<Arc<Pad>> = self.pads.read().values().cloned().collect();
        for pad in &pads {
            pad.cleanup().await;
        }
        self.pads.write().clear();
        self.events.clear();
        debug!(node_id = %self.id, pads = pads.len(), "Node cleaned up");
    }

    fn filter_pads(&self, predicate: impl Fn(&Pad) -> bool) -> Vec<Arc<Pad>> {
        self.pads
            .read()
            .values()
            .filter(|p| predicate(p))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("node_type", &self.node_type)
            .field("pads", &self.pads.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::discovery::PadSpec;
    use crate::flow::pad::PadContext;

    fn pad(node: &str, id: &str, direction: PadDirection, data_type: PadDataType) -> Arc<Pad> {
        Arc::new(Pad::new(
            node,
            PadSpec::new(id, direction, data_type),
            &PadContext::default(),
        ))
    }

    fn sample_node() -> Node {
        let node = Node::new("n1", "vad");
        node.add_pad(pad("n1", "audio_in", PadDirection::Sink, PadDataType::Audio))
            .unwrap();
        node.add_pad(pad("n1", "speech_started", PadDirection::Source, PadDataType::Trigger))
            .unwrap();
        node.add_pad(pad("n1", "speech_ended", PadDirection::Source, PadDataType::Trigger))
            .unwrap();
        node
    }

    #[test]
    fn test_add_pad_rejects_duplicate_id() {
        let node = sample_node();
        let err = node
            .add_pad(pad("n1", "audio_in", PadDirection::Source, PadDataType::Audio))
            .unwrap_err();
        assert!(matches!(err, FlowError::DuplicatePad { .. }));
        assert_eq!(node.pad_count(), 3);
        assert!(node.get_pad("audio_in").unwrap().is_sink_pad());
    }

    #[test]
    fn test_direction_queries() {
        let node = sample_node();
        assert_eq!(node.get_source_pads().len(), 2);
        assert_eq!(node.get_sink_pads().len(), 1);
        assert_eq!(node.get_output_pads(Some(&PadDataType::Trigger)).len(), 2);
        assert!(node.get_output_pads(Some(&PadDataType::Audio)).is_empty());
        assert_eq!(node.get_input_pads(None).len(), 1);
    }

    #[test]
    fn test_name_lookup_uses_display_name() {
        let node = sample_node();
        let found = node.get_audio_sink_pad_by_name("audio in").unwrap();
        assert_eq!(found.id(), "audio_in");
        assert!(node.get_audio_sink_pad_by_name("audio_in").is_none());
        assert!(node.get_audio_source_pad_by_name("Audio In").is_none());
        assert!(node.get_trigger_source_pad_by_name("Speech Started").is_some());
    }

    #[tokio::test]
    async fn test_cleanup_clears_pads() {
        let node = sample_node();
        node.cleanup().await;
        assert_eq!(node.pad_count(), 0);
        node.cleanup().await;
    }
}
