use std::env;

use super::FlowConfig;
use crate::flow::DiscoveryProtocol;

pub(crate) const ENV_PREFIX: &str = "WAAV_FLOW_";

fn var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Comma-separated list, empty entries dropped
fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Overlay `WAAV_FLOW_*` environment variables onto `base`.
///
/// `LIVEKIT_URL` is honoured when `WAAV_FLOW_URL` is unset.
pub(crate) fn apply_env(mut base: FlowConfig) -> Result<FlowConfig, Box<dyn std::error::Error>> {
    if let Some(url) = var("URL").or_else(|| env::var("LIVEKIT_URL").ok().filter(|v| !v.is_empty()))
    {
        base.url = Some(url);
    }
    if let Some(token) = var("TOKEN") {
        base.token = Some(token);
    }
    if let Some(protocol) = var("DISCOVERY") {
        base.discovery = protocol
            .parse::<DiscoveryProtocol>()
            .map_err(|e| format!("Invalid {ENV_PREFIX}DISCOVERY: {e}"))?;
    }
    if let Some(role) = var("PUBLISHER_ROLE") {
        base.publisher_role = role;
    }
    if let Some(identities) = var("PUBLISHER_IDENTITIES") {
        base.publisher_identities = list(&identities);
    }
    if let Some(role) = var("TTS_ROLE") {
        base.tts_role = role;
    }
    if let Some(prefix) = var("NODE_IDENTITY_PREFIX") {
        base.node_identity_prefix = prefix;
    }
    if let Some(prefix) = var("AGENT_IDENTITY_PREFIX") {
        base.agent_identity_prefix = prefix;
    }
    if let Some(topic) = var("DATA_TOPIC") {
        base.data_topic = Some(topic);
    }
    if let Some(timeout) = var("CONNECT_TIMEOUT_MS") {
        base.connect_timeout_ms = timeout
            .parse()
            .map_err(|e| format!("Invalid {ENV_PREFIX}CONNECT_TIMEOUT_MS '{timeout}': {e}"))?;
    }
    if let Some(level) = var("LOG_LEVEL") {
        base.log_level = level;
    }
    Ok(base)
}
