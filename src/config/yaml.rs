use serde::Deserialize;
use std::path::Path;

use super::FlowConfig;
use crate::flow::DiscoveryProtocol;

/// Complete YAML configuration structure
///
/// All fields are optional so a file may override only part of the
/// configuration. Values present here win over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// connection:
///   url: "wss://example.livekit.cloud"
///   token: "participant-token"
///   connect_timeout_ms: 10000
///
/// discovery:
///   protocol: "push"
///
/// routing:
///   publisher_role: "human"
///   publisher_identities: ["human", "publisher"]
///   tts_role: "tts"
///   node_identity_prefix: "node-"
///   agent_identity_prefix: "agent"
///
/// data_topic: "flow"
/// log_level: "debug"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub connection: Option<ConnectionYaml>,
    pub discovery: Option<DiscoveryYaml>,
    pub routing: Option<RoutingYaml>,
    pub data_topic: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionYaml {
    pub url: Option<String>,
    pub token: Option<String>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DiscoveryYaml {
    pub protocol: Option<DiscoveryProtocol>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RoutingYaml {
    pub publisher_role: Option<String>,
    pub publisher_identities: Option<Vec<String>>,
    pub tts_role: Option<String>,
    pub node_identity_prefix: Option<String>,
    pub agent_identity_prefix: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }

    /// Overlay the values present in this file onto `base`
    pub fn apply(self, mut base: FlowConfig) -> FlowConfig {
        if let Some(connection) = self.connection {
            if connection.url.is_some() {
                base.url = connection.url;
            }
            if connection.token.is_some() {
                base.token = connection.token;
            }
            if let Some(timeout) = connection.connect_timeout_ms {
                base.connect_timeout_ms = timeout;
            }
        }

        if let Some(protocol) = self.discovery.and_then(|d| d.protocol) {
            base.discovery = protocol;
        }

        if let Some(routing) = self.routing {
            if let Some(role) = routing.publisher_role {
                base.publisher_role = role;
            }
            if let Some(identities) = routing.publisher_identities {
                base.publisher_identities = identities;
            }
            if let Some(role) = routing.tts_role {
                base.tts_role = role;
            }
            if let Some(prefix) = routing.node_identity_prefix {
                base.node_identity_prefix = prefix;
            }
            if let Some(prefix) = routing.agent_identity_prefix {
                base.agent_identity_prefix = prefix;
            }
        }

        if self.data_topic.is_some() {
            base.data_topic = self.data_topic;
        }
        if let Some(level) = self.log_level {
            base.log_level = level;
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
connection:
  url: "wss://rooms.example.com"
  token: "abc"
  connect_timeout_ms: 2500

discovery:
  protocol: "metadata"

routing:
  publisher_role: "caller"
  publisher_identities: ["caller"]
  tts_role: "speaker"
  node_identity_prefix: "graph-"
  agent_identity_prefix: "bot"

data_topic: "flow"
log_level: "debug"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let merged = config.apply(FlowConfig::default());

        assert_eq!(merged.url.as_deref(), Some("wss://rooms.example.com"));
        assert_eq!(merged.token.as_deref(), Some("abc"));
        assert_eq!(merged.connect_timeout_ms, 2500);
        assert_eq!(merged.discovery, DiscoveryProtocol::Metadata);
        assert_eq!(merged.publisher_role, "caller");
        assert_eq!(merged.publisher_identities, vec!["caller"]);
        assert_eq!(merged.tts_role, "speaker");
        assert_eq!(merged.node_identity_prefix, "graph-");
        assert_eq!(merged.agent_identity_prefix, "bot");
        assert_eq!(merged.data_topic.as_deref(), Some("flow"));
        assert_eq!(merged.log_level, "debug");
    }

    #[test]
    fn test_yaml_config_partial_keeps_base() {
        let yaml = r#"
routing:
  tts_role: "voice"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let base = FlowConfig {
            url: Some("wss://from-env".to_string()),
            ..FlowConfig::default()
        };
        let merged = config.apply(base);

        assert_eq!(merged.tts_role, "voice");
        assert_eq!(merged.url.as_deref(), Some("wss://from-env"));
        assert_eq!(merged.publisher_role, "human");
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("").unwrap_or_default();
        assert_eq!(config.apply(FlowConfig::default()), FlowConfig::default());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flow.yaml");
        fs::write(&path, "discovery:\n  protocol: push\nlog_level: warn\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(
            config.discovery.and_then(|d| d.protocol),
            Some(DiscoveryProtocol::Push)
        );
        assert_eq!(config.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_from_file_not_found() {
        let result = YamlConfig::from_file(Path::new("/nonexistent/flow.yaml"));
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flow.yaml");
        fs::write(&path, "discovery:\n  protocol: [unclosed\n").unwrap();

        let result = YamlConfig::from_file(&path);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML config")
        );
    }
}
