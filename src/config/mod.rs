//! Configuration module for the flow engine
//!
//! Settings come from a YAML file, `WAAV_FLOW_*` environment variables and
//! built-in defaults. Priority: YAML > ENV vars > .env values > defaults.
//! The binary loads `.env` through `dotenvy` before any of this runs.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use waav_flow::config::FlowConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = FlowConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = FlowConfig::from_file(Path::new("flow.yaml"))?;
//! println!("Discovery via {:?}", config.discovery);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

mod env;
mod yaml;

pub use yaml::{ConnectionYaml, DiscoveryYaml, RoutingYaml, YamlConfig};

use crate::flow::{ConnectionDetails, DiscoveryProtocol, FlowError, FlowResult};

/// Flow engine configuration
///
/// Contains:
/// - Connection details and connect timeout
/// - The discovery variant the backend speaks
/// - Role names and identity conventions used by routing
/// - The reliable-channel topic and log level
#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    // Connection
    pub url: Option<String>,
    pub token: Option<String>,
    pub connect_timeout_ms: u64,

    pub discovery: DiscoveryProtocol,

    // Routing
    /// Node type of the local client's endpoint
    pub publisher_role: String,
    /// Participant identities that always belong to the publisher node
    pub publisher_identities: Vec<String>,
    pub tts_role: String,
    pub node_identity_prefix: String,
    pub agent_identity_prefix: String,

    /// Topic for outbound reliable envelopes; `None` sends untagged
    pub data_topic: Option<String>,
    pub log_level: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            connect_timeout_ms: 10_000,
            discovery: DiscoveryProtocol::default(),
            publisher_role: "human".to_string(),
            publisher_identities: vec!["human".to_string(), "publisher".to_string()],
            tts_role: "tts".to_string(),
            node_identity_prefix: "node-".to_string(),
            agent_identity_prefix: "agent".to_string(),
            data_topic: None,
            log_level: "info".to_string(),
        }
    }
}

impl FlowConfig {
    /// Load configuration from environment variables over defaults
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::apply_env(Self::default())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables
    /// 3. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml = YamlConfig::from_file(path)?;
        let base = env::apply_env(Self::default())?;
        let config = yaml.apply(base);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.connect_timeout_ms == 0 {
            return Err(FlowError::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        for (field, value) in [
            ("publisher_role", &self.publisher_role),
            ("tts_role", &self.tts_role),
            ("node_identity_prefix", &self.node_identity_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(FlowError::Config(format!("{field} must not be empty")));
            }
        }
        if self
            .publisher_identities
            .iter()
            .any(|identity| identity.trim().is_empty())
        {
            return Err(FlowError::Config(
                "publisher_identities must not contain empty entries".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection details when both url and token are configured
    pub fn connection_details(&self) -> Option<ConnectionDetails> {
        match (&self.url, &self.token) {
            (Some(url), Some(token)) => Some(ConnectionDetails::new(url, token)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    const VARS: [&str; 12] = [
        "WAAV_FLOW_URL",
        "WAAV_FLOW_TOKEN",
        "WAAV_FLOW_DISCOVERY",
        "WAAV_FLOW_PUBLISHER_ROLE",
        "WAAV_FLOW_PUBLISHER_IDENTITIES",
        "WAAV_FLOW_TTS_ROLE",
        "WAAV_FLOW_NODE_IDENTITY_PREFIX",
        "WAAV_FLOW_AGENT_IDENTITY_PREFIX",
        "WAAV_FLOW_DATA_TOPIC",
        "WAAV_FLOW_CONNECT_TIMEOUT_MS",
        "WAAV_FLOW_LOG_LEVEL",
        "LIVEKIT_URL",
    ];

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            for name in VARS {
                env::remove_var(name);
            }
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = FlowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.discovery, DiscoveryProtocol::Push);
        assert_eq!(config.publisher_identities, vec!["human", "publisher"]);
        assert!(config.connection_details().is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_timeout = FlowConfig {
            connect_timeout_ms: 0,
            ..FlowConfig::default()
        };
        assert!(matches!(zero_timeout.validate(), Err(FlowError::Config(_))));

        let empty_role = FlowConfig {
            tts_role: "  ".to_string(),
            ..FlowConfig::default()
        };
        let err = empty_role.validate().unwrap_err();
        assert!(err.to_string().contains("tts_role"));

        let empty_prefix = FlowConfig {
            node_identity_prefix: String::new(),
            ..FlowConfig::default()
        };
        assert!(empty_prefix.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("WAAV_FLOW_URL", "wss://env.example.com");
            env::set_var("WAAV_FLOW_TOKEN", "env-token");
            env::set_var("WAAV_FLOW_DISCOVERY", "metadata");
            env::set_var("WAAV_FLOW_PUBLISHER_IDENTITIES", "caller, human");
            env::set_var("WAAV_FLOW_CONNECT_TIMEOUT_MS", "1500");
        }

        let config = FlowConfig::from_env().unwrap();
        assert_eq!(config.discovery, DiscoveryProtocol::Metadata);
        assert_eq!(config.publisher_identities, vec!["caller", "human"]);
        assert_eq!(config.connect_timeout_ms, 1500);
        let details = config.connection_details().unwrap();
        assert_eq!(details.url, "wss://env.example.com");
        assert_eq!(details.token, "env-token");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_livekit_url_fallback() {
        cleanup_env_vars();
        unsafe {
            env::set_var("LIVEKIT_URL", "ws://localhost:7880");
        }

        let config = FlowConfig::from_env().unwrap();
        assert_eq!(config.url.as_deref(), Some("ws://localhost:7880"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var("WAAV_FLOW_CONNECT_TIMEOUT_MS", "soon");
        }
        assert!(FlowConfig::from_env().is_err());

        unsafe {
            env::remove_var("WAAV_FLOW_CONNECT_TIMEOUT_MS");
            env::set_var("WAAV_FLOW_DISCOVERY", "smoke-signals");
        }
        assert!(FlowConfig::from_env().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("WAAV_FLOW_TTS_ROLE", "env-tts");
            env::set_var("WAAV_FLOW_DATA_TOPIC", "env-topic");
        }

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("flow.yaml");
        fs::write(&config_path, "routing:\n  tts_role: \"yaml-tts\"\n").unwrap();

        let config = FlowConfig::from_file(&config_path).unwrap();
        assert_eq!(config.tts_role, "yaml-tts");
        assert_eq!(config.data_topic.as_deref(), Some("env-topic"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_runs_validation() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("flow.yaml");
        fs::write(&config_path, "connection:\n  connect_timeout_ms: 0\n").unwrap();

        assert!(FlowConfig::from_file(&config_path).is_err());
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();
        assert!(FlowConfig::from_file(Path::new("/nonexistent/flow.yaml")).is_err());
    }
}
