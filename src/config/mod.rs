pub mod validation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Agent runtime endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    /// Overall request timeout in seconds; covers the whole streamed turn.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default)]
    pub http_use_env_proxy: bool,
}

fn default_base_url() -> String {
    "http://127.0.0.1:4111".to_string()
}
fn default_chat_path() -> String {
    "/api/chat".to_string()
}
fn default_timeout() -> u64 {
    600
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_http_pool_max_idle_per_host() -> usize {
    4
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_path: default_chat_path(),
            timeout: default_timeout(),
            connect_timeout_secs: default_connect_timeout_secs(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_use_env_proxy: false,
        }
    }
}

/// Thread store (persisted history) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Falls back to `runtime.base_url` when unset.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_threads_path")]
    pub threads_path: String,
    #[serde(default = "default_resource_id")]
    pub resource_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
}

fn default_threads_path() -> String {
    "/api/memory/threads".to_string()
}
fn default_resource_id() -> String {
    "default".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            threads_path: default_threads_path(),
            resource_id: default_resource_id(),
            agent_id: None,
        }
    }
}

/// One agent the user can talk to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    /// Sent verbatim as `routingParams` on every turn for this agent.
    #[serde(default)]
    pub routing_params: serde_json::Map<String, serde_json::Value>,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Mine tool calls out of streamed text in addition to discrete events.
    #[serde(default = "default_true")]
    pub enable_embedded_extraction: bool,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_embedded_extraction: true,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Forwarded as `credentials` on every turn (e.g. a GitHub token).
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    #[must_use]
    pub fn agent(&self, agent_type: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|agent| agent.agent_type == agent_type)
    }

    /// The agent flagged `is_default`, else the first configured one.
    #[must_use]
    pub fn default_agent(&self) -> Option<&AgentConfig> {
        self.agents
            .iter()
            .find(|agent| agent.is_default)
            .or_else(|| self.agents.first())
    }

    #[must_use]
    pub fn store_base_url(&self) -> &str {
        self.store
            .base_url
            .as_deref()
            .unwrap_or(self.runtime.base_url.as_str())
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Same as [`load_config`], minus I/O.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.runtime.chat_path, "/api/chat");
        assert_eq!(config.agents.len(), 2);
        assert_eq!(
            config.default_agent().map(|agent| agent.agent_type.as_str()),
            Some("ideation")
        );
        assert!(config.agent("coding").is_some());
        assert!(config.features.enable_embedded_extraction);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("agents:\n  - agent_type: coding\n").unwrap();
        assert_eq!(config.runtime.timeout, 600);
        assert_eq!(config.store.threads_path, "/api/memory/threads");
        assert_eq!(config.store_base_url(), "http://127.0.0.1:4111");
        assert_eq!(config.features.log_level, "INFO");
        assert_eq!(
            config.default_agent().map(|agent| agent.agent_type.as_str()),
            Some("coding")
        );
    }

    #[test]
    fn test_store_base_url_override() {
        let config = parse_config(
            "agents:\n  - agent_type: coding\nstore:\n  base_url: http://store.local:9000\n",
        )
        .unwrap();
        assert_eq!(config.store_base_url(), "http://store.local:9000");
    }
}
