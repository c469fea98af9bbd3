use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_runtime_config(config)?;
    validate_store_config(config)?;
    validate_agents(config)?;
    validate_credentials(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_runtime_config(config: &AppConfig) -> Result<(), ConfigError> {
    let runtime = &config.runtime;
    validate_http_url("runtime.base_url", &runtime.base_url)?;
    if !runtime.chat_path.starts_with('/') {
        return Err(validation_err("runtime.chat_path must start with '/'"));
    }
    if runtime.timeout == 0 {
        return Err(validation_err("runtime.timeout must be greater than 0"));
    }
    if runtime.connect_timeout_secs == 0 {
        return Err(validation_err(
            "runtime.connect_timeout_secs must be greater than 0",
        ));
    }
    if runtime.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "runtime.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_store_config(config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = config.store.base_url.as_deref() {
        validate_http_url("store.base_url", base_url)?;
    }
    if !config.store.threads_path.starts_with('/') {
        return Err(validation_err("store.threads_path must start with '/'"));
    }
    if config.store.resource_id.trim().is_empty() {
        return Err(validation_err("store.resource_id cannot be empty"));
    }
    Ok(())
}

fn validate_agents(config: &AppConfig) -> Result<(), ConfigError> {
    if config.agents.is_empty() {
        return Err(validation_err("agents cannot be empty"));
    }

    let mut seen = HashSet::new();
    let mut default_count = 0usize;
    for agent in &config.agents {
        if agent.agent_type.trim().is_empty() {
            return Err(validation_err("agent_type cannot be empty"));
        }
        if !seen.insert(agent.agent_type.as_str()) {
            return Err(validation_err(format!(
                "Duplicate agent_type '{}'",
                agent.agent_type
            )));
        }
        if agent.is_default {
            default_count += 1;
        }
    }
    if default_count > 1 {
        return Err(validation_err("Only one agent can be marked is_default"));
    }
    Ok(())
}

fn validate_credentials(config: &AppConfig) -> Result<(), ConfigError> {
    for key in config.credentials.keys() {
        if key.trim().is_empty() {
            return Err(validation_err("credentials contains an empty key"));
        }
    }
    Ok(())
}

fn validate_http_url(field_name: &str, raw: &str) -> Result<(), ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(validation_err(format!("{field_name} cannot be empty")));
    }
    let parsed = url::Url::parse(raw)
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = [
        "TRACE", "DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED",
    ];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn make_valid_config() -> AppConfig {
        AppConfig {
            runtime: RuntimeConfig::default(),
            store: StoreConfig::default(),
            agents: vec![
                AgentConfig {
                    agent_type: "ideation".to_string(),
                    description: String::new(),
                    is_default: true,
                    routing_params: serde_json::Map::new(),
                },
                AgentConfig {
                    agent_type: "coding".to_string(),
                    description: String::new(),
                    is_default: false,
                    routing_params: serde_json::Map::new(),
                },
            ],
            credentials: std::collections::BTreeMap::new(),
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = make_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_agents() {
        let mut config = make_valid_config();
        config.agents.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_agent_type() {
        let mut config = make_valid_config();
        config.agents[1].agent_type = "ideation".to_string();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("Duplicate agent_type"), "{err}");
    }

    #[test]
    fn test_multiple_defaults() {
        let mut config = make_valid_config();
        config.agents[1].is_default = true;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = make_valid_config();
        config.runtime.base_url = "ftp://example.com".to_string();
        assert!(validate_config(&config).is_err());

        config.runtime.base_url = "not a url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_store_base_url() {
        let mut config = make_valid_config();
        config.store.base_url = Some(String::new());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_chat_path_must_be_absolute() {
        let mut config = make_valid_config();
        config.runtime.chat_path = "api/chat".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = make_valid_config();
        config.runtime.timeout = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_credential_key() {
        let mut config = make_valid_config();
        config
            .credentials
            .insert("  ".to_string(), "secret".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "LOUD".to_string();
        assert!(validate_config(&config).is_err());

        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
