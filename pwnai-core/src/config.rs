// pwnai-core/src/config.rs

//! `Pwnai.toml` structures and validation.

use crate::api::RetryPolicy;
use crate::api::claude::{ClaudeSettings, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::errors::PwnaiError;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

pub const CONFIG_FILENAME: &str = "Pwnai.toml";

#[derive(Deserialize, Debug, Clone)]
pub struct PwnaiConfig {
    pub default_backend: String,
    /// Prompt for `claude` backends. `pwnai` backends always use their own.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
    #[serde(default)]
    pub msf: Option<MsfConfig>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Pwnai,
    Claude,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub api_key_env_var: String,
    #[serde(default)]
    pub model_config: ModelConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_model_name() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    RetryPolicy::default().max_retries
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            endpoint: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MsfConfig {
    #[serde(default = "default_msf_host")]
    pub host: String,
    #[serde(default = "default_msf_port")]
    pub port: u16,
    #[serde(default = "default_msf_user_var")]
    pub username_env_var: String,
    #[serde(default = "default_msf_pass_var")]
    pub password_env_var: String,
}

fn default_msf_host() -> String {
    "127.0.0.1".to_string()
}

fn default_msf_port() -> u16 {
    55553
}

fn default_msf_user_var() -> String {
    "MSF_USER".to_string()
}

fn default_msf_pass_var() -> String {
    "MSF_PASS".to_string()
}

impl BackendConfig {
    /// Client settings for this backend with the given API key.
    pub fn claude_settings(&self, api_key: impl Into<String>) -> ClaudeSettings {
        let model = &self.model_config;
        let mut settings = ClaudeSettings::new(api_key);
        settings.model = model.model_name.clone();
        settings.endpoint = model.endpoint.clone();
        settings.max_tokens = model.max_tokens;
        settings.timeout = Duration::from_secs(model.timeout_secs);
        settings.retry.max_retries = model.max_retries;
        settings
    }
}

impl PwnaiConfig {
    pub fn from_toml_str(content: &str) -> Result<PwnaiConfig, PwnaiError> {
        let config: PwnaiConfig = toml::from_str(content).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse TOML content");
            PwnaiError::config(format!("failed to parse configuration TOML: {}", e))
        })?;

        if config.default_backend.trim().is_empty() {
            return Err(PwnaiError::config("'default_backend' is empty"));
        }
        if !config.backends.contains_key(&config.default_backend) {
            return Err(PwnaiError::config(format!(
                "default backend '{}' not found in [backends]",
                config.default_backend
            )));
        }

        for (key, backend) in &config.backends {
            let model = &backend.model_config;
            if model.model_name.trim().is_empty() {
                return Err(PwnaiError::config(format!(
                    "backend '{}' has an empty 'model_config.model_name'",
                    key
                )));
            }
            if backend.api_key_env_var.trim().is_empty() {
                return Err(PwnaiError::config(format!(
                    "backend '{}' is missing 'api_key_env_var'",
                    key
                )));
            }
            if model.max_tokens == 0 {
                return Err(PwnaiError::config(format!(
                    "backend '{}' has 'model_config.max_tokens' = 0",
                    key
                )));
            }
            if let Some(endpoint) = &model.endpoint {
                Url::parse(endpoint).map_err(|e| {
                    PwnaiError::config(format!(
                        "invalid endpoint URL '{}' in backend '{}': {}",
                        endpoint, key, e
                    ))
                })?;
            }
        }

        if let Some(msf) = &config.msf {
            if msf.host.trim().is_empty() {
                return Err(PwnaiError::config("[msf] host is empty"));
            }
            if msf.port == 0 {
                return Err(PwnaiError::config("[msf] port must be non-zero"));
            }
        }

        tracing::info!(
            default_backend = %config.default_backend,
            backends = config.backends.len(),
            msf = config.msf.is_some(),
            "Parsed and validated configuration"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config_content() -> &'static str {
        r#"
            default_backend = "pwnai"
            system_prompt = "You are a careful assistant."

            [backends.pwnai]
            type = "pwnai"
            api_key_env_var = "ANTHROPIC_API_KEY"

            [backends.plain]
            type = "claude"
            api_key_env_var = "ANTHROPIC_API_KEY"
            [backends.plain.model_config]
                model_name = "claude-haiku-4-5"
                endpoint = "https://example.com/v1/messages"
                max_tokens = 1024
                timeout_secs = 20
                max_retries = 2

            [msf]
            port = 55552
        "#
    }

    #[test]
    fn test_config_parse_success() {
        let config = PwnaiConfig::from_toml_str(valid_config_content()).unwrap();
        assert_eq!(config.default_backend, "pwnai");
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends["pwnai"].kind, BackendKind::Pwnai);
        assert_eq!(config.backends["pwnai"].model_config.model_name, DEFAULT_MODEL);
        assert_eq!(config.backends["plain"].kind, BackendKind::Claude);

        let msf = config.msf.unwrap();
        assert_eq!(msf.host, "127.0.0.1");
        assert_eq!(msf.port, 55552);
        assert_eq!(msf.username_env_var, "MSF_USER");
    }

    #[test]
    fn test_claude_settings_from_model_config() {
        let config = PwnaiConfig::from_toml_str(valid_config_content()).unwrap();
        let settings = config.backends["plain"].claude_settings("sk-test");
        assert_eq!(settings.api_key, "sk-test");
        assert_eq!(settings.model, "claude-haiku-4-5");
        assert_eq!(settings.endpoint.as_deref(), Some("https://example.com/v1/messages"));
        assert_eq!(settings.max_tokens, 1024);
        assert_eq!(settings.timeout, Duration::from_secs(20));
        assert_eq!(settings.retry.max_retries, 2);
    }

    #[test]
    fn test_missing_default_backend_definition() {
        let content = r#"
            default_backend = "missing"
            [backends.pwnai]
            type = "pwnai"
            api_key_env_var = "ANTHROPIC_API_KEY"
        "#;
        let err = PwnaiConfig::from_toml_str(content).unwrap_err();
        assert!(
            err.to_string().contains("default backend 'missing' not found"),
            "Unexpected error message: {}",
            err
        );
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let content = r#"
            default_backend = "pwnai"
            [backends.pwnai]
            type = "pwnai"
            api_key_env_var = "ANTHROPIC_API_KEY"
            [backends.pwnai.model_config]
                endpoint = "not a url"
        "#;
        assert!(matches!(
            PwnaiConfig::from_toml_str(content),
            Err(PwnaiError::Config(msg)) if msg.contains("invalid endpoint URL")
        ));
    }

    #[test]
    fn test_unknown_backend_type_and_zero_port() {
        let unknown_type = r#"
            default_backend = "x"
            [backends.x]
            type = "gemini"
            api_key_env_var = "KEY"
        "#;
        assert!(PwnaiConfig::from_toml_str(unknown_type).is_err());

        let zero_port = r#"
            default_backend = "x"
            [backends.x]
            type = "claude"
            api_key_env_var = "KEY"
            [msf]
            port = 0
        "#;
        let err = PwnaiConfig::from_toml_str(zero_port).unwrap_err();
        assert_eq!(err, PwnaiError::config("[msf] port must be non-zero"));
    }

    #[test]
    fn test_empty_model_name_rejected() {
        let content = r#"
            default_backend = "x"
            [backends.x]
            type = "claude"
            api_key_env_var = "KEY"
            [backends.x.model_config]
                model_name = "  "
        "#;
        assert!(PwnaiConfig::from_toml_str(content).is_err());
    }
}
