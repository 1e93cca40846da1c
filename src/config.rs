//! Service configuration: YAML sections plus environment overrides.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use agent_core::EngineConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const REDACTED: &str = "***";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration '{value}' for {field}: {source}")]
    Duration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    OpenAi,
    /// Scripted offline generator; never leaves the process.
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: String,
    /// Model used for lightweight verification and critic calls.
    pub lightweight_model: Option<String>,
    pub api_base: String,
    pub api_keys: Vec<String>,
    pub temperature: f32,
    /// Request timeout, humantime syntax ("30s", "1m 30s").
    pub timeout: String,
    /// On a 429 from the first key, resend once with the second key.
    pub rotate_keys_on_rate_limit: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::OpenAi,
            model: "gpt-4o-mini".to_string(),
            lightweight_model: None,
            api_base: "https://api.openai.com/v1".to_string(),
            api_keys: Vec::new(),
            temperature: 0.2,
            timeout: "30s".to_string(),
            rotate_keys_on_rate_limit: true,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("llm.timeout", &self.timeout)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchProviderKind {
    Brave,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub provider: SearchProviderKind,
    pub api_key: Option<String>,
    pub endpoint: String,
    pub max_results: usize,
    pub timeout: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: SearchProviderKind::None,
            api_key: None,
            endpoint: "https://api.search.brave.com/res/v1/web/search".to_string(),
            max_results: 5,
            timeout: "10s".to_string(),
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("search.timeout", &self.timeout)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend. Defaults to `<data_dir>/waypoint`.
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.dir {
            return Ok(dir.clone());
        }
        let mut path = dirs::data_dir()
            .ok_or_else(|| ConfigError::Invalid("no data directory for task storage".into()))?;
        path.push("waypoint");
        Ok(path)
    }
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Applies `WAYPOINT_*` and provider key variables on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(model) = env_value("WAYPOINT_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(base) = env_value("WAYPOINT_LLM_API_BASE") {
            self.llm.api_base = base;
        }
        if let Some(keys) = env_value("WAYPOINT_LLM_API_KEYS") {
            self.llm.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect();
        } else if let Some(key) = env_value("OPENAI_API_KEY") {
            if !self.llm.api_keys.contains(&key) {
                self.llm.api_keys.insert(0, key);
            }
        }
        if let Some(key) = env_value("BRAVE_SEARCH_API_KEY") {
            self.search.api_key = Some(key);
        }
        if let Some(dir) = env_value("WAYPOINT_STORAGE_DIR") {
            self.storage.dir = Some(PathBuf::from(dir));
            self.storage.backend = StorageBackend::File;
        }
        if let Some(port) = env_value("WAYPOINT_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(err) => warn!(value = %port, ?err, "ignoring invalid WAYPOINT_PORT"),
            }
        }
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.llm.timeout()?;
        self.search.timeout()?;
        for (field, value) in [
            ("llm.api_base", &self.llm.api_base),
            ("search.endpoint", &self.search.endpoint),
        ] {
            url::Url::parse(value)
                .map_err(|err| ConfigError::Invalid(format!("{field} '{value}' is not a URL: {err}")))?;
        }
        let engine = &self.engine;
        if !(0.0..=1.0).contains(&engine.success_threshold)
            || !(0.0..=1.0).contains(&engine.audit_threshold)
        {
            return Err(ConfigError::Invalid(
                "engine thresholds must lie in [0, 1]".into(),
            ));
        }
        if engine.audit_threshold < engine.success_threshold {
            return Err(ConfigError::Invalid(
                "engine.audit_threshold must not be below engine.success_threshold".into(),
            ));
        }
        if engine.max_retries_per_step == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_retries_per_step must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Copy safe to print or log.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.llm.api_keys = copy
            .llm
            .api_keys
            .iter()
            .map(|_| REDACTED.to_string())
            .collect();
        if copy.search.api_key.is_some() {
            copy.search.api_key = Some(REDACTED.to_string());
        }
        copy
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|source| ConfigError::Duration {
        field,
        value: value.to_string(),
        source,
    })
}
