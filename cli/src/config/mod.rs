//! Configuration for the gitsage CLI.
//!
//! Sources are layered lowest to highest:
//! - built-in defaults
//! - the config file (`~/.config/gitsage/config.{yaml,toml}` or `--config`)
//! - `GITSAGE_`-prefixed environment variables, `__` between sections
//!   (`GITSAGE_PROVIDER__MODEL=gpt-4o`)
//!
//! Command-line flags are applied on top by the caller.

use config::{Config, Environment, File};
use gitsage_agent_core::{HistoryConfig, RetryConfig, RetryConfigError};
use gitsage_ai::{OFFICIAL_OPENAI_BASE_URL, OpenAiConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;


pub const ENV_PREFIX: &str = "GITSAGE";
pub const API_KEY_FALLBACK_ENV: &str = "OPENAI_API_KEY";
pub const GITSAGE_DIR: &str = ".gitsage";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    Retry(#[from] RetryConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: OFFICIAL_OPENAI_BASE_URL.to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            request_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            backoff_base_secs: 1,
            backoff_max_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub compress_threshold: usize,
    pub keep_recent: usize,
    pub max_tool_result_chars: usize,
    pub token_budget: Option<usize>,
    /// Tools whose calls survive in the request view. Unset keeps every tool.
    pub keep_tools: Option<BTreeSet<String>>,
    /// Trailing messages tagged as recent context. 0 disables the marker.
    pub highlight_recent: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        let defaults = HistoryConfig::default();
        Self {
            compress_threshold: defaults.compress_threshold,
            keep_recent: defaults.keep_recent,
            max_tool_result_chars: defaults.max_tool_result_chars,
            token_budget: defaults.token_budget,
            keep_tools: defaults.keep_tools,
            highlight_recent: defaults.highlight_recent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Defaults to `~/.gitsage/sessions`.
    pub dir: Option<PathBuf>,
    /// Sessions kept by the retention pass after each run. 0 keeps everything.
    pub max_keep: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dir: None,
            max_keep: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub language: String,
    pub max_iterations: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            language: "English".to_string(),
            max_iterations: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Write logs to a daily rolling file at this path instead of stderr.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub retry: RetrySettings,
    pub history: HistorySettings,
    pub sessions: SessionSettings,
    pub agent: AgentSettings,
    pub logging: LoggingSettings,
    /// Set from `--debug`; never read from files.
    #[serde(skip)]
    pub debug: bool,
}

/// Values passed on the command line, applied over every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub debug: bool,
    pub language: Option<String>,
    pub max_iterations: Option<usize>,
}

fn default_config_base() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gitsage").join("config"))
}

impl AppConfig {
    /// Load from the default or given file plus the process environment.
    pub fn load(custom_path: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut config = Self::load_with(custom_path, Environment::with_prefix(ENV_PREFIX))?;
        config.apply_api_key_fallback(|name| std::env::var(name).ok());
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Layer the file and `environment` over the defaults. Nothing is
    /// validated here.
    pub(crate) fn load_with(
        custom_path: Option<&Path>,
        environment: Environment,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match custom_path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(base) = default_config_base() {
                    builder = builder.add_source(File::from(base).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Use `OPENAI_API_KEY` when no key is configured.
    pub fn apply_api_key_fallback(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let configured = self
            .provider
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        if !configured {
            self.provider.api_key = lookup(API_KEY_FALLBACK_ENV).filter(|key| !key.trim().is_empty());
        }
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        self.debug = overrides.debug;
        if let Some(language) = overrides.language {
            self.agent.language = language;
        }
        if let Some(max_iterations) = overrides.max_iterations {
            self.agent.max_iterations = max_iterations;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.model must not be empty".into()));
        }
        if !(self.provider.base_url.starts_with("http://")
            || self.provider.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "provider.base_url must be an http(s) URL, got `{}`",
                self.provider.base_url
            )));
        }
        if self.provider.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "provider.request_timeout_secs must be positive".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.history.keep_recent == 0 {
            return Err(ConfigError::Invalid(
                "history.keep_recent must be at least 1".into(),
            ));
        }
        if self.history.keep_recent >= self.history.compress_threshold {
            return Err(ConfigError::Invalid(format!(
                "history.keep_recent ({}) must be lower than history.compress_threshold ({})",
                self.history.keep_recent, self.history.compress_threshold
            )));
        }
        self.retry_config()?;
        Ok(())
    }

    pub fn retry_config(&self) -> Result<RetryConfig, RetryConfigError> {
        RetryConfig::new(
            self.retry.enabled,
            self.retry.max_attempts,
            Duration::from_secs(self.retry.backoff_base_secs),
            Duration::from_secs(self.retry.backoff_max_secs),
        )
    }

    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            compress_threshold: self.history.compress_threshold,
            keep_recent: self.history.keep_recent,
            max_tool_result_chars: self.history.max_tool_result_chars,
            token_budget: self.history.token_budget,
            keep_tools: self.history.keep_tools.clone(),
            highlight_recent: self.history.highlight_recent,
        }
    }

    pub fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig::new(
            self.provider.api_key.clone().unwrap_or_default(),
            self.provider.model.clone(),
        )
        .with_base_url(self.provider.base_url.clone())
        .with_request_timeout_secs(self.provider.request_timeout_secs)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions.dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(GITSAGE_DIR)
                .join("sessions")
        })
    }
}
