//! Platform settings
//!
//! Loaded in layers, later layers winning:
//! 1. built-in defaults
//! 2. an optional TOML file (`themachine.toml`, or a path given by the caller)
//! 3. environment variables prefixed `MACHINE_`, nested with `__`
//!    (`MACHINE_COST_LIMIT_DAILY=5`, `MACHINE_PROVIDERS__OPENAI_API_KEY=...`)
//!
//! `.env` is read into the environment before the layers are built.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::ModelProvider;
use crate::{MachineError, Result};

const DEFAULT_SETTINGS_FILE: &str = "themachine";

/// Which model backend the platform invokes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Offline deterministic backend
    Simulated,
    /// Provider HTTP APIs
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub anthropic_version: String,
    pub local_base_url: String,
    pub custom_base_url: Option<String>,
    pub custom_api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            anthropic_api_key: None,
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            anthropic_version: "2023-06-01".to_string(),
            local_base_url: "http://localhost:11434/v1".to_string(),
            custom_base_url: None,
            custom_api_key: None,
            request_timeout_secs: 60,
        }
    }
}

impl ProviderSettings {
    /// API key for a provider, falling back to the provider's usual env var
    pub fn api_key_for(&self, provider: ModelProvider) -> Option<String> {
        let (configured, env_var) = match provider {
            ModelProvider::OpenAI => (&self.openai_api_key, Some("OPENAI_API_KEY")),
            ModelProvider::Anthropic => (&self.anthropic_api_key, Some("ANTHROPIC_API_KEY")),
            ModelProvider::Custom => (&self.custom_api_key, None),
            ModelProvider::Local => return None,
        };
        configured
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| env_var.and_then(|v| std::env::var(v).ok()))
            .filter(|k| !k.is_empty())
    }

    pub fn base_url_for(&self, provider: ModelProvider) -> Option<&str> {
        match provider {
            ModelProvider::OpenAI => Some(&self.openai_base_url),
            ModelProvider::Anthropic => Some(&self.anthropic_base_url),
            ModelProvider::Local => Some(&self.local_base_url),
            ModelProvider::Custom => self.custom_base_url.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub project_name: String,
    pub debug: bool,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Provider model id preferred by the seed catalog
    pub default_model: String,
    /// Daily spend limit in USD; `None` disables the check
    pub cost_limit_daily: Option<f64>,
    pub worker_count: usize,
    pub max_steps_per_execution: u32,
    pub max_loop_iterations: u32,
    pub event_buffer_size: usize,
    pub seed_catalog: bool,
    pub backend: BackendKind,
    pub providers: ProviderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_name: "TheMachine".to_string(),
            debug: false,
            log_level: "info".to_string(),
            default_model: "gpt-4o".to_string(),
            cost_limit_daily: Some(10.0),
            worker_count: 4,
            max_steps_per_execution: 100,
            max_loop_iterations: 25,
            event_buffer_size: 1000,
            seed_catalog: true,
            backend: BackendKind::Simulated,
            providers: ProviderSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_SETTINGS_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("MACHINE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(MachineError::Configuration(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.max_steps_per_execution == 0 {
            return Err(MachineError::Configuration(
                "max_steps_per_execution must be at least 1".to_string(),
            ));
        }
        if self.max_loop_iterations == 0 {
            return Err(MachineError::Configuration(
                "max_loop_iterations must be at least 1".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(MachineError::Configuration(
                "event_buffer_size must be at least 1".to_string(),
            ));
        }
        if let Some(limit) = self.cost_limit_daily {
            if !limit.is_finite() || limit < 0.0 {
                return Err(MachineError::Configuration(
                    "cost_limit_daily must be a non-negative number".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Tracing filter directive
    pub fn log_filter(&self) -> String {
        if self.debug {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }
}
