//! Planlab - LLM-drafted experiment plans with a simulated training timeline
//!
//! This crate provides:
//! - Structured-output LLM provider backends (Gemini, OpenAI-compatible, Ollama)
//! - A plan requester with schema validation and exponential-backoff retries
//! - A cancelable, deterministic simulation scheduler for plan playback
//! - A single-consumer session that applies simulation events to a plan

pub mod plan;
pub mod planner;
pub mod provider;
pub mod report;
pub mod session;
pub mod simulation;

pub use plan::{GenerationError, Plan, PlanRequester, RetryPolicy};
pub use planner::ExperimentPlanner;
pub use provider::{LlmProvider, LlmRequest, LlmResponse, ProviderError};
pub use report::ResultsReport;
pub use session::{PlanSession, SessionPhase};
pub use simulation::{SimulationHandle, SimulationObserver, SimulationScheduler};

use std::path::Path;
use thiserror::Error;

/// Errors from loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for the planlab system
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct PlanlabConfig {
    /// Provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Retry policy for plan generation
    #[serde(default)]
    pub retry: RetryConfig,

    /// Simulation playback settings
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl PlanlabConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

/// Configuration for the structured-generation provider
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProviderConfig {
    /// Provider type: "gemini", "openai", "deepseek", "litellm", "ollama"
    #[serde(default = "default_provider_type")]
    pub provider_type: String,

    /// Base URL for the provider (empty = provider default)
    #[serde(default)]
    pub base_url: String,

    /// Model name (empty = provider default)
    #[serde(default)]
    pub model: String,

    /// Optional API key; takes precedence over the environment
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_type() -> String { "gemini".to_string() }
fn default_api_key_env() -> String { "GEMINI_API_KEY".to_string() }
fn default_timeout_secs() -> u64 { 300 }

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: default_provider_type(),
            base_url: String::new(),
            model: String::new(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Retry settings for the remote generation call
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each subsequent retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 1000 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Simulation playback settings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SimulationConfig {
    /// Multiplier applied to every checkpoint offset (1.0 = real speed)
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,

    /// Seed for metric jitter; random when absent
    pub seed: Option<u64>,
}

fn default_time_scale() -> f64 { 1.0 }

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_scale: default_time_scale(),
            seed: None,
        }
    }
}
