//! Dispatch Configuration
//!
//! Defines the configuration schema for providers, feature bindings and policies.

use crate::capability::ModelLimits;
use crate::config::Feature;
use crate::router::BindingRoute;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Provider configurations keyed by provider id
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Ordered `platform:model` bindings per feature
    #[serde(default)]
    pub features: HashMap<Feature, Vec<BindingRoute>>,

    /// Platform used when a feature has no binding at all
    #[serde(default)]
    pub default_platforms: HashMap<Feature, String>,

    /// Static limit entries merged over the built-in table
    #[serde(default)]
    pub model_limits: HashMap<String, ModelLimits>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub key_pool: KeyPoolConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

/// Configuration for a single provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Vendor platform name; defaults to the provider id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Base URL for the API
    pub base_url: String,

    /// Environment variable overriding the base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url_env: Option<String>,

    /// Literal API keys, in rotation order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_keys: Vec<String>,

    /// Environment variable name for the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Optional list of environment variables for multiple keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_keys_env: Option<Vec<String>>,

    /// Models bound to this provider; the first one is the default model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,

    /// Additional headers to send with requests
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl ProviderConfig {
    /// Minimal provider with literal keys
    pub fn new(base_url: impl Into<String>, api_keys: Vec<String>) -> Self {
        Self {
            platform: None,
            base_url: base_url.into(),
            base_url_env: None,
            api_keys,
            api_key_env: None,
            api_keys_env: None,
            models: Vec::new(),
            headers: HashMap::new(),
        }
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Platform name, falling back to the provider id
    pub fn platform_or<'a>(&'a self, id: &'a str) -> &'a str {
        self.platform.as_deref().unwrap_or(id)
    }

    /// Get the effective base URL (from env var if configured, otherwise default)
    pub fn get_base_url(&self) -> String {
        if let Some(env_var) = &self.base_url_env {
            if let Ok(url) = std::env::var(env_var) {
                if !url.trim().is_empty() {
                    return url;
                }
            }
        }
        self.base_url.clone()
    }

    /// All API keys for this provider: literal keys first, then env vars, deduplicated
    pub fn get_api_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let mut push = |key: String| {
            let key = key.trim().to_string();
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        };

        for key in &self.api_keys {
            push(key.clone());
        }

        if let Some(env_var) = &self.api_key_env {
            if let Ok(key) = std::env::var(env_var) {
                push(key);
            }
        }

        if let Some(env_vars) = &self.api_keys_env {
            for env_var in env_vars {
                if let Ok(value) = std::env::var(env_var) {
                    // A single variable may carry a comma separated pool
                    for key in value.split(',') {
                        push(key.to_string());
                    }
                }
            }
        }

        keys
    }
}

/// Retry and backoff policy of the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts for transient failures (429, 5xx, network) per request
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Jitter, 0.0 disables it
    pub randomization_factor: f64,
    /// Per-call HTTP timeout
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            randomization_factor: 0.5,
            request_timeout_secs: 300,
        }
    }
}

impl RetryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Re-admission policy for rate-limited keys
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPoolConfig {
    /// Cooldown applied to a key after a 429; 0 only moves the pointer
    pub rate_limit_cooldown_secs: u64,
    /// Prefer the provider's Retry-After over the fixed cooldown
    pub honor_retry_after: bool,
}

impl Default for KeyPoolConfig {
    fn default() -> Self {
        Self {
            rate_limit_cooldown_secs: 60,
            honor_retry_after: true,
        }
    }
}

impl KeyPoolConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }
}

/// Sub-batch sizing and concurrency
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Share of the context window a sub-batch may fill (input + expected output)
    pub context_fraction: f64,
    /// Hard item ceiling per sub-batch
    pub max_items_per_batch: usize,
    /// Hard cap on parallel sub-batches
    pub max_concurrency: usize,
    /// Sends per sub-batch before it is counted as failed
    pub batch_attempts: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            context_fraction: 0.6,
            max_items_per_batch: 20,
            max_concurrency: 4,
            batch_attempts: 2,
        }
    }
}
