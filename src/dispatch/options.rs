//! Per-call options

use crate::router::FeatureConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default output budget when the caller does not ask for one
pub const DEFAULT_MAX_TOKENS: u32 = 4_096;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Options of a single logical request
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Requested output tokens, clamped to the model's limit before sending
    pub max_tokens: u32,

    pub temperature: Option<f32>,

    /// Send `thinking: {type: "disabled"}`
    pub disable_thinking: bool,

    /// Per HTTP call; the client default applies when unset
    pub timeout: Option<Duration>,

    /// Aborts the in-flight HTTP call and any pending backoff
    pub cancel: Option<CancellationToken>,

    /// Skip feature resolution and use this target
    pub config_override: Option<FeatureConfig>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: Some(DEFAULT_TEMPERATURE),
            disable_thinking: false,
            timeout: None,
            cancel: None,
            config_override: None,
        }
    }
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_thinking_disabled(mut self) -> Self {
        self.disable_thinking = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_config(mut self, config: FeatureConfig) -> Self {
        self.config_override = Some(config);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}
