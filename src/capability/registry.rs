//! Model Capability Registry
//!
//! Resolves a model name to its context window and output limit.
//!
//! Resolution order, first hit wins:
//!   1. limits discovered at runtime (per field, over the static value)
//!   2. exact static entry
//!   3. longest static entry the name starts with
//!   4. `_default`

use crate::capability::discovery::parse_limits_from_error;
use crate::capability::store::DiscoveryStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Token limits of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    pub context_window: u32,
    pub max_output: u32,
}

impl ModelLimits {
    pub const fn new(context_window: u32, max_output: u32) -> Self {
        Self {
            context_window,
            max_output,
        }
    }
}

/// Limits learned from a provider, stored per lowercase model name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
    pub discovered_at: DateTime<Utc>,
}

/// A discovery result; either field may be missing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialLimits {
    pub max_output: Option<u32>,
    pub context_window: Option<u32>,
}

impl PartialLimits {
    pub fn max_output(n: u32) -> Self {
        Self {
            max_output: Some(n),
            context_window: None,
        }
    }

    pub fn context_window(n: u32) -> Self {
        Self {
            max_output: None,
            context_window: Some(n),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_output.is_none() && self.context_window.is_none()
    }
}

pub const DEFAULT_KEY: &str = "_default";

/// Fallback for models with no exact or prefix entry
pub const DEFAULT_LIMITS: ModelLimits = ModelLimits::new(32_000, 4_096);

/// Built-in table: (key, context window, max output). Keys are lowercase and
/// match both exactly and as prefixes.
const BUILTIN_LIMITS: &[(&str, u32, u32)] = &[
    // DeepSeek
    ("deepseek-v3.2", 128_000, 8_192),
    ("deepseek-v3.1", 128_000, 8_192),
    ("deepseek-chat", 128_000, 8_192),
    ("deepseek-reasoner", 128_000, 65_536),
    ("deepseek-r1", 128_000, 32_768),
    ("deepseek-", 64_000, 8_192),
    ("deepseek-ai/deepseek-v3", 128_000, 8_192),
    // OpenAI
    ("gpt-4o", 128_000, 16_384),
    ("gpt-4o-mini", 128_000, 16_384),
    ("gpt-4.1", 1_047_576, 32_768),
    ("gpt-4-turbo", 128_000, 4_096),
    ("gpt-4", 8_192, 4_096),
    ("gpt-3.5-turbo", 16_385, 4_096),
    ("gpt-5", 400_000, 128_000),
    ("o1", 200_000, 100_000),
    ("o3", 200_000, 100_000),
    ("o4-mini", 200_000, 100_000),
    // Anthropic
    ("claude-", 200_000, 8_192),
    ("claude-3-5-sonnet", 200_000, 8_192),
    ("claude-3-7-sonnet", 200_000, 64_000),
    ("claude-sonnet-4", 200_000, 64_000),
    ("claude-opus-4", 200_000, 32_000),
    // Google
    ("gemini-", 1_048_576, 8_192),
    ("gemini-1.5-pro", 2_097_152, 8_192),
    ("gemini-2.0-flash", 1_048_576, 8_192),
    ("gemini-2.5-pro", 1_048_576, 65_536),
    ("gemini-2.5-flash", 1_048_576, 65_536),
    // Zhipu
    ("glm-4", 128_000, 4_096),
    ("glm-4-flash", 128_000, 4_096),
    ("glm-4.5", 128_000, 98_304),
    ("glm-4.6", 200_000, 128_000),
    // Moonshot
    ("moonshot-v1-8k", 8_192, 4_096),
    ("moonshot-v1-32k", 32_768, 8_192),
    ("moonshot-v1-128k", 131_072, 8_192),
    ("kimi-k2", 131_072, 16_384),
    ("kimi-k2-0905", 262_144, 16_384),
    // Alibaba
    ("qwen-max", 32_768, 8_192),
    ("qwen-plus", 131_072, 8_192),
    ("qwen-turbo", 1_000_000, 8_192),
    ("qwen3-", 131_072, 8_192),
    ("qwen/qwen3-", 131_072, 8_192),
    // ByteDance
    ("doubao-", 128_000, 16_384),
    ("doubao-1-5-pro-32k", 32_768, 12_288),
    ("doubao-1-5-pro-256k", 262_144, 12_288),
    ("doubao-seed-1-6", 262_144, 32_768),
];

/// Registry of model limits with a runtime-discovery layer
pub struct ModelCapabilityRegistry {
    static_limits: HashMap<String, ModelLimits>,
    default_limits: ModelLimits,
    store: Arc<dyn DiscoveryStore>,
}

impl ModelCapabilityRegistry {
    /// Registry over the built-in table
    pub fn new(store: Arc<dyn DiscoveryStore>) -> Self {
        let static_limits = BUILTIN_LIMITS
            .iter()
            .map(|(key, ctx, out)| (key.to_string(), ModelLimits::new(*ctx, *out)))
            .collect();

        Self {
            static_limits,
            default_limits: DEFAULT_LIMITS,
            store,
        }
    }

    /// Built-in table plus configured entries; a `_default` entry replaces the fallback
    pub fn with_overrides(
        store: Arc<dyn DiscoveryStore>,
        overrides: &HashMap<String, ModelLimits>,
    ) -> Self {
        let mut registry = Self::new(store);
        for (key, limits) in overrides {
            if limits.context_window == 0 || limits.max_output == 0 {
                warn!(model = %key, "Ignoring model limit override with a zero field");
                continue;
            }
            let key = key.to_lowercase();
            if key == DEFAULT_KEY {
                registry.default_limits = *limits;
            } else {
                registry.static_limits.insert(key, *limits);
            }
        }
        registry
    }

    /// Resolve limits for a model. Never fails; unknown models get `_default`.
    pub fn get_model_limits(&self, model: &str) -> ModelLimits {
        let key = model.trim().to_lowercase();
        let base = self.static_for_key(&key);

        match self.store.get(&key) {
            Some(found) => ModelLimits {
                context_window: found
                    .context_window
                    .filter(|n| *n > 0)
                    .unwrap_or(base.context_window),
                max_output: found.max_output.filter(|n| *n > 0).unwrap_or(base.max_output),
            },
            None => base,
        }
    }

    /// Static resolution only, ignoring discoveries
    pub fn static_limits(&self, model: &str) -> ModelLimits {
        self.static_for_key(&model.trim().to_lowercase())
    }

    fn static_for_key(&self, key: &str) -> ModelLimits {
        if let Some(limits) = self.static_limits.get(key) {
            return *limits;
        }

        // Longest prefix, so "gemini-2.5-pro" is never shadowed by "gemini-"
        self.static_limits
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, limits)| *limits)
            .unwrap_or(self.default_limits)
    }

    /// Record discovered limits. Existing fields not present in `limits` are kept.
    pub fn cache_discovered(&self, model: &str, limits: PartialLimits) {
        if limits.is_empty() {
            return;
        }
        let key = model.trim().to_lowercase();
        let previous = self.store.get(&key);

        let entry = DiscoveredLimits {
            max_output: limits
                .max_output
                .or_else(|| previous.as_ref().and_then(|p| p.max_output)),
            context_window: limits
                .context_window
                .or_else(|| previous.as_ref().and_then(|p| p.context_window)),
            discovered_at: Utc::now(),
        };

        info!(
            model = %key,
            max_output = ?entry.max_output,
            context_window = ?entry.context_window,
            "Discovered model limits"
        );

        if let Err(e) = self.store.set(&key, entry) {
            warn!(model = %key, error = %e, "Failed to persist discovered limits");
        }
    }

    /// Mine an error body and cache whatever it reveals
    pub fn discover_from_error(&self, model: &str, error_text: &str) -> Option<PartialLimits> {
        let found = parse_limits_from_error(error_text)?;
        self.cache_discovered(model, found);
        Some(found)
    }
}

impl std::fmt::Debug for ModelCapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCapabilityRegistry")
            .field("static_entries", &self.static_limits.len())
            .field("default_limits", &self.default_limits)
            .finish()
    }
}
