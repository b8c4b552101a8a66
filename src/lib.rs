//! llm-dispatch - Multi-provider LLM request orchestration
//!
//! Routes logical features to interchangeable chat-completion providers,
//! rotates and fails over API keys, learns model limits from provider errors
//! and splits large jobs into token-bounded sub-batches.
//!
//! ```no_run
//! use llm_dispatch::{CallOptions, Feature, Orchestrator};
//!
//! # async fn run() -> llm_dispatch::error::Result<()> {
//! let orchestrator = Orchestrator::new()?;
//! let summary = orchestrator
//!     .call_feature_api(
//!         Feature::ScriptAnalysis,
//!         "You are a script editor.",
//!         "INT. KITCHEN - NIGHT ...",
//!         CallOptions::default(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

pub mod api;
pub mod batch;
pub mod capability;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod router;
pub mod tokens;

pub use batch::{BatchHandler, BatchOutcome, BatchProcessor, BatchPrompts};
pub use capability::{
    DiscoveryStore, JsonFileDiscoveryStore, MemoryDiscoveryStore, ModelCapabilityRegistry,
    ModelLimits,
};
pub use config::{ConfigLoader, DispatchConfig, Feature, ProviderConfig};
pub use dispatch::{CallOptions, Dispatcher, RetryPolicy};
pub use error::{DispatchError, ErrorCategory, Result};
pub use router::{ApiKeyManager, FeatureConfig, FeatureRouter, RouterState};

/// Entry point wiring configuration, registry, router and batch processor
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Arc<DispatchConfig>,
    router: FeatureRouter,
    batch: BatchProcessor,
}

impl Orchestrator {
    /// Load configuration from the default locations and persist discovered
    /// limits in the user cache directory
    pub fn new() -> Result<Self> {
        let loader = ConfigLoader::new()?;
        let store = Arc::new(JsonFileDiscoveryStore::open_default()?);
        Self::from_config(loader.into_config(), store)
    }

    /// Load configuration from one file on top of the built-in providers
    pub fn with_config_path(path: impl AsRef<Path>) -> Result<Self> {
        let loader = ConfigLoader::from_path(path)?;
        let store = Arc::new(JsonFileDiscoveryStore::open_default()?);
        Self::from_config(loader.into_config(), store)
    }

    pub fn from_config(config: DispatchConfig, store: Arc<dyn DiscoveryStore>) -> Result<Self> {
        let registry = Arc::new(ModelCapabilityRegistry::with_overrides(
            store,
            &config.model_limits,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            RetryPolicy::new(config.retry.clone()),
        )?);

        let batch_config = config.batch.clone();
        let config = Arc::new(config);
        let router = FeatureRouter::new(config.clone(), Arc::new(RouterState::new()), dispatcher);
        let batch = BatchProcessor::new(router.clone(), batch_config);

        Ok(Self {
            config,
            router,
            batch,
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn router(&self) -> &FeatureRouter {
        &self.router
    }

    pub fn registry(&self) -> &Arc<ModelCapabilityRegistry> {
        self.router.dispatcher().registry()
    }

    pub fn model_limits(&self, model: &str) -> ModelLimits {
        self.registry().get_model_limits(model)
    }

    /// Resolve the next target for a feature
    pub fn get_feature_config(&self, feature: Feature) -> Option<FeatureConfig> {
        self.router.get_feature_config(feature)
    }

    pub fn reset_round_robin(&self, feature: Option<Feature>) {
        self.router.reset_round_robin(feature);
    }

    /// Run one request for a feature and return the generated text
    pub async fn call_feature_api(
        &self,
        feature: Feature,
        system_prompt: &str,
        user_prompt: &str,
        opts: CallOptions,
    ) -> Result<String> {
        self.router
            .call_feature_api(feature, system_prompt, user_prompt, &opts)
            .await
    }

    /// Run `items` through a feature in sub-batches
    pub async fn process_batched<H>(
        &self,
        feature: Feature,
        items: &[H::Item],
        handler: &H,
        opts: CallOptions,
    ) -> Result<BatchOutcome<H::Output>>
    where
        H: BatchHandler,
    {
        self.batch
            .process_batched(feature, items, handler, opts)
            .await
    }

    /// Configured provider ids, sorted
    pub fn providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.config.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn provider_info(&self, id: &str) -> Option<ProviderInfo> {
        self.config.providers.get(id).map(|p| ProviderInfo {
            name: id.to_string(),
            platform: p.platform_or(id).to_string(),
            base_url: p.get_base_url(),
            models: p.models.clone(),
            has_keys: !p.get_api_keys().is_empty(),
        })
    }
}

/// Provider information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub name: String,
    pub platform: String,
    pub base_url: String,
    pub models: Vec<String>,
    pub has_keys: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orchestrator(url: &str) -> Orchestrator {
        let config: DispatchConfig = serde_json::from_value(json!({
            "providers": {
                "primary": { "base_url": url, "api_keys": ["k1"], "models": ["deepseek-chat"] },
                "backup": { "platform": "zhipu", "base_url": "https://open.bigmodel.cn/api/paas/v4" }
            },
            "features": { "chat": ["primary:deepseek-chat"] },
            "model_limits": { "deepseek-chat": { "context_window": 64000, "max_output": 4096 } },
            "retry": { "initial_backoff_ms": 1, "max_backoff_ms": 2 }
        }))
        .unwrap();
        Orchestrator::from_config(config, Arc::new(MemoryDiscoveryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_call_feature_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer k1")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"Hello there"},"finish_reason":"stop"}]}"#)
            .create_async()
            .await;

        let orchestrator = orchestrator(&server.url());
        let content = orchestrator
            .call_feature_api(Feature::Chat, "Be brief.", "Hi", CallOptions::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(content, "Hello there");
    }

    #[test]
    fn test_limit_overrides_apply() {
        let orchestrator = orchestrator("http://127.0.0.1:9");
        assert_eq!(
            orchestrator.model_limits("deepseek-chat"),
            ModelLimits::new(64_000, 4_096)
        );
        assert_eq!(
            orchestrator.model_limits("deepseek-v3.2"),
            ModelLimits::new(128_000, 8_192)
        );
        assert_eq!(
            orchestrator.model_limits("foobar-7b"),
            ModelLimits::new(32_000, 4_096)
        );
    }

    #[test]
    fn test_provider_info() {
        let orchestrator = orchestrator("http://127.0.0.1:9");
        assert_eq!(orchestrator.providers(), vec!["backup", "primary"]);

        let info = orchestrator.provider_info("backup").unwrap();
        assert_eq!(info.platform, "zhipu");
        assert!(!info.has_keys);
        assert!(orchestrator.provider_info("missing").is_none());
    }
}
