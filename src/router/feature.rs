//! Feature Routing
//!
//! Resolves a logical feature to a concrete provider, model and key pool.
//! Features bound to several targets are served round-robin with a
//! per-feature counter that only restarts on an explicit reset.

use crate::client::http::header_map;
use crate::config::{DispatchConfig, Feature, ProviderConfig};
use crate::dispatch::{CallOptions, Dispatcher};
use crate::error::{DispatchError, Result};
use crate::router::{ApiKeyManager, BindingRoute};
use parking_lot::{Mutex, RwLock};
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared routing state: round-robin counters and one key manager per provider
#[derive(Debug, Default)]
pub struct RouterState {
    feature_counters: Mutex<HashMap<Feature, usize>>,
    key_managers: RwLock<HashMap<String, Arc<ApiKeyManager>>>,
}

impl RouterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index to serve for `feature` among `len` targets, advancing the counter
    pub fn next_index(&self, feature: Feature, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let mut counters = self.feature_counters.lock();
        let counter = counters.entry(feature).or_insert(0);
        let idx = *counter % len;
        *counter = counter.wrapping_add(1);
        idx
    }

    /// Current counter value of a feature
    pub fn counter(&self, feature: Feature) -> usize {
        self.feature_counters
            .lock()
            .get(&feature)
            .copied()
            .unwrap_or(0)
    }

    /// Restart the cycle for one feature, or for all of them
    pub fn reset(&self, feature: Option<Feature>) {
        let mut counters = self.feature_counters.lock();
        match feature {
            Some(feature) => {
                counters.remove(&feature);
            }
            None => counters.clear(),
        }
    }

    /// Cached key manager of a provider, created on first use
    pub fn key_manager<F>(&self, provider_id: &str, create: F) -> Arc<ApiKeyManager>
    where
        F: FnOnce() -> ApiKeyManager,
    {
        if let Some(manager) = self.key_managers.read().get(provider_id) {
            return manager.clone();
        }
        self.key_managers
            .write()
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(create()))
            .clone()
    }
}

/// A resolved feature target
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    pub feature: Feature,
    /// Provider id in the providers config
    pub provider: String,
    pub platform: String,
    pub model: String,
    pub base_url: String,
    pub headers: Option<HeaderMap>,
    pub key_manager: Arc<ApiKeyManager>,
}

impl FeatureConfig {
    pub fn new(
        feature: Feature,
        provider: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        key_manager: Arc<ApiKeyManager>,
    ) -> Self {
        let provider = provider.into();
        Self {
            feature,
            platform: provider.clone(),
            provider,
            model: model.into(),
            base_url: base_url.into(),
            headers: None,
            key_manager,
        }
    }

    pub fn with_headers(mut self, headers: Option<HeaderMap>) -> Self {
        self.headers = headers;
        self
    }

    /// Key the next request would use
    pub fn api_key(&self) -> Result<String> {
        self.key_manager.current_key()
    }
}

/// Feature to provider router
#[derive(Debug, Clone)]
pub struct FeatureRouter {
    config: Arc<DispatchConfig>,
    state: Arc<RouterState>,
    dispatcher: Arc<Dispatcher>,
}

impl FeatureRouter {
    pub fn new(
        config: Arc<DispatchConfig>,
        state: Arc<RouterState>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            state,
            dispatcher,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<RouterState> {
        &self.state
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Resolve the target serving the next request for `feature`.
    ///
    /// Bindings that do not resolve to a provider are skipped, so a broken
    /// entry never takes a slot in the rotation.
    pub fn get_feature_config(&self, feature: Feature) -> Option<FeatureConfig> {
        let mut candidates = self.candidate_configs(feature);
        match candidates.len() {
            0 => None,
            1 => candidates.pop(),
            n => {
                let idx = self.state.next_index(feature, n);
                debug!(feature = %feature, index = idx, of = n, "Round-robin binding selected");
                Some(candidates.swap_remove(idx))
            }
        }
    }

    /// Every resolvable target of a feature, in binding order, without
    /// advancing the round-robin counter
    pub fn candidate_configs(&self, feature: Feature) -> Vec<FeatureConfig> {
        let bindings = self
            .config
            .features
            .get(&feature)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if bindings.is_empty() {
            return self.default_config(feature).into_iter().collect();
        }

        bindings
            .iter()
            .filter_map(|binding| match self.resolve(feature, binding) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(feature = %feature, binding = %binding, error = %e, "Skipping unresolvable binding");
                    None
                }
            })
            .collect()
    }

    /// Clear the round-robin counter of one feature, or of every feature
    pub fn reset_round_robin(&self, feature: Option<Feature>) {
        self.state.reset(feature);
    }

    /// Run one request for `feature`.
    ///
    /// `opts.config_override` bypasses resolution entirely.
    pub async fn call_feature_api(
        &self,
        feature: Feature,
        system_prompt: &str,
        user_prompt: &str,
        opts: &CallOptions,
    ) -> Result<String> {
        let target = match &opts.config_override {
            Some(config) => config.clone(),
            None => self
                .get_feature_config(feature)
                .ok_or(DispatchError::FeatureNotConfigured(feature))?,
        };
        self.dispatcher
            .dispatch(&target, system_prompt, user_prompt, opts)
            .await
    }

    fn default_config(&self, feature: Feature) -> Option<FeatureConfig> {
        let platform = self.config.default_platforms.get(&feature)?;
        let (id, provider) = self.find_provider(platform)?;
        let model = provider.models.first()?;
        Some(self.build_config(feature, id, provider, model))
    }

    fn resolve(&self, feature: Feature, binding: &BindingRoute) -> Result<FeatureConfig> {
        let (id, provider) = self
            .find_provider(&binding.platform)
            .ok_or_else(|| DispatchError::ProviderNotFound(binding.platform.clone()))?;
        if provider.get_base_url().trim().is_empty() {
            return Err(DispatchError::Config(format!(
                "Provider '{}' has no base_url",
                id
            )));
        }
        Ok(self.build_config(feature, id, provider, &binding.model))
    }

    // Exact provider id first, then the first provider (by id) on that platform
    fn find_provider<'a>(&'a self, platform: &str) -> Option<(&'a str, &'a ProviderConfig)> {
        if let Some((id, provider)) = self.config.providers.get_key_value(platform) {
            return Some((id.as_str(), provider));
        }
        self.config
            .providers
            .iter()
            .filter(|(id, provider)| provider.platform_or(id) == platform)
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(id, provider)| (id.as_str(), provider))
    }

    fn build_config(
        &self,
        feature: Feature,
        id: &str,
        provider: &ProviderConfig,
        model: &str,
    ) -> FeatureConfig {
        let key_manager = self.state.key_manager(id, || {
            ApiKeyManager::new(id, provider.get_api_keys(), self.config.key_pool.clone())
        });

        FeatureConfig {
            feature,
            provider: id.to_string(),
            platform: provider.platform_or(id).to_string(),
            model: model.to_string(),
            base_url: provider.get_base_url(),
            headers: header_map(&provider.headers),
            key_manager,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{MemoryDiscoveryStore, ModelCapabilityRegistry};
    use crate::dispatch::RetryPolicy;
    use serde_json::json;

    fn router(config: DispatchConfig) -> FeatureRouter {
        let registry = Arc::new(ModelCapabilityRegistry::new(Arc::new(
            MemoryDiscoveryStore::new(),
        )));
        let dispatcher = Dispatcher::new(registry, RetryPolicy::default()).unwrap();
        FeatureRouter::new(
            Arc::new(config),
            Arc::new(RouterState::new()),
            Arc::new(dispatcher),
        )
    }

    fn two_provider_config() -> DispatchConfig {
        serde_json::from_value(json!({
            "providers": {
                "a": { "base_url": "https://a.example.com", "api_keys": ["ka"], "models": ["m1"] },
                "b": { "base_url": "https://b.example.com/v1", "api_keys": ["kb"], "models": ["m2"] }
            },
            "features": {
                "script_analysis": ["a:m1", "b:m2"],
                "chat": ["b:m2"]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_round_robin_alternates() {
        let router = router(two_provider_config());

        let seen: Vec<String> = (0..10)
            .map(|_| {
                let config = router.get_feature_config(Feature::ScriptAnalysis).unwrap();
                format!("{}:{}", config.provider, config.model)
            })
            .collect();

        let expected: Vec<String> = (0..10)
            .map(|i| if i % 2 == 0 { "a:m1" } else { "b:m2" }.to_string())
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_concurrent_callers_share_bindings_evenly() {
        let router = router(two_provider_config());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let router = router.clone();
                std::thread::spawn(move || {
                    let mut counts: HashMap<String, usize> = HashMap::new();
                    for _ in 0..250 {
                        let config = router.get_feature_config(Feature::ScriptAnalysis).unwrap();
                        *counts.entry(config.provider).or_insert(0) += 1;
                    }
                    counts
                })
            })
            .collect();

        let mut totals: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for (provider, n) in handle.join().unwrap() {
                *totals.entry(provider).or_insert(0) += n;
            }
        }
        assert_eq!(totals.len(), 2);
        assert_eq!(totals["a"], 1_000);
        assert_eq!(totals["b"], 1_000);
        assert_eq!(router.state().counter(Feature::ScriptAnalysis), 2_000);
    }

    #[test]
    fn test_n_calls_visit_each_binding_once() {
        let mut config = two_provider_config();
        config.providers.insert(
            "c".into(),
            ProviderConfig::new("https://c.example.com", vec!["kc".into()]),
        );
        config.features.insert(
            Feature::ShotBreakdown,
            vec![
                BindingRoute::new("c", "x"),
                BindingRoute::new("a", "m1"),
                BindingRoute::new("b", "m2"),
            ],
        );
        let router = router(config);

        let models: Vec<String> = (0..3)
            .map(|_| router.get_feature_config(Feature::ShotBreakdown).unwrap().model)
            .collect();
        assert_eq!(models, vec!["x", "m1", "m2"]);
    }

    #[test]
    fn test_reset_restarts_cycle() {
        let router = router(two_provider_config());

        router.get_feature_config(Feature::ScriptAnalysis);
        assert_eq!(router.state().counter(Feature::ScriptAnalysis), 1);

        router.reset_round_robin(Some(Feature::ScriptAnalysis));
        assert_eq!(router.state().counter(Feature::ScriptAnalysis), 0);
        let config = router.get_feature_config(Feature::ScriptAnalysis).unwrap();
        assert_eq!(config.provider, "a");

        router.get_feature_config(Feature::ScriptAnalysis);
        router.reset_round_robin(None);
        assert_eq!(router.state().counter(Feature::ScriptAnalysis), 0);
    }

    #[test]
    fn test_single_binding_does_not_advance_counter() {
        let router = router(two_provider_config());
        for _ in 0..3 {
            assert_eq!(router.get_feature_config(Feature::Chat).unwrap().provider, "b");
        }
        assert_eq!(router.state().counter(Feature::Chat), 0);
    }

    #[test]
    fn test_default_platform_fallback() {
        let mut config = two_provider_config();
        config
            .default_platforms
            .insert(Feature::ImagePrompt, "a".to_string());
        let router = router(config);

        let config = router.get_feature_config(Feature::ImagePrompt).unwrap();
        assert_eq!(config.provider, "a");
        assert_eq!(config.model, "m1");
        assert!(router.get_feature_config(Feature::VideoPrompt).is_none());
    }

    #[test]
    fn test_unresolvable_bindings_are_skipped() {
        let mut config = two_provider_config();
        config.features.insert(
            Feature::SceneExtraction,
            vec![BindingRoute::new("missing", "m"), BindingRoute::new("a", "m1")],
        );
        config.features.insert(
            Feature::CharacterExtraction,
            vec![BindingRoute::new("missing", "m")],
        );
        let router = router(config);

        for _ in 0..3 {
            let config = router.get_feature_config(Feature::SceneExtraction).unwrap();
            assert_eq!(config.provider, "a");
        }
        assert!(router
            .get_feature_config(Feature::CharacterExtraction)
            .is_none());
    }

    #[test]
    fn test_platform_lookup_and_shared_key_manager() {
        let config: DispatchConfig = serde_json::from_value(json!({
            "providers": {
                "ds-team": {
                    "platform": "deepseek",
                    "base_url": "https://api.deepseek.com",
                    "api_keys": ["k1", "k2"],
                    "headers": { "x-team": "story" }
                }
            },
            "features": {
                "script_analysis": ["deepseek:deepseek-v3.2"],
                "scene_extraction": ["ds-team:deepseek-chat"]
            }
        }))
        .unwrap();
        let router = router(config);

        let first = router.get_feature_config(Feature::ScriptAnalysis).unwrap();
        let second = router.get_feature_config(Feature::SceneExtraction).unwrap();
        assert_eq!(first.provider, "ds-team");
        assert_eq!(first.platform, "deepseek");
        assert!(Arc::ptr_eq(&first.key_manager, &second.key_manager));
        assert_eq!(first.api_key().unwrap(), "k1");
        assert_eq!(
            first.headers.as_ref().and_then(|h| h.get("x-team")).unwrap(),
            "story"
        );
    }

    #[test]
    fn test_candidates_do_not_advance() {
        let router = router(two_provider_config());
        assert_eq!(router.candidate_configs(Feature::ScriptAnalysis).len(), 2);
        assert_eq!(router.state().counter(Feature::ScriptAnalysis), 0);
    }

    #[tokio::test]
    async fn test_call_unconfigured_feature() {
        let router = router(DispatchConfig::default());
        let err = router
            .call_feature_api(Feature::Chat, "sys", "hi", &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::FeatureNotConfigured(Feature::Chat)));
    }

    #[tokio::test]
    async fn test_call_with_override() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer ko")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"ok"},"finish_reason":"stop"}]}"#)
            .create_async()
            .await;

        let router = router(DispatchConfig::default());
        let manager = Arc::new(ApiKeyManager::new(
            "override",
            vec!["ko".into()],
            Default::default(),
        ));
        let target = FeatureConfig::new(Feature::Chat, "override", "m", server.url(), manager);

        let content = router
            .call_feature_api(
                Feature::Chat,
                "",
                "hi",
                &CallOptions::default().with_config(target),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(content, "ok");
    }
}
