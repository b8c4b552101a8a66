//! Batch Processor
//!
//! Runs a list of items through a feature in token-bounded sub-batches.
//! A failed sub-batch is counted and skipped; the others still complete.

use crate::batch::plan::{plan_batches, BatchBudget, ItemCost};
use crate::capability::{ModelLimits, DEFAULT_LIMITS};
use crate::config::{BatchConfig, Feature};
use crate::dispatch::CallOptions;
use crate::error::{DispatchError, ErrorCategory, Result};
use crate::router::{FeatureConfig, FeatureRouter};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::{debug, info, warn};

/// Prompts for one sub-batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPrompts {
    pub system: String,
    pub user: String,
}

impl BatchPrompts {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Caller-side half of a batched job
pub trait BatchHandler: Send + Sync {
    type Item: Send + Sync;
    type Output: Send;

    /// Stable id used as the key of the result map
    fn item_id(&self, item: &Self::Item) -> String;

    fn build_prompts(&self, batch: &[Self::Item]) -> BatchPrompts;

    /// Parse a response into per-item results. An error re-sends the sub-batch.
    fn parse_result(
        &self,
        content: &str,
        batch: &[Self::Item],
    ) -> anyhow::Result<HashMap<String, Self::Output>>;

    fn estimate_item_tokens(&self, item: &Self::Item) -> u32;

    fn estimate_item_output_tokens(&self, item: &Self::Item) -> u32;

    /// Instructions and framing paid once per sub-batch
    fn base_prompt_tokens(&self) -> u32 {
        0
    }
}

/// Aggregated result of a batched job.
///
/// Items of failed sub-batches are absent from `results`; treat them as not
/// generated rather than as an error.
#[derive(Debug)]
pub struct BatchOutcome<P> {
    pub results: HashMap<String, P>,
    pub failed_batches: usize,
    pub total_batches: usize,
    /// Ids of the items in failed sub-batches
    pub failed_items: Vec<String>,
}

impl<P> BatchOutcome<P> {
    fn empty() -> Self {
        Self {
            results: HashMap::new(),
            failed_batches: 0,
            total_batches: 0,
            failed_items: Vec::new(),
        }
    }

    pub fn successful_items(&self) -> usize {
        self.results.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_batches == 0
    }
}

/// Drives sub-batches through the router
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    router: FeatureRouter,
    config: BatchConfig,
}

impl BatchProcessor {
    pub fn new(router: FeatureRouter, config: BatchConfig) -> Self {
        Self { router, config }
    }

    /// Split `items` into sub-batches and run them with bounded concurrency.
    ///
    /// Fails only when the feature resolves to nothing. Each sub-batch asks
    /// the router for its target, so multi-binding features spread the load.
    /// The cancellation token in `opts` is checked before every sub-batch;
    /// sub-batches not yet started count as failed.
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
        let candidates = match &opts.config_override {
            Some(config) => vec![config.clone()],
            None => self.router.candidate_configs(feature),
        };
        if candidates.is_empty() {
            return Err(DispatchError::FeatureNotConfigured(feature));
        }
        if items.is_empty() {
            return Ok(BatchOutcome::empty());
        }

        let limits = self.tightest_limits(&candidates);
        let budget = BatchBudget::new(limits, &self.config, handler.base_prompt_tokens());
        let costs: Vec<ItemCost> = items
            .iter()
            .map(|item| {
                ItemCost::new(
                    handler.estimate_item_tokens(item),
                    handler.estimate_item_output_tokens(item),
                )
            })
            .collect();
        let ranges = plan_batches(&costs, &budget);
        let concurrency = available_keys(&candidates)
            .min(self.config.max_concurrency)
            .max(1);

        info!(
            feature = %feature,
            items = items.len(),
            batches = ranges.len(),
            concurrency,
            "Starting batched job"
        );

        let opts = &opts;
        let costs = &costs;
        let finished: Vec<(Range<usize>, Result<HashMap<String, H::Output>>)> =
            stream::iter(ranges.iter().cloned())
                .map(|range| async move {
                    let expected_output = costs[range.clone()]
                        .iter()
                        .fold(0u32, |sum, c| sum.saturating_add(c.output));
                    let result = self
                        .run_batch(feature, &items[range.clone()], handler, opts, expected_output)
                        .await;
                    (range, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut outcome = BatchOutcome {
            total_batches: ranges.len(),
            ..BatchOutcome::empty()
        };
        for (range, result) in finished {
            match result {
                Ok(parsed) => outcome.results.extend(parsed),
                Err(e) => {
                    warn!(
                        feature = %feature,
                        items = range.len(),
                        error = %e,
                        "Sub-batch failed"
                    );
                    outcome.failed_batches += 1;
                    outcome
                        .failed_items
                        .extend(items[range].iter().map(|item| handler.item_id(item)));
                }
            }
        }

        info!(
            feature = %feature,
            succeeded = outcome.successful_items(),
            failed_batches = outcome.failed_batches,
            "Batched job finished"
        );
        Ok(outcome)
    }

    async fn run_batch<H>(
        &self,
        feature: Feature,
        batch: &[H::Item],
        handler: &H,
        opts: &CallOptions,
        expected_output: u32,
    ) -> Result<HashMap<String, H::Output>>
    where
        H: BatchHandler,
    {
        if opts.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let prompts = handler.build_prompts(batch);
        let ids: HashSet<String> = batch.iter().map(|item| handler.item_id(item)).collect();
        let call_opts = opts
            .clone()
            .with_max_tokens(opts.max_tokens.max(expected_output));
        let attempts = self.config.batch_attempts.max(1);
        let retry = self.router.dispatcher().retry_policy();
        let mut backoff = retry.backoff();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let target = self.target(feature, opts)?;
            let content = match self
                .router
                .dispatcher()
                .dispatch(&target, &prompts.system, &prompts.user, &call_opts)
                .await
            {
                Ok(content) => content,
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!(feature = %feature, attempt, error = %e, "Re-sending sub-batch");
                    // Rate limits and provider faults need time to clear
                    if e.category() == ErrorCategory::Transient {
                        retry.pause(&mut backoff, opts.cancel.as_ref()).await?;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            match handler.parse_result(&content, batch) {
                Ok(mut parsed) => {
                    parsed.retain(|id, _| ids.contains(id));
                    return Ok(parsed);
                }
                Err(e) if attempt < attempts => {
                    debug!(feature = %feature, attempt, error = %e, "Unparseable sub-batch result, re-sending");
                }
                Err(e) => {
                    return Err(DispatchError::Response(format!(
                        "Failed to parse sub-batch result: {:#}",
                        e
                    )))
                }
            }
        }
    }

    fn target(&self, feature: Feature, opts: &CallOptions) -> Result<FeatureConfig> {
        match &opts.config_override {
            Some(config) => Ok(config.clone()),
            None => self
                .router
                .get_feature_config(feature)
                .ok_or(DispatchError::FeatureNotConfigured(feature)),
        }
    }

    // Smallest window and output among the targets a sub-batch may land on
    fn tightest_limits(&self, candidates: &[FeatureConfig]) -> ModelLimits {
        let registry = self.router.dispatcher().registry();
        candidates
            .iter()
            .map(|config| registry.get_model_limits(&config.model))
            .reduce(|a, b| {
                ModelLimits::new(
                    a.context_window.min(b.context_window),
                    a.max_output.min(b.max_output),
                )
            })
            .unwrap_or(DEFAULT_LIMITS)
    }
}

/// Enabled keys across the distinct providers of `candidates`
fn available_keys(candidates: &[FeatureConfig]) -> usize {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|config| seen.insert(config.provider.as_str()))
        .map(|config| config.key_manager.available_count())
        .sum()
}
