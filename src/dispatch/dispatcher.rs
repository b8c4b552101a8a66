//! Request Dispatcher
//!
//! Runs one logical request against a resolved feature target: token budget
//! checks, the HTTP exchange, key failover, retries and limit discovery.

use crate::api::extract::truncate_body;
use crate::api::{Completion, CompletionRequest, ProviderResponse};
use crate::capability::{ModelCapabilityRegistry, ModelLimits};
use crate::client::{chat_completions_url, HttpClient};
use crate::dispatch::retry::{Failure, RetryPolicy};
use crate::dispatch::CallOptions;
use crate::error::{DispatchError, Result};
use crate::router::FeatureConfig;
use crate::tokens::estimate_prompt_tokens;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Share of the context window the prompt may take
pub const INPUT_BUDGET_RATIO: f64 = 0.9;

/// Context share held back when estimating room for output
pub const OUTPUT_MARGIN_RATIO: f64 = 0.1;

/// Warn when the room for output falls under this share of the request
pub const LOW_OUTPUT_WARN_RATIO: f64 = 0.5;

/// Reasoning share of the completion above which an empty answer is retried
/// with a larger output budget
pub const REASONING_SHARE_RETRY: f64 = 0.8;

/// Executes requests
#[derive(Debug)]
pub struct Dispatcher {
    http: HttpClient,
    registry: Arc<ModelCapabilityRegistry>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModelCapabilityRegistry>, retry: RetryPolicy) -> Result<Self> {
        let http = HttpClient::new(retry.request_timeout())?;
        Ok(Self {
            http,
            registry,
            retry,
        })
    }

    pub fn registry(&self) -> &Arc<ModelCapabilityRegistry> {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send a request and return the generated text
    pub async fn dispatch(
        &self,
        target: &FeatureConfig,
        system_prompt: &str,
        user_prompt: &str,
        opts: &CallOptions,
    ) -> Result<String> {
        self.dispatch_completion(target, system_prompt, user_prompt, opts)
            .await
            .map(|completion| completion.content)
    }

    /// Send a request and return the full completion, reasoning included
    pub async fn dispatch_completion(
        &self,
        target: &FeatureConfig,
        system_prompt: &str,
        user_prompt: &str,
        opts: &CallOptions,
    ) -> Result<Completion> {
        let limits = self.registry.get_model_limits(&target.model);
        let input_tokens = estimate_prompt_tokens(system_prompt, user_prompt);
        let mut max_tokens = self.check_budget(target, limits, input_tokens, opts.max_tokens)?;

        let url = chat_completions_url(&target.base_url);
        let max_attempts = self.retry.max_attempts();
        let mut backoff = self.retry.backoff();
        let mut attempts = 0u32;
        let mut discovery_retried = false;
        let mut reasoning_retried = false;
        let mut last_auth_error: Option<String> = None;

        loop {
            if opts.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            let key = match target.key_manager.current_key() {
                Ok(key) => key,
                Err(DispatchError::KeysExhausted(provider)) => {
                    return Err(match last_auth_error.take() {
                        Some(message) => DispatchError::Auth { provider, message },
                        None => DispatchError::KeysExhausted(provider),
                    });
                }
                Err(e) => return Err(e),
            };

            let request = CompletionRequest::new(target.model.as_str(), system_prompt, user_prompt)
                .with_temperature(opts.temperature)
                .with_max_tokens(max_tokens)
                .with_thinking_disabled(opts.disable_thinking);

            debug!(
                provider = %target.provider,
                model = %target.model,
                max_tokens,
                attempt = attempts + 1,
                "Sending request"
            );

            let reply = match self
                .http
                .post_json(
                    &url,
                    &request,
                    &key,
                    target.headers.as_ref(),
                    opts.timeout,
                    opts.cancel.as_ref(),
                )
                .await
            {
                Ok(reply) => reply,
                Err(e) if e.is_retryable() => {
                    attempts += 1;
                    if attempts >= max_attempts {
                        return Err(e);
                    }
                    warn!(provider = %target.provider, error = %e, attempt = attempts, "Transport error, retrying");
                    self.retry.pause(&mut backoff, opts.cancel.as_ref()).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if reply.is_success() {
                let completion = ProviderResponse::parse(&reply.body)?.into_completion();

                if completion.finished_by("sensitive") || completion.finished_by("content_filter") {
                    target.key_manager.rotate_key();
                    return Err(DispatchError::ContentModeration {
                        provider: target.provider.clone(),
                        model: target.model.clone(),
                        finish_reason: completion.finish_reason.unwrap_or_default(),
                    });
                }

                if completion.is_empty() {
                    if !reasoning_retried && reasoning_starved(&completion) {
                        let cap = self.registry.get_model_limits(&target.model).max_output;
                        let raised = max_tokens.saturating_mul(2).min(cap);
                        if raised > max_tokens {
                            info!(
                                model = %target.model,
                                from = max_tokens,
                                to = raised,
                                "Reasoning consumed the output budget, retrying with more tokens"
                            );
                            reasoning_retried = true;
                            max_tokens = raised;
                            continue;
                        }
                    }
                    return Err(DispatchError::EmptyResponse {
                        model: target.model.clone(),
                        finish_reason: completion
                            .finish_reason
                            .unwrap_or_else(|| "unknown".to_string()),
                    });
                }

                target.key_manager.rotate_key();
                return Ok(completion);
            }

            match Failure::classify(&reply) {
                Failure::RateLimited => {
                    target
                        .key_manager
                        .mark_rate_limited(&key, reply.retry_after);
                    attempts += 1;
                    if attempts >= max_attempts {
                        return Err(DispatchError::RateLimited {
                            provider: target.provider.clone(),
                            attempts,
                        });
                    }
                    warn!(provider = %target.provider, attempt = attempts, "Rate limited, rotating key");
                    self.retry.pause(&mut backoff, opts.cancel.as_ref()).await?;
                }
                Failure::AuthFailed => {
                    // Disabling the key bounds this branch by the pool size
                    target.key_manager.mark_hard_failure(&key);
                    last_auth_error = Some(format!(
                        "HTTP {}: {}",
                        reply.status.as_u16(),
                        truncate_body(&reply.body)
                    ));
                }
                Failure::BadRequest => {
                    if !discovery_retried {
                        if let Some(corrected) =
                            self.discover(target, &reply.body, input_tokens, max_tokens)
                        {
                            info!(
                                model = %target.model,
                                from = max_tokens,
                                to = corrected,
                                "Retrying with discovered output limit"
                            );
                            discovery_retried = true;
                            max_tokens = corrected;
                            continue;
                        }
                    }
                    return Err(DispatchError::BadRequest {
                        provider: target.provider.clone(),
                        body: truncate_body(&reply.body).to_string(),
                    });
                }
                Failure::ServerError => {
                    attempts += 1;
                    if attempts >= max_attempts {
                        return Err(provider_error(target, &reply.status, &reply.body));
                    }
                    warn!(
                        provider = %target.provider,
                        status = reply.status.as_u16(),
                        attempt = attempts,
                        "Server error, retrying"
                    );
                    self.retry.pause(&mut backoff, opts.cancel.as_ref()).await?;
                }
                Failure::Rejected => {
                    return Err(provider_error(target, &reply.status, &reply.body));
                }
            }
        }
    }

    /// Clamp the requested output to the model and reject prompts that cannot fit
    fn check_budget(
        &self,
        target: &FeatureConfig,
        limits: ModelLimits,
        input_tokens: u32,
        requested: u32,
    ) -> Result<u32> {
        let max_tokens = requested.min(limits.max_output).max(1);
        if max_tokens < requested {
            debug!(
                model = %target.model,
                requested,
                clamped = max_tokens,
                "Clamped max_tokens to model limit"
            );
        }

        let input_budget = (limits.context_window as f64 * INPUT_BUDGET_RATIO) as u32;
        if input_tokens > input_budget {
            return Err(DispatchError::TokenBudgetExceeded {
                model: target.model.clone(),
                input_tokens,
                budget: input_budget,
            });
        }

        let room = output_room(limits, input_tokens);
        if low_output_room(room, requested) {
            warn!(
                model = %target.model,
                input_tokens,
                room,
                requested,
                "Little room left for output; the response may be truncated"
            );
        }

        Ok(max_tokens)
    }

    /// Learn from a 400 body; returns a smaller output budget worth retrying with
    fn discover(
        &self,
        target: &FeatureConfig,
        body: &str,
        input_tokens: u32,
        max_tokens: u32,
    ) -> Option<u32> {
        let found = self.registry.discover_from_error(&target.model, body)?;
        let margin_fit = found.context_window.map(|ctx| {
            let margin = (ctx as f64 * OUTPUT_MARGIN_RATIO) as u32;
            ctx.saturating_sub(input_tokens).saturating_sub(margin)
        });

        [found.max_output, margin_fit]
            .into_iter()
            .flatten()
            .filter(|n| *n > 0)
            .min()
            .filter(|n| *n < max_tokens)
    }
}

/// Context left for output once the prompt and the safety margin are taken
fn output_room(limits: ModelLimits, input_tokens: u32) -> u32 {
    let margin = (limits.context_window as f64 * OUTPUT_MARGIN_RATIO) as u32;
    limits
        .context_window
        .saturating_sub(input_tokens)
        .saturating_sub(margin)
}

fn low_output_room(room: u32, requested: u32) -> bool {
    (room as f64) < requested as f64 * LOW_OUTPUT_WARN_RATIO
}

fn reasoning_starved(completion: &Completion) -> bool {
    if !completion.finished_by("length") || !completion.has_reasoning() {
        return false;
    }
    if completion.completion_tokens == 0 {
        return false;
    }
    completion.reasoning_tokens as f64 / completion.completion_tokens as f64 > REASONING_SHARE_RETRY
}

fn provider_error(target: &FeatureConfig, status: &reqwest::StatusCode, body: &str) -> DispatchError {
    DispatchError::Provider {
        provider: target.provider.clone(),
        status: status.as_u16(),
        body: truncate_body(body).to_string(),
    }
}
