//! Retry Policy
//!
//! Failure classification and backoff schedule for one logical request.

use crate::client::rate_limit::is_rate_limit_error;
use crate::client::HttpReply;
use crate::config::RetryConfig;
use crate::error::{DispatchError, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a non-success reply means for the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// 429 or rate-limit phrasing: cool the key down and back off
    RateLimited,
    /// 401/403: disable the key and move to the next one
    AuthFailed,
    /// 400: mine the body for limits
    BadRequest,
    /// 5xx: back off and retry
    ServerError,
    /// Anything else is surfaced as is
    Rejected,
}

impl Failure {
    pub fn classify(reply: &HttpReply) -> Self {
        let status = reply.status.as_u16();
        if is_rate_limit_error(status, &reply.body) {
            return Failure::RateLimited;
        }
        match status {
            401 | 403 => Failure::AuthFailed,
            400 | 422 => Failure::BadRequest,
            s if s >= 500 => Failure::ServerError,
            _ => Failure::Rejected,
        }
    }
}

/// Bounded retries with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Sends allowed for transient failures, never below one
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout()
    }

    /// Fresh schedule for one request
    pub fn backoff(&self) -> ExponentialBackoff {
        let initial = Duration::from_millis(self.config.initial_backoff_ms);
        let mut backoff = ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: self.config.randomization_factor.clamp(0.0, 1.0),
            multiplier: self.config.multiplier.max(1.0),
            max_interval: Duration::from_millis(self.config.max_backoff_ms).max(initial),
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }

    /// Sleep for the next backoff interval, waking early on cancellation
    pub async fn pause(
        &self,
        backoff: &mut ExponentialBackoff,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let wait = backoff.next_backoff().unwrap_or(backoff.max_interval);
        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(DispatchError::Cancelled),
                _ = tokio::time::sleep(wait) => Ok(()),
            },
            None => {
                tokio::time::sleep(wait).await;
                Ok(())
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn reply(status: u16, body: &str) -> HttpReply {
        HttpReply {
            status: StatusCode::from_u16(status).unwrap(),
            body: body.to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(Failure::classify(&reply(429, "")), Failure::RateLimited);
        assert_eq!(
            Failure::classify(&reply(400, "Rate limit reached for requests")),
            Failure::RateLimited
        );
        assert_eq!(Failure::classify(&reply(401, "bad key")), Failure::AuthFailed);
        assert_eq!(Failure::classify(&reply(403, "forbidden")), Failure::AuthFailed);
        assert_eq!(
            Failure::classify(&reply(400, "valid range of max_tokens is [1, 8192]")),
            Failure::BadRequest
        );
        assert_eq!(Failure::classify(&reply(502, "")), Failure::ServerError);
        assert_eq!(Failure::classify(&reply(404, "no such model")), Failure::Rejected);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            multiplier: 2.0,
            randomization_factor: 0.0,
            ..RetryConfig::default()
        });
        let mut backoff = policy.backoff();

        let waits: Vec<_> = (0..4).map(|_| backoff.next_backoff().unwrap()).collect();
        assert_eq!(
            waits,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }

    #[test]
    fn test_max_attempts_floor() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        });
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_pause_cancelled() {
        let policy = RetryPolicy::new(RetryConfig {
            initial_backoff_ms: 60_000,
            ..RetryConfig::default()
        });
        let mut backoff = policy.backoff();
        let token = CancellationToken::new();
        token.cancel();

        let result = tokio_test::block_on(policy.pause(&mut backoff, Some(&token)));
        assert!(matches!(result, Err(DispatchError::Cancelled)));
    }
}
