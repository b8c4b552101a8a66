//! Dispatch Error Types
//!
//! Error taxonomy for routing, dispatching and batching requests.

use crate::config::Feature;

/// Main error type for dispatch operations
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Configuration errors (invalid JSON, missing key/URL/model, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No provider binding resolves for a feature
    #[error("Feature '{0}' is not configured. Bind it with \"{0}\": [\"platform:model\"] in the features config")]
    FeatureNotConfigured(Feature),

    /// Provider referenced by a binding is missing
    #[error("Provider '{0}' not found. Add it to the providers config with a `base_url`")]
    ProviderNotFound(String),

    /// Every key of the pool has been disabled
    #[error("No API keys available for '{0}': every key in the pool failed authentication")]
    KeysExhausted(String),

    /// Still rate limited after the retry budget was spent
    #[error("Rate limited by '{provider}' after {attempts} attempts. Consider adding more API keys for rotation.")]
    RateLimited { provider: String, attempts: u32 },

    /// Authentication failed and no further key could be tried
    #[error("Authentication failed for '{provider}': {message}. Check your API keys.")]
    Auth { provider: String, message: String },

    /// Pre-flight rejection: the prompt does not fit the model's context window
    #[error("Input of ~{input_tokens} tokens exceeds the {budget}-token input budget of '{model}'")]
    TokenBudgetExceeded {
        model: String,
        input_tokens: u32,
        budget: u32,
    },

    /// The provider refused the content
    #[error("Content rejected by '{provider}' moderation (model '{model}', finish_reason '{finish_reason}')")]
    ContentModeration {
        provider: String,
        model: String,
        finish_reason: String,
    },

    /// HTTP 400 that discovery could not fix
    #[error("Bad request to '{provider}': {body}")]
    BadRequest { provider: String, body: String },

    /// Any other non-success status
    #[error("'{provider}' returned HTTP {status}: {body}")]
    Provider {
        provider: String,
        status: u16,
        body: String,
    },

    /// Successful call without generated content
    #[error("'{model}' returned an empty response (finish_reason: {finish_reason})")]
    EmptyResponse { model: String, finish_reason: String },

    /// HTTP request failed
    #[error("Request failed: {0}")]
    Request(String),

    /// Response parsing failed
    #[error("Response error: {0}")]
    Response(String),

    /// Timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Aborted through a cancellation token
    #[error("Request cancelled")]
    Cancelled,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by callers and the retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Never retried; fix the configuration
    Configuration,
    /// Retried with backoff before being surfaced
    Transient,
    /// Key pool exhausted by auth failures
    Auth,
    /// Pre-flight token budget failure, no network call was made
    TokenBudget,
    /// Offer "skip" rather than "retry"
    ContentModeration,
    /// Non-retryable provider answer
    Provider,
    Cancelled,
}

impl DispatchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DispatchError::Config(_)
            | DispatchError::FeatureNotConfigured(_)
            | DispatchError::ProviderNotFound(_) => ErrorCategory::Configuration,
            DispatchError::RateLimited { .. }
            | DispatchError::Request(_)
            | DispatchError::Timeout(_) => ErrorCategory::Transient,
            DispatchError::Provider { status, .. } if *status >= 500 => ErrorCategory::Transient,
            DispatchError::KeysExhausted(_) | DispatchError::Auth { .. } => ErrorCategory::Auth,
            DispatchError::TokenBudgetExceeded { .. } => ErrorCategory::TokenBudget,
            DispatchError::ContentModeration { .. } => ErrorCategory::ContentModeration,
            DispatchError::Cancelled => ErrorCategory::Cancelled,
            DispatchError::BadRequest { .. }
            | DispatchError::Provider { .. }
            | DispatchError::EmptyResponse { .. }
            | DispatchError::Response(_)
            | DispatchError::Internal(_) => ErrorCategory::Provider,
        }
    }

    /// Whether re-sending the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
            || matches!(
                self,
                DispatchError::EmptyResponse { .. } | DispatchError::Response(_)
            )
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout(err.to_string())
        } else if err.is_connect() {
            DispatchError::Request(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            DispatchError::Response(format!("Failed to decode response: {}", err))
        } else {
            DispatchError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Response(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            DispatchError::FeatureNotConfigured(Feature::ScriptAnalysis).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            DispatchError::Provider {
                provider: "p".into(),
                status: 503,
                body: String::new()
            }
            .category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            DispatchError::Provider {
                provider: "p".into(),
                status: 404,
                body: String::new()
            }
            .category(),
            ErrorCategory::Provider
        );
        assert_eq!(
            DispatchError::ContentModeration {
                provider: "p".into(),
                model: "m".into(),
                finish_reason: "sensitive".into()
            }
            .category(),
            ErrorCategory::ContentModeration
        );
    }

    #[test]
    fn test_retryable() {
        assert!(DispatchError::Timeout("slow".into()).is_retryable());
        assert!(DispatchError::Response("garbled".into()).is_retryable());
        assert!(!DispatchError::Provider {
            provider: "p".into(),
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!DispatchError::BadRequest {
            provider: "p".into(),
            body: "bad".into()
        }
        .is_retryable());
        assert!(!DispatchError::TokenBudgetExceeded {
            model: "m".into(),
            input_tokens: 10,
            budget: 5
        }
        .is_retryable());
        assert!(!DispatchError::KeysExhausted("p".into()).is_retryable());
    }

    #[test]
    fn test_feature_not_configured_message() {
        let msg = DispatchError::FeatureNotConfigured(Feature::ScriptAnalysis).to_string();
        assert!(msg.contains("script_analysis"));
    }
}
