//! HTTP Client
//!
//! Thin async transport. Non-success statuses come back as data so the
//! dispatcher can decide between rotation, discovery and retry.

use crate::client::rate_limit;
use crate::error::{DispatchError, Result};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static VERSION_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/v\d+[a-z0-9]*(?:/|$)").expect("valid regex"));

/// Chat completions endpoint for a provider base URL.
///
/// `/v1` is only appended when the base URL carries no version segment.
pub fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        return base.to_string();
    }
    let path = base
        .split_once("://")
        .map(|(_, rest)| rest.split_once('/').map(|(_, p)| p).unwrap_or(""))
        .unwrap_or(base);
    if VERSION_SEGMENT.is_match(&format!("/{}", path)) {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

/// Raw outcome of one HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: String,
    /// Wait hint from Retry-After style headers
    pub retry_after: Option<Duration>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Shared HTTP client
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// Inner reqwest client
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| DispatchError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// POST a JSON body with bearer auth.
    ///
    /// Transport failures are errors; any HTTP status is an `HttpReply`.
    pub async fn post_json<T>(
        &self,
        url: &str,
        body: &T,
        api_key: &str,
        extra_headers: Option<&HeaderMap>,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpReply>
    where
        T: Serialize,
    {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| DispatchError::Config(format!("Invalid API key format: {}", e)))?,
        );

        // Add extra headers
        if let Some(extra) = extra_headers {
            for (key, value) in extra {
                headers.insert(key.clone(), value.clone());
            }
        }

        let mut request = self.client.post(url).headers(headers).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let retry_after = rate_limit::retry_after(response.headers());
            let body = response.text().await?;
            Ok::<_, DispatchError>(HttpReply {
                status,
                body,
                retry_after,
            })
        };

        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(DispatchError::Cancelled),
                reply = exchange => reply,
            },
            None => exchange.await,
        }
    }
}

/// Build a header map from configured string pairs, skipping invalid entries
pub fn header_map(pairs: &std::collections::HashMap<String, String>) -> Option<HeaderMap> {
    if pairs.is_empty() {
        return None;
    }
    let mut headers = HeaderMap::new();
    for (key, value) in pairs {
        if let (Ok(name), Ok(val)) = (
            reqwest::header::HeaderName::try_from(key.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, val);
        }
    }
    Some(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(HttpClient::new(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_chat_completions_url() {
        assert_eq!(
            chat_completions_url("https://api.deepseek.com"),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://open.bigmodel.cn/api/paas/v4"),
            "https://open.bigmodel.cn/api/paas/v4/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://generativelanguage.googleapis.com/v1beta/openai"),
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
        );
        assert_eq!(
            chat_completions_url("http://127.0.0.1:8080/custom/chat/completions"),
            "http://127.0.0.1:8080/custom/chat/completions"
        );
        assert_eq!(
            chat_completions_url("http://127.0.0.1:8080"),
            "http://127.0.0.1:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_header_map_skips_invalid() {
        let pairs: std::collections::HashMap<String, String> = [
            ("x-app".to_string(), "demo".to_string()),
            ("bad header".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect();
        let headers = header_map(&pairs).unwrap();
        assert_eq!(headers.len(), 1);
        assert!(header_map(&Default::default()).is_none());
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(429)
            .with_header("retry-after", "7")
            .with_body("slow down")
            .create_async()
            .await;

        let client = HttpClient::new(Duration::from_secs(5)).unwrap();
        let reply = client
            .post_json(
                &chat_completions_url(&server.url()),
                &serde_json::json!({"model": "m"}),
                "sk-test",
                None,
                None,
                None,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(reply.body, "slow down");
        assert_eq!(reply.retry_after, Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let client = HttpClient::new(Duration::from_secs(5)).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = client
            .post_json(
                "http://127.0.0.1:9/v1/chat/completions",
                &serde_json::json!({}),
                "sk-test",
                None,
                None,
                Some(&token),
            )
            .await;
        assert!(matches!(result, Err(DispatchError::Cancelled)));
    }
}
