//! Rate Limit Signals
//!
//! Recognizes rate-limit responses and reads how long the provider wants us to wait.

use reqwest::header::HeaderMap;
use std::time::Duration;

/// Headers that carry a wait hint, most authoritative first
const WAIT_HEADERS: &[&str] = &[
    "retry-after",
    "x-ratelimit-reset-requests",
    "x-ratelimit-reset-tokens",
];

/// Wait duration requested by the provider, if any
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    WAIT_HEADERS.iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?.trim();
        value
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
            .or_else(|| parse_duration_string(value))
    })
}

/// Detect if a response indicates a rate limit error
pub fn is_rate_limit_error(status: u16, body: &str) -> bool {
    // HTTP 429 Too Many Requests
    if status == 429 {
        return true;
    }

    // Some providers return 400 or 403 with rate limit messages
    if !matches!(status, 400 | 403) {
        return false;
    }
    let lower_body = body.to_lowercase();
    lower_body.contains("rate limit")
        || lower_body.contains("rate_limit")
        || lower_body.contains("too many requests")
        || lower_body.contains("quota exceeded")
        || lower_body.contains("请求过于频繁")
}

/// Parse a duration string like "1m30s" or "2h" into a Duration
fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();

    // Handle milliseconds first
    if let Some(stripped) = s.strip_suffix("ms") {
        return stripped.parse::<u64>().ok().map(Duration::from_millis);
    }

    // Try complex format first (e.g., "1m30s", "2h30m")
    if s.contains('h') || (s.contains('m') && s.contains('s')) {
        let mut total_secs = 0f64;
        let mut current_num = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() || c == '.' {
                current_num.push(c);
            } else if !current_num.is_empty() {
                if let Ok(n) = current_num.parse::<f64>() {
                    match c {
                        'h' => total_secs += n * 3600.0,
                        'm' => total_secs += n * 60.0,
                        's' => total_secs += n,
                        _ => {}
                    }
                }
                current_num.clear();
            }
        }

        if total_secs > 0.0 {
            return Some(Duration::from_secs_f64(total_secs));
        }
    }

    // Simple cases - single unit
    if let Some(stripped) = s.strip_suffix('s') {
        return stripped.parse::<f64>().ok().map(Duration::from_secs_f64);
    }
    if let Some(stripped) = s.strip_suffix('m') {
        return stripped
            .parse::<u64>()
            .ok()
            .map(|mins| Duration::from_secs(mins * 60));
    }
    if let Some(stripped) = s.strip_suffix('h') {
        return stripped
            .parse::<u64>()
            .ok()
            .map(|hours| Duration::from_secs(hours * 3600));
    }

    None
}
