//! Limit Discovery
//!
//! Best-effort extraction of model limits from provider error text. Vendors
//! phrase these errors differently and change them without notice, so every
//! matcher is independent and a miss is simply `None`.

use crate::capability::PartialLimits;
use regex::Regex;
use std::sync::LazyLock;

type Matcher = fn(&str) -> Option<PartialLimits>;

/// Matchers in priority order; the first hit wins
const MATCHERS: &[Matcher] = &[
    match_range,
    match_upper_bound,
    match_max_tokens_limit,
    match_output_cap,
    match_context_length,
    match_maximum_tokens,
];

// "valid range of max_tokens is [1, 8192]"
static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:max_tokens|max_completion_tokens|max_new_tokens|range)[^\[\]\n]{0,80}\[\s*\d+\s*,\s*(\d+)\s*\]")
        .expect("valid regex")
});

// "max_tokens must be less than or equal to 8192", "max_tokens <= 8192", "max_tokens 不超过 8192"
static UPPER_BOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)max_(?:completion_|new_)?tokens[^\d\n]{0,60}?(?:<=|≤|less than or equal to|不超过|不能超过|不大于|小于等于)\s*(\d+)")
        .expect("valid regex")
});

// "max_tokens exceeds the limit of 4096", "max_tokens is too large, maximum is 8192"
static MAX_TOKENS_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)max_(?:completion_|new_)?tokens\b[^\d\n]{0,60}?(?:maximum|limit|at most|up to|exceed|cannot exceed|最大|上限)[^\d\n]{0,20}?(\d+)")
        .expect("valid regex")
});

// "This model supports at most 4096 completion tokens", "up to 8192 output tokens"
static OUTPUT_CAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:at most|up to|maximum of)\s*(\d+)\s*(completion|output)?\s*tokens")
        .expect("valid regex")
});

// "maximum context length is 65536 tokens", "context length of 32768"
static CONTEXT_LENGTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)context(?:\s+|_)(?:length|window)[^\d\n]{0,40}?(\d+)").expect("valid regex")
});

// "supports a maximum of 4096 tokens"
static MAXIMUM_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)maximum[^\d\n]{0,40}?(\d+)\s*tokens").expect("valid regex")
});

/// Try every matcher in order and return the first discovery.
pub fn parse_limits_from_error(text: &str) -> Option<PartialLimits> {
    if text.trim().is_empty() {
        return None;
    }
    MATCHERS.iter().find_map(|matcher| matcher(text))
}

fn capture_number(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)?
        .get(1)?
        .as_str()
        .parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
}

fn match_range(text: &str) -> Option<PartialLimits> {
    capture_number(&RANGE, text).map(PartialLimits::max_output)
}

fn match_upper_bound(text: &str) -> Option<PartialLimits> {
    capture_number(&UPPER_BOUND, text).map(PartialLimits::max_output)
}

fn match_max_tokens_limit(text: &str) -> Option<PartialLimits> {
    capture_number(&MAX_TOKENS_LIMIT, text).map(PartialLimits::max_output)
}

/// A bare "at most N tokens" counts only when the text is about output
fn match_output_cap(text: &str) -> Option<PartialLimits> {
    let caps = OUTPUT_CAP.captures(text)?;
    let n = caps.get(1)?.as_str().parse::<u32>().ok().filter(|n| *n > 0)?;
    let about_output = caps.get(2).is_some() || text.to_lowercase().contains("max_tokens");
    about_output.then(|| PartialLimits::max_output(n))
}

fn match_context_length(text: &str) -> Option<PartialLimits> {
    capture_number(&CONTEXT_LENGTH, text).map(PartialLimits::context_window)
}

fn match_maximum_tokens(text: &str) -> Option<PartialLimits> {
    let n = capture_number(&MAXIMUM_TOKENS, text)?;
    let lower = text.to_lowercase();
    if ["output", "completion", "generat", "max_tokens"]
        .iter()
        .any(|hint| lower.contains(hint))
    {
        Some(PartialLimits::max_output(n))
    } else {
        Some(PartialLimits::context_window(n))
    }
}
