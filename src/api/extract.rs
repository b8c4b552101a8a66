//! Response Extraction
//!
//! Vendors disagree on where generated text lives. Known shapes are parsed
//! into typed variants; anything else is scanned for well-known field names.

use crate::api::completion::{CompletionResponse, MessageContent};
use crate::error::{DispatchError, Result};
use serde::Deserialize;
use serde_json::Value;

/// Pointers probed, in order, for generated text in unknown shapes
const CONTENT_POINTERS: &[&str] = &[
    "/choices/0/message/content",
    "/choices/0/text",
    "/output_text",
    "/output/text",
    "/output/choices/0/message/content",
    "/candidates/0/content/parts/0/text",
    "/message/content",
    "/data/content",
    "/content",
    "/text",
    "/result",
    "/response",
];

const FINISH_POINTERS: &[&str] = &[
    "/choices/0/finish_reason",
    "/output/finish_reason",
    "/candidates/0/finishReason",
    "/finish_reason",
    "/stop_reason",
    "/done_reason",
];

/// A response body in one of the shapes we know about
#[derive(Debug, Clone)]
pub enum ProviderResponse {
    /// OpenAI-compatible `choices[]`
    ChatCompletions(CompletionResponse),
    /// Anthropic-style `content: [{type, text}]`
    ContentBlocks(ContentBlocksResponse),
    /// Anything else, scanned by field name
    Generic(Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlocksResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<BlockUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockUsage {
    #[serde(default)]
    pub output_tokens: u32,
}

/// Vendor-neutral view of one generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub reasoning: Option<String>,
    /// Lowercased; vendor synonyms mapped onto `length` / `content_filter`
    pub finish_reason: Option<String>,
    pub completion_tokens: u32,
    pub reasoning_tokens: u32,
}

impl Completion {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }

    pub fn has_reasoning(&self) -> bool {
        self.reasoning
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }

    pub fn finished_by(&self, reason: &str) -> bool {
        self.finish_reason.as_deref() == Some(reason)
    }
}

impl ProviderResponse {
    pub fn parse(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body).map_err(|e| {
            DispatchError::Response(format!(
                "Failed to parse response: {}. Body: {}",
                e,
                truncate_body(body)
            ))
        })?;

        let non_empty_array =
            |key: &str| value.get(key).and_then(Value::as_array).is_some_and(|a| !a.is_empty());

        if non_empty_array("choices") {
            if let Ok(response) = serde_json::from_value::<CompletionResponse>(value.clone()) {
                return Ok(ProviderResponse::ChatCompletions(response));
            }
        }
        if non_empty_array("content") {
            if let Ok(response) = serde_json::from_value::<ContentBlocksResponse>(value.clone()) {
                return Ok(ProviderResponse::ContentBlocks(response));
            }
        }
        Ok(ProviderResponse::Generic(value))
    }

    pub fn into_completion(self) -> Completion {
        match self {
            ProviderResponse::ChatCompletions(response) => {
                let usage = response.usage.unwrap_or_default();
                let choice = response.choices.into_iter().next();
                let (content, reasoning, finish_reason) = match choice {
                    Some(choice) => (
                        choice
                            .message
                            .content
                            .as_ref()
                            .map(MessageContent::to_string_content)
                            .unwrap_or_default(),
                        choice.message.reasoning_text().map(str::to_string),
                        choice.finish_reason,
                    ),
                    None => (String::new(), None, None),
                };
                Completion {
                    content,
                    reasoning,
                    finish_reason: finish_reason.map(|r| normalize_finish_reason(&r)),
                    completion_tokens: usage.completion_tokens,
                    reasoning_tokens: usage.reasoning_tokens(),
                }
            }
            ProviderResponse::ContentBlocks(response) => {
                let mut content = String::new();
                let mut reasoning = String::new();
                for block in &response.content {
                    match block.kind.as_str() {
                        "text" => content.push_str(block.text.as_deref().unwrap_or_default()),
                        "thinking" => {
                            reasoning.push_str(block.thinking.as_deref().unwrap_or_default())
                        }
                        _ => {}
                    }
                }
                Completion {
                    content,
                    reasoning: (!reasoning.is_empty()).then_some(reasoning),
                    finish_reason: response.stop_reason.map(|r| normalize_finish_reason(&r)),
                    completion_tokens: response.usage.map(|u| u.output_tokens).unwrap_or(0),
                    reasoning_tokens: 0,
                }
            }
            ProviderResponse::Generic(value) => {
                let content = CONTENT_POINTERS
                    .iter()
                    .filter_map(|p| value.pointer(p))
                    .find_map(text_of)
                    .unwrap_or_default();
                let finish_reason = FINISH_POINTERS
                    .iter()
                    .filter_map(|p| value.pointer(p))
                    .find_map(Value::as_str)
                    .map(normalize_finish_reason);
                let completion_tokens = value
                    .pointer("/usage/completion_tokens")
                    .or_else(|| value.pointer("/usage/output_tokens"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                Completion {
                    content,
                    reasoning: None,
                    finish_reason,
                    completion_tokens,
                    reasoning_tokens: 0,
                }
            }
        }
    }
}

/// Text of a string or an array of `{text}` parts
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(parts) => {
            let joined: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

fn normalize_finish_reason(reason: &str) -> String {
    let reason = reason.to_ascii_lowercase();
    match reason.as_str() {
        "max_tokens" | "max_output_tokens" => "length".to_string(),
        "refusal" | "safety" => "content_filter".to_string(),
        _ => reason,
    }
}

pub(crate) fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(500) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
