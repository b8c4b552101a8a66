//! Chat Completion API
//!
//! Wire types of the OpenAI-compatible chat completions endpoint.

use serde::{Deserialize, Serialize};

/// A message in a chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user" or "assistant"
    pub role: String,

    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Reasoning switch understood by thinking-capable vendors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thinking {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Thinking {
    pub fn disabled() -> Self {
        Self {
            kind: "disabled".to_string(),
        }
    }
}

/// Chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,

    pub messages: Vec<Message>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Thinking>,
}

impl CompletionRequest {
    /// System + user prompt request; an empty system prompt is omitted
    pub fn new(model: impl Into<String>, system_prompt: &str, user_prompt: &str) -> Self {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(Message::system(system_prompt));
        }
        messages.push(Message::user(user_prompt));

        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: 0,
            thinking: None,
        }
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Ask the vendor to skip its reasoning phase
    pub fn with_thinking_disabled(mut self, disabled: bool) -> Self {
        self.thinking = disabled.then(Thinking::disabled);
        self
    }
}

/// Message content - can be a simple string or array of parts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple string content
    Text(String),

    /// Array of content parts
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Convert to string (concatenating text parts if needed)
    pub fn to_string_content(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A content part; only text parts carry generated content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub text: Option<String>,
}

/// Chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: Option<String>,

    /// Model used
    #[serde(default)]
    pub model: Option<String>,

    /// Response choices
    pub choices: Vec<Choice>,

    /// Token usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A choice in the completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,

    pub message: ResponseMessage,

    /// Finish reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The generated message of a choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub content: Option<MessageContent>,

    /// Reasoning trace of thinking models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Same trace under the name some OpenAI-compatible servers use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ResponseMessage {
    /// Reasoning trace, preferring `reasoning_content` when both are sent
    pub fn reasoning_text(&self) -> Option<&str> {
        self.reasoning_content
            .as_deref()
            .filter(|r| !r.is_empty())
            .or(self.reasoning.as_deref())
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,

    #[serde(default)]
    pub completion_tokens: u32,

    #[serde(default)]
    pub total_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

/// Breakdown of completion tokens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: u32,
}

impl Usage {
    pub fn reasoning_tokens(&self) -> u32 {
        self.completion_tokens_details
            .as_ref()
            .map(|d| d.reasoning_tokens)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_serialization() {
        let request = CompletionRequest::new("deepseek-v3.2", "You are terse.", "Hello")
            .with_temperature(Some(0.7))
            .with_max_tokens(100)
            .with_thinking_disabled(true);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "deepseek-v3.2");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Hello");
        assert_eq!(json["max_tokens"], 100);
        assert_eq!(json["thinking"]["type"], "disabled");
    }

    #[test]
    fn test_empty_system_prompt_and_thinking_omitted() {
        let request = CompletionRequest::new("m", "", "Hi").with_max_tokens(10);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert!(json.get("thinking").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_completion_response_deserialization() {
        let json = r#"{
            "id": "chatcmpl-123",
            "model": "deepseek-reasoner",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "",
                    "reasoning_content": "Let me think"
                },
                "finish_reason": "length"
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 100,
                "total_tokens": 110,
                "completion_tokens_details": { "reasoning_tokens": 95 }
            }
        }"#;

        let response: CompletionResponse = serde_json::from_str(json).unwrap();
        let choice = &response.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("length"));
        assert_eq!(choice.message.reasoning_content.as_deref(), Some("Let me think"));
        assert_eq!(response.usage.unwrap().reasoning_tokens(), 95);
    }

    #[test]
    fn test_content_parts() {
        let content: MessageContent = serde_json::from_str(
            r#"[{"type":"text","text":"Hello "},{"type":"image_url"},{"type":"text","text":"World"}]"#,
        )
        .unwrap();
        assert_eq!(content.to_string_content(), "Hello World");
    }
}
