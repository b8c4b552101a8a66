//! Binding Routes
//!
//! Handles parsing of `platform:model` feature binding identifiers.

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};

/// Parsed feature binding target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BindingRoute {
    /// Platform or provider id (e.g., "deepseek", "zhipu")
    pub platform: String,

    /// Model name (e.g., "deepseek-v3.2", "qwen2:7b")
    pub model: String,
}

impl BindingRoute {
    pub fn new(platform: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            model: model.into(),
        }
    }

    /// Parse a binding in the format "platform:model".
    ///
    /// Only the first colon separates, so model tags such as `qwen2:7b` survive.
    pub fn parse(binding: &str) -> Result<Self> {
        match binding.trim().split_once(':') {
            Some((platform, model)) if !platform.trim().is_empty() && !model.trim().is_empty() => {
                Ok(Self::new(platform.trim(), model.trim()))
            }
            _ => Err(DispatchError::Config(format!(
                "Invalid binding '{}'. Expected 'platform:model'",
                binding
            ))),
        }
    }
}

impl TryFrom<String> for BindingRoute {
    type Error = DispatchError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<BindingRoute> for String {
    fn from(route: BindingRoute) -> Self {
        route.to_string()
    }
}

impl std::fmt::Display for BindingRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let route = BindingRoute::parse("deepseek:deepseek-v3.2").unwrap();
        assert_eq!(route.platform, "deepseek");
        assert_eq!(route.model, "deepseek-v3.2");
    }

    #[test]
    fn test_parse_keeps_model_tag() {
        let route = BindingRoute::parse("ollama:qwen2:7b").unwrap();
        assert_eq!(route.platform, "ollama");
        assert_eq!(route.model, "qwen2:7b");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(BindingRoute::parse("just-a-model").is_err());
        assert!(BindingRoute::parse(":model").is_err());
        assert!(BindingRoute::parse("platform:").is_err());
    }

    #[test]
    fn test_display() {
        let route = BindingRoute::parse("zhipu:glm-4.6").unwrap();
        assert_eq!(format!("{}", route), "zhipu:glm-4.6");
    }

    #[test]
    fn test_serde_as_string() {
        let route: BindingRoute = serde_json::from_str("\"openai:gpt-4o\"").unwrap();
        assert_eq!(route, BindingRoute::new("openai", "gpt-4o"));
        assert_eq!(serde_json::to_string(&route).unwrap(), "\"openai:gpt-4o\"");
    }
}
