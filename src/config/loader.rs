//! Configuration Loader
//!
//! Handles loading and merging dispatch configurations from multiple sources.

use crate::config::provider::DispatchConfig;
use crate::error::{DispatchError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    config: DispatchConfig,
}

impl ConfigLoader {
    /// Create a new config loader and load from default locations
    pub fn new() -> Result<Self> {
        // Keys are commonly kept in .env next to the binary
        let _ = dotenvy::dotenv();

        let mut loader = Self {
            config: DispatchConfig::default(),
        };

        // Load built-in defaults first
        loader.load_builtin_defaults()?;

        // Then load from file system (can override built-ins)
        loader.load_from_default_paths()?;

        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut loader = Self {
            config: DispatchConfig::default(),
        };

        loader.load_builtin_defaults()?;
        loader.load_from_file(path)?;

        Ok(loader)
    }

    /// Load built-in provider defaults
    fn load_builtin_defaults(&mut self) -> Result<()> {
        let defaults = include_str!("../../providers.json");
        self.merge_json(defaults, "built-in providers.json")
    }

    /// Load configuration from default paths
    fn load_from_default_paths(&mut self) -> Result<()> {
        for path in Self::get_config_paths() {
            if path.exists() {
                self.load_from_file(&path)?;
            }
        }

        Ok(())
    }

    /// Get list of config paths to check, lowest precedence first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".llm-dispatch").join("config.json"));
        }

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("llm-dispatch").join("config.json"));
        }

        // Current directory
        paths.push(PathBuf::from("llm-dispatch.json"));

        // Environment variable
        if let Ok(custom_path) = std::env::var("LLM_DISPATCH_CONFIG") {
            paths.push(PathBuf::from(custom_path));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), "Loading dispatch config");
        self.merge_json(&content, &path.display().to_string())
    }

    fn merge_json(&mut self, content: &str, source: &str) -> Result<()> {
        let raw: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| DispatchError::Config(format!("Failed to parse {}: {}", source, e)))?;
        let config: DispatchConfig = serde_json::from_value(raw.clone())
            .map_err(|e| DispatchError::Config(format!("Invalid config in {}: {}", source, e)))?;

        // Policy sections only override when the file actually names them
        let present = |section: &str| raw.get(section).is_some();
        let (retry, key_pool, batch) = (
            present("retry").then_some(config.retry.clone()),
            present("key_pool").then_some(config.key_pool.clone()),
            present("batch").then_some(config.batch.clone()),
        );

        self.merge_config(config);

        if let Some(retry) = retry {
            self.config.retry = retry;
        }
        if let Some(key_pool) = key_pool {
            self.config.key_pool = key_pool;
        }
        if let Some(batch) = batch {
            self.config.batch = batch;
        }
        Ok(())
    }

    /// Merge another config into this one (later configs override earlier, per entry)
    fn merge_config(&mut self, other: DispatchConfig) {
        self.config.providers.extend(other.providers);
        self.config.features.extend(other.features);
        self.config.default_platforms.extend(other.default_platforms);
        self.config.model_limits.extend(other.model_limits);
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> DispatchConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Feature;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_builtin_defaults() {
        let mut loader = ConfigLoader {
            config: DispatchConfig::default(),
        };
        loader.load_builtin_defaults().unwrap();
        assert!(loader.config().providers.contains_key("deepseek"));
        assert!(loader.config().features.is_empty());
    }

    #[test]
    fn test_load_from_custom_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "providers": {{
                    "custom_provider": {{
                        "base_url": "https://custom.api.com/v1",
                        "api_keys": ["sk-custom"],
                        "models": ["custom-model"]
                    }}
                }},
                "features": {{
                    "script_analysis": ["custom_provider:custom-model"]
                }},
                "batch": {{ "max_concurrency": 2 }}
            }}"#
        )
        .unwrap();

        let loader = ConfigLoader::from_path(file.path()).unwrap();
        let config = loader.config();
        assert!(config.providers.contains_key("custom_provider"));
        assert!(config.providers.contains_key("deepseek"));
        assert_eq!(config.features[&Feature::ScriptAnalysis].len(), 1);
        assert_eq!(config.batch.max_concurrency, 2);
        assert_eq!(config.batch.max_items_per_batch, 20);
    }

    #[test]
    fn test_absent_section_keeps_earlier_value() {
        let mut loader = ConfigLoader {
            config: DispatchConfig::default(),
        };
        loader
            .merge_json(r#"{ "retry": { "max_attempts": 7 } }"#, "first")
            .unwrap();
        loader
            .merge_json(r#"{ "providers": {} }"#, "second")
            .unwrap();
        assert_eq!(loader.config().retry.max_attempts, 7);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{ not json").unwrap();

        let err = ConfigLoader::from_path(file.path()).err().unwrap();
        assert!(matches!(err, DispatchError::Config(_)));
    }
}
