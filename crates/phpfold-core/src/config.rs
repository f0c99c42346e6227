use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::TransformError;

/// Per-pass toggles plus pipeline limits. Every field has a default so a
/// partial config file stays valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerOptions {
    /// Maximum fixed-point rounds before giving up (default: 10)
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    #[serde(default = "default_true")]
    pub strip_comments: bool,

    #[serde(default = "default_true")]
    pub propagate_constants: bool,

    #[serde(default = "default_true")]
    pub fold_constants: bool,

    /// Evaluate whitelisted pure calls on literal arguments at compile time
    #[serde(default = "default_true")]
    pub pre_execute: bool,

    #[serde(default = "default_true")]
    pub rewrite_isset: bool,

    #[serde(default = "default_true")]
    pub inline_single_use: bool,

    #[serde(default = "default_true")]
    pub inline_functions: bool,

    #[serde(default = "default_true")]
    pub inline_classes: bool,

    #[serde(default = "default_true")]
    pub fold_strings: bool,

    #[serde(default = "default_true")]
    pub strip_dead_code: bool,

    /// Final-stage hoisting of nested ternary/coalesce expressions
    #[serde(default = "default_true")]
    pub extract_nested_ternaries: bool,

    /// Final-stage blank-line grouping by effect kind
    #[serde(default = "default_true")]
    pub group_statements: bool,

    #[serde(default)]
    pub sandbox: SandboxOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxOptions {
    /// Bounded LRU cache for sandbox results (default: 1000 entries)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Wall-clock cap for one evaluation, in milliseconds (default: 100)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_rounds() -> usize {
    10
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_timeout_ms() -> u64 {
    100
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            strip_comments: true,
            propagate_constants: true,
            fold_constants: true,
            pre_execute: true,
            rewrite_isset: true,
            inline_single_use: true,
            inline_functions: true,
            inline_classes: true,
            fold_strings: true,
            strip_dead_code: true,
            extract_nested_ternaries: true,
            group_statements: true,
            sandbox: SandboxOptions::default(),
        }
    }
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Top-level configuration, loadable from `phpfold.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerConfig {
    #[serde(default)]
    pub optimizer_options: OptimizerOptions,
}

impl OptimizerConfig {
    pub fn from_file(path: &Path) -> Result<Self, TransformError> {
        let content = std::fs::read_to_string(path)?;
        let config: OptimizerConfig = serde_json::from_str(&content)
            .map_err(|e| TransformError::Config(e.to_string()))?;
        if config.optimizer_options.max_rounds == 0 {
            return Err(TransformError::Config(
                "maxRounds must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    /// Write a default configuration file.
    pub fn init_file(path: &Path) -> Result<(), TransformError> {
        let config = OptimizerConfig::default();
        let json = serde_json::to_string_pretty(&config)
            .map_err(|e| TransformError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OptimizerConfig::default();
        assert_eq!(config.optimizer_options.max_rounds, 10);
        assert!(config.optimizer_options.fold_constants);
        assert_eq!(config.optimizer_options.sandbox.cache_capacity, 1000);
    }

    #[test]
    fn test_partial_config_deserializes() {
        let json = r#"{
            "optimizerOptions": {
                "maxRounds": 3,
                "stripComments": false
            }
        }"#;
        let config: OptimizerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.optimizer_options.max_rounds, 3);
        assert!(!config.optimizer_options.strip_comments);
        // Untouched fields keep their defaults.
        assert!(config.optimizer_options.inline_functions);
    }

    #[test]
    fn test_serialize_uses_camel_case() {
        let json = serde_json::to_string(&OptimizerConfig::default()).unwrap();
        assert!(json.contains("optimizerOptions"));
        assert!(json.contains("maxRounds"));
        assert!(json.contains("cacheCapacity"));
    }
}
