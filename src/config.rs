//! Engine configuration
//!
//! Plain serde-backed settings with sensible defaults. Deployment glue is
//! expected to deserialize this from whatever config source it uses.

use crate::provider::ProviderConfig;
use crate::resolver::DEFAULT_MAX_RULES;
use serde::{Deserialize, Serialize};

/// Rule-count limits per analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleLimits {
    /// Unlimited-capacity deployments skip truncation entirely.
    #[serde(default)]
    pub unlimited: bool,
    #[serde(default = "default_max_rules")]
    pub max_rules: usize,
}

fn default_max_rules() -> usize {
    DEFAULT_MAX_RULES
}

impl Default for RuleLimits {
    fn default() -> Self {
        Self {
            unlimited: false,
            max_rules: DEFAULT_MAX_RULES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub limits: RuleLimits,
    /// Fraction of the primary model's context window one PR chunk may use.
    #[serde(default = "default_chunk_usage")]
    pub chunk_usage_percentage: f64,
    /// Run the guardian validation pass over generated suggestions.
    #[serde(default)]
    pub guardian_enabled: bool,
    /// Base URL for rule settings links built by the reference linker.
    #[serde(default = "default_settings_base_url")]
    pub settings_base_url: String,
    #[serde(default = "ProviderConfig::default_primary")]
    pub primary: ProviderConfig,
    #[serde(default = "ProviderConfig::default_fallback")]
    pub fallback: ProviderConfig,
}

fn default_chunk_usage() -> f64 {
    0.5
}

fn default_settings_base_url() -> String {
    "https://app.kodus.io/settings/code-review".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: RuleLimits::default(),
            chunk_usage_percentage: default_chunk_usage(),
            guardian_enabled: false,
            settings_base_url: default_settings_base_url(),
            primary: ProviderConfig::default_primary(),
            fallback: ProviderConfig::default_fallback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(!config.limits.unlimited);
        assert_eq!(config.limits.max_rules, DEFAULT_MAX_RULES);
        assert!(config.chunk_usage_percentage > 0.0 && config.chunk_usage_percentage <= 1.0);
        assert!(config.settings_base_url.starts_with("https://"));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json = r#"{"limits": {"unlimited": true}, "guardian_enabled": true}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert!(config.limits.unlimited);
        assert_eq!(config.limits.max_rules, DEFAULT_MAX_RULES);
        assert!(config.guardian_enabled);
        assert!(!config.primary.model.is_empty());
    }
}
