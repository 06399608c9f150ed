//! Configuration for the consent toolkit.

use crate::{ConsentError, PatternRule, PatternSource, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Default consent cookie lifetime (1 year)
const DEFAULT_MAX_AGE_DAYS: u32 = 365;

/// Default bound of the storage operation queue
const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

/// Default remote collector timeout
const DEFAULT_COLLECTOR_TIMEOUT_MS: u64 = 5_000;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsentConfig {
    pub cookie: CookieConfig,
    pub storage: StorageConfig,
    pub scripts: ScriptConfig,
    pub consent_mode: ConsentModeConfig,
    pub collector: CollectorConfig,
    /// Language reported with each consent decision
    pub language: String,
}

/// Cookie attributes for persisted state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieConfig {
    pub max_age_days: u32,
    /// Explicit `Domain` attribute (host-only when absent)
    pub domain: Option<String>,
}

/// Storage interception settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub enabled: bool,
    /// Queue blocked operations for replay instead of dropping them
    pub queue_enabled: bool,
    pub max_queue_size: usize,
    /// Keys that bypass classification (the SDK prefix is always included)
    pub allow_patterns: Vec<PatternSource>,
    /// Rules appended after the built-in storage table
    pub patterns: Vec<PatternRule>,
}

/// Script interception settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptConfig {
    pub enabled: bool,
    /// Rules appended after the built-in script table
    pub patterns: Vec<PatternRule>,
}

/// Google consent-mode signalling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsentModeConfig {
    pub enabled: bool,
    pub wait_for_update_ms: Option<u64>,
    pub ads_data_redaction: bool,
    pub url_passthrough: bool,
}

/// Remote collector settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorConfig {
    pub timeout_ms: u64,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            cookie: CookieConfig::default(),
            storage: StorageConfig::default(),
            scripts: ScriptConfig::default(),
            consent_mode: ConsentModeConfig::default(),
            collector: CollectorConfig::default(),
            language: "en".to_string(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            domain: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_enabled: true,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            allow_patterns: Vec::new(),
            patterns: Vec::new(),
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: Vec::new(),
        }
    }
}

impl Default for ConsentModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wait_for_update_ms: Some(500),
            ads_data_redaction: true,
            url_passthrough: false,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_COLLECTOR_TIMEOUT_MS,
        }
    }
}

impl ConsentConfig {
    /// Parse JSON configuration
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| ConsentError::Config(format!("Invalid configuration: {}", e)))?;
        Ok(config.normalized())
    }

    /// Parse JSON configuration, falling back to defaults when it is malformed
    pub fn from_json_or_default(raw: &str) -> Self {
        match Self::from_json(raw) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}; using default configuration", e);
                Self::default()
            }
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Replace zero limits with their defaults
    pub fn normalized(mut self) -> Self {
        if self.storage.max_queue_size == 0 {
            warn!("storage.maxQueueSize must be at least 1, using {}", DEFAULT_MAX_QUEUE_SIZE);
            self.storage.max_queue_size = DEFAULT_MAX_QUEUE_SIZE;
        }
        if self.cookie.max_age_days == 0 {
            warn!("cookie.maxAgeDays must be at least 1, using {}", DEFAULT_MAX_AGE_DAYS);
            self.cookie.max_age_days = DEFAULT_MAX_AGE_DAYS;
        }
        if self.collector.timeout_ms == 0 {
            self.collector.timeout_ms = DEFAULT_COLLECTOR_TIMEOUT_MS;
        }
        if self
            .cookie
            .domain
            .as_deref()
            .is_some_and(|d| d.trim().is_empty())
        {
            self.cookie.domain = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConsentCategory;

    #[test]
    fn test_default_config() {
        let config = ConsentConfig::default();
        assert!(config.storage.enabled);
        assert!(config.storage.queue_enabled);
        assert_eq!(config.storage.max_queue_size, 100);
        assert_eq!(config.cookie.max_age_days, 365);
        assert_eq!(config.collector.timeout_ms, 5_000);
        assert_eq!(config.language, "en");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ConsentConfig::from_json(
            r#"{
                "cookie": {"domain": ".example.com"},
                "storage": {
                    "maxQueueSize": 10,
                    "allowPatterns": [{"literal": "app_"}],
                    "patterns": [{"pattern": {"literal": "wp_"}, "category": "preferences"}]
                },
                "language": "de"
            }"#,
        )
        .unwrap();
        assert_eq!(config.cookie.domain.as_deref(), Some(".example.com"));
        assert_eq!(config.cookie.max_age_days, 365);
        assert_eq!(config.storage.max_queue_size, 10);
        assert!(config.storage.queue_enabled);
        assert_eq!(config.storage.patterns[0].category, ConsentCategory::Preferences);
        assert_eq!(config.language, "de");
    }

    #[test]
    fn test_malformed_json_falls_back() {
        let config = ConsentConfig::from_json_or_default(r#"{"storage": {"maxQueueSize": "lots"}}"#);
        assert_eq!(config, ConsentConfig::default());
    }

    #[test]
    fn test_normalization() {
        let config = ConsentConfig::from_json(
            r#"{"storage": {"maxQueueSize": 0}, "cookie": {"maxAgeDays": 0, "domain": " "}, "collector": {"timeoutMs": 0}}"#,
        )
        .unwrap();
        assert_eq!(config.storage.max_queue_size, 100);
        assert_eq!(config.cookie.max_age_days, 365);
        assert_eq!(config.collector.timeout_ms, 5_000);
        assert!(config.cookie.domain.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("consentry-missing").join("config.json");
        let result = ConsentConfig::load(&path);
        assert!(matches!(result, Err(ConsentError::Io(_))));
    }
}
