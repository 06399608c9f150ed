//! Google consent-mode v2 signalling.
//!
//! Maps [`ConsentCategories`] onto the consent-mode vocabulary. A `default`
//! command (everything denied except security) goes out once before any
//! decision is known; every later change goes out as an `update`.

use consentry_core::{ConsentCategories, ConsentModeConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Consent-mode storage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentModeSignal {
    AdStorage,
    AdUserData,
    AdPersonalization,
    AnalyticsStorage,
    FunctionalityStorage,
    PersonalizationStorage,
    SecurityStorage,
}

impl ConsentModeSignal {
    pub const ALL: [ConsentModeSignal; 7] = [
        Self::AdStorage,
        Self::AdUserData,
        Self::AdPersonalization,
        Self::AnalyticsStorage,
        Self::FunctionalityStorage,
        Self::PersonalizationStorage,
        Self::SecurityStorage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdStorage => "ad_storage",
            Self::AdUserData => "ad_user_data",
            Self::AdPersonalization => "ad_personalization",
            Self::AnalyticsStorage => "analytics_storage",
            Self::FunctionalityStorage => "functionality_storage",
            Self::PersonalizationStorage => "personalization_storage",
            Self::SecurityStorage => "security_storage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalValue {
    Granted,
    Denied,
}

impl SignalValue {
    pub fn from_granted(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

pub type SignalMap = BTreeMap<ConsentModeSignal, SignalValue>;

/// Map categories onto every consent-mode signal
pub fn signals_for(categories: &ConsentCategories) -> SignalMap {
    use ConsentModeSignal::*;

    let marketing = SignalValue::from_granted(categories.marketing);
    let preferences = SignalValue::from_granted(categories.preferences);
    BTreeMap::from([
        (AdStorage, marketing),
        (AdUserData, marketing),
        (AdPersonalization, marketing),
        (AnalyticsStorage, SignalValue::from_granted(categories.analytics)),
        (FunctionalityStorage, preferences),
        (PersonalizationStorage, preferences),
        (SecurityStorage, SignalValue::Granted),
    ])
}

/// A command for the tag runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ConsentModeCommand {
    Default {
        signals: SignalMap,
        wait_for_update_ms: Option<u64>,
        ads_data_redaction: bool,
        url_passthrough: bool,
    },
    Update {
        signals: SignalMap,
    },
}

impl ConsentModeCommand {
    pub fn signals(&self) -> &SignalMap {
        match self {
            Self::Default { signals, .. } | Self::Update { signals } => signals,
        }
    }

    /// The equivalent `gtag(...)` argument lists, in call order
    pub fn gtag_calls(&self) -> Vec<Value> {
        let mut params: Map<String, Value> = self
            .signals()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), Value::from(v.as_str())))
            .collect();

        match self {
            Self::Default {
                wait_for_update_ms,
                ads_data_redaction,
                url_passthrough,
                ..
            } => {
                if let Some(ms) = wait_for_update_ms {
                    params.insert("wait_for_update".to_string(), Value::from(*ms));
                }
                vec![
                    json!(["consent", "default", params]),
                    json!(["set", "ads_data_redaction", ads_data_redaction]),
                    json!(["set", "url_passthrough", url_passthrough]),
                ]
            }
            Self::Update { .. } => vec![json!(["consent", "update", params])],
        }
    }
}

/// Receives consent-mode commands
pub trait SignalSink: Send + Sync {
    fn send(&self, command: &ConsentModeCommand) -> anyhow::Result<()>;
}

/// Sink that appends `gtag` argument lists, like a page's `dataLayer`
#[derive(Debug, Default)]
pub struct DataLayer {
    entries: Mutex<Vec<Value>>,
}

impl DataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Value> {
        self.entries.lock().clone()
    }
}

impl SignalSink for DataLayer {
    fn send(&self, command: &ConsentModeCommand) -> anyhow::Result<()> {
        self.entries.lock().extend(command.gtag_calls());
        Ok(())
    }
}

/// Translates consent changes into consent-mode commands
pub struct ConsentModeAdapter {
    sink: Arc<dyn SignalSink>,
    config: ConsentModeConfig,
    default_sent: AtomicBool,
}

impl ConsentModeAdapter {
    pub fn new(sink: Arc<dyn SignalSink>, config: ConsentModeConfig) -> Self {
        Self {
            sink,
            config,
            default_sent: AtomicBool::new(false),
        }
    }

    /// Send the most restrictive `default`. Only the first call sends.
    pub fn emit_default(&self) -> bool {
        if !self.config.enabled || self.default_sent.swap(true, Ordering::SeqCst) {
            return false;
        }
        let command = ConsentModeCommand::Default {
            signals: signals_for(&ConsentCategories::denied()),
            wait_for_update_ms: self.config.wait_for_update_ms,
            ads_data_redaction: self.config.ads_data_redaction,
            url_passthrough: self.config.url_passthrough,
        };
        self.dispatch(&command)
    }

    /// Send an `update` for the given state
    pub fn update_consent(&self, categories: &ConsentCategories) -> bool {
        if !self.config.enabled {
            return false;
        }
        let command = ConsentModeCommand::Update {
            signals: signals_for(categories),
        };
        self.dispatch(&command)
    }

    fn dispatch(&self, command: &ConsentModeCommand) -> bool {
        match self.sink.send(command) {
            Ok(()) => {
                debug!("Sent consent-mode {:?}", command.signals());
                true
            }
            Err(e) => {
                warn!("Consent-mode sink rejected command: {:#}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(config: ConsentModeConfig) -> (Arc<DataLayer>, ConsentModeAdapter) {
        let layer = Arc::new(DataLayer::new());
        let adapter = ConsentModeAdapter::new(layer.clone(), config);
        (layer, adapter)
    }

    #[test]
    fn test_mapping() {
        let signals = signals_for(&ConsentCategories::new(true, false, true));
        assert_eq!(signals[&ConsentModeSignal::AnalyticsStorage], SignalValue::Granted);
        assert_eq!(signals[&ConsentModeSignal::AdStorage], SignalValue::Denied);
        assert_eq!(signals[&ConsentModeSignal::AdUserData], SignalValue::Denied);
        assert_eq!(signals[&ConsentModeSignal::AdPersonalization], SignalValue::Denied);
        assert_eq!(signals[&ConsentModeSignal::FunctionalityStorage], SignalValue::Granted);
        assert_eq!(signals[&ConsentModeSignal::PersonalizationStorage], SignalValue::Granted);
        assert_eq!(signals[&ConsentModeSignal::SecurityStorage], SignalValue::Granted);
        assert_eq!(signals.len(), ConsentModeSignal::ALL.len());
    }

    #[test]
    fn test_default_is_sent_once_and_most_restrictive() {
        let (layer, adapter) = adapter(ConsentModeConfig::default());
        assert!(adapter.emit_default());
        assert!(!adapter.emit_default());

        let entries = layer.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0][0], "consent");
        assert_eq!(entries[0][1], "default");
        assert_eq!(entries[0][2]["ad_storage"], "denied");
        assert_eq!(entries[0][2]["analytics_storage"], "denied");
        assert_eq!(entries[0][2]["security_storage"], "granted");
        assert_eq!(entries[0][2]["wait_for_update"], 500);
        assert_eq!(entries[1], json!(["set", "ads_data_redaction", true]));
        assert_eq!(entries[2], json!(["set", "url_passthrough", false]));
    }

    #[test]
    fn test_update() {
        let (layer, adapter) = adapter(ConsentModeConfig::default());
        adapter.update_consent(&ConsentCategories::granted());
        let entries = layer.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0][1], "update");
        assert_eq!(entries[0][2]["ad_personalization"], "granted");
        assert!(entries[0][2].get("wait_for_update").is_none());
    }

    #[test]
    fn test_disabled_adapter_is_silent() {
        let config = ConsentModeConfig {
            enabled: false,
            ..ConsentModeConfig::default()
        };
        let (layer, adapter) = adapter(config);
        assert!(!adapter.emit_default());
        assert!(!adapter.update_consent(&ConsentCategories::granted()));
        assert!(layer.entries().is_empty());
    }

    #[test]
    fn test_sink_failure_is_contained() {
        struct Broken;
        impl SignalSink for Broken {
            fn send(&self, _: &ConsentModeCommand) -> anyhow::Result<()> {
                anyhow::bail!("tag runtime missing")
            }
        }
        let adapter = ConsentModeAdapter::new(Arc::new(Broken), ConsentModeConfig::default());
        assert!(!adapter.emit_default());
    }
}
