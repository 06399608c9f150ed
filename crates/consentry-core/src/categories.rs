//! Consent categories - the unit of permission granularity.

use crate::ConsentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A consent category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentCategory {
    /// Strictly necessary, always granted
    Necessary,
    /// Usage measurement
    Analytics,
    /// Advertising and cross-site tracking
    Marketing,
    /// Remembered choices (language, theme, widgets)
    Preferences,
}

impl ConsentCategory {
    /// All categories in declaration order
    pub const ALL: [ConsentCategory; 4] = [
        ConsentCategory::Necessary,
        ConsentCategory::Analytics,
        ConsentCategory::Marketing,
        ConsentCategory::Preferences,
    ];

    /// The category required when nothing better is known
    pub const STRICTEST: ConsentCategory = ConsentCategory::Marketing;

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentCategory::Necessary => "necessary",
            ConsentCategory::Analytics => "analytics",
            ConsentCategory::Marketing => "marketing",
            ConsentCategory::Preferences => "preferences",
        }
    }
}

impl fmt::Display for ConsentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsentCategory {
    type Err = ConsentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "necessary" => Ok(ConsentCategory::Necessary),
            "analytics" => Ok(ConsentCategory::Analytics),
            "marketing" => Ok(ConsentCategory::Marketing),
            "preferences" => Ok(ConsentCategory::Preferences),
            other => Err(ConsentError::UnknownCategory(other.to_string())),
        }
    }
}

/// Granted state of every category.
///
/// `necessary` is always `true`: every constructor, merge and
/// deserialization path forces it. The type is `Copy` so consumers only
/// ever hold snapshots, never a view into shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawCategories")]
pub struct ConsentCategories {
    necessary: bool,
    pub analytics: bool,
    pub marketing: bool,
    pub preferences: bool,
}

/// Wire form; tolerates missing and null slots
#[derive(Deserialize)]
struct RawCategories {
    #[serde(default)]
    #[allow(dead_code)]
    necessary: Option<bool>,
    #[serde(default)]
    analytics: Option<bool>,
    #[serde(default)]
    marketing: Option<bool>,
    #[serde(default)]
    preferences: Option<bool>,
}

impl From<RawCategories> for ConsentCategories {
    fn from(raw: RawCategories) -> Self {
        Self::new(
            raw.analytics.unwrap_or(false),
            raw.marketing.unwrap_or(false),
            raw.preferences.unwrap_or(false),
        )
    }
}

impl Default for ConsentCategories {
    fn default() -> Self {
        Self::denied()
    }
}

impl ConsentCategories {
    pub fn new(analytics: bool, marketing: bool, preferences: bool) -> Self {
        Self {
            necessary: true,
            analytics,
            marketing,
            preferences,
        }
    }

    /// Only necessary granted
    pub fn denied() -> Self {
        Self::new(false, false, false)
    }

    /// Everything granted
    pub fn granted() -> Self {
        Self::new(true, true, true)
    }

    pub fn necessary(&self) -> bool {
        self.necessary
    }

    /// Whether a category is currently granted
    pub fn allows(&self, category: ConsentCategory) -> bool {
        match category {
            ConsentCategory::Necessary => true,
            ConsentCategory::Analytics => self.analytics,
            ConsentCategory::Marketing => self.marketing,
            ConsentCategory::Preferences => self.preferences,
        }
    }

    /// Return a copy with one slot changed. Setting `Necessary` is a no-op.
    pub fn with(mut self, category: ConsentCategory, granted: bool) -> Self {
        match category {
            ConsentCategory::Necessary => {}
            ConsentCategory::Analytics => self.analytics = granted,
            ConsentCategory::Marketing => self.marketing = granted,
            ConsentCategory::Preferences => self.preferences = granted,
        }
        self
    }

    /// Merge a partial update; omitted slots keep their value
    pub fn merge(&self, partial: &PartialConsent) -> Self {
        Self::new(
            partial.analytics.unwrap_or(self.analytics),
            partial.marketing.unwrap_or(self.marketing),
            partial.preferences.unwrap_or(self.preferences),
        )
    }

    /// Categories that went from denied to granted between `previous` and `self`
    pub fn newly_granted(&self, previous: &ConsentCategories) -> Vec<ConsentCategory> {
        ConsentCategory::ALL
            .into_iter()
            .filter(|c| self.allows(*c) && !previous.allows(*c))
            .collect()
    }

    /// Granted categories in declaration order
    pub fn granted_categories(&self) -> Vec<ConsentCategory> {
        ConsentCategory::ALL
            .into_iter()
            .filter(|c| self.allows(*c))
            .collect()
    }
}

/// A partial consent update as supplied by callers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialConsent {
    /// Accepted for wire compatibility, always ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub necessary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<bool>,
}

impl PartialConsent {
    /// Set every non-necessary slot to `granted`
    pub fn all(granted: bool) -> Self {
        Self {
            necessary: None,
            analytics: Some(granted),
            marketing: Some(granted),
            preferences: Some(granted),
        }
    }

    pub fn set(mut self, category: ConsentCategory, granted: bool) -> Self {
        match category {
            ConsentCategory::Necessary => self.necessary = Some(granted),
            ConsentCategory::Analytics => self.analytics = Some(granted),
            ConsentCategory::Marketing => self.marketing = Some(granted),
            ConsentCategory::Preferences => self.preferences = Some(granted),
        }
        self
    }

    pub fn analytics(self, granted: bool) -> Self {
        self.set(ConsentCategory::Analytics, granted)
    }

    pub fn marketing(self, granted: bool) -> Self {
        self.set(ConsentCategory::Marketing, granted)
    }

    pub fn preferences(self, granted: bool) -> Self {
        self.set(ConsentCategory::Preferences, granted)
    }
}

impl From<ConsentCategories> for PartialConsent {
    fn from(c: ConsentCategories) -> Self {
        Self {
            necessary: None,
            analytics: Some(c.analytics),
            marketing: Some(c.marketing),
            preferences: Some(c.preferences),
        }
    }
}
