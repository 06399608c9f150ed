//! Persisted consent record

use crate::{is_valid_id, ConsentCategories, ConsentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The persisted form of a consent decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub visitor_id: String,
    pub session_id: String,
    pub categories: ConsentCategories,
    pub timestamp: DateTime<Utc>,
}

impl ConsentRecord {
    /// Create a record stamped with the current time
    pub fn new(
        visitor_id: impl Into<String>,
        session_id: impl Into<String>,
        categories: ConsentCategories,
    ) -> Self {
        Self {
            visitor_id: visitor_id.into(),
            session_id: session_id.into(),
            categories,
            timestamp: Utc::now(),
        }
    }

    /// Structural validation beyond what serde enforces
    pub fn validate(&self) -> Result<()> {
        if !is_valid_id(&self.visitor_id) {
            return Err(ConsentError::InvalidRecord(format!(
                "visitorId is not a valid identifier: {:?}",
                self.visitor_id
            )));
        }
        if !is_valid_id(&self.session_id) {
            return Err(ConsentError::InvalidRecord(format!(
                "sessionId is not a valid identifier: {:?}",
                self.session_id
            )));
        }
        Ok(())
    }

    /// Parse and validate; any failure is an error
    pub fn from_json(raw: &str) -> Result<Self> {
        let record: Self = serde_json::from_str(raw)?;
        record.validate()?;
        Ok(record)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
