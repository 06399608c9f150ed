//! Remote collector interface.
//!
//! The transport is supplied by the embedder. The client only needs these
//! two calls and bounds each one with a timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use consentry_core::ConsentCategories;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the decision was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    AcceptAll,
    RejectAll,
    SavePreferences,
    /// Programmatic `set_consent`
    Custom,
}

/// One consent decision submitted to the collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentReport {
    pub visitor_id: String,
    pub session_id: String,
    pub categories: ConsentCategories,
    pub interaction: InteractionKind,
    pub language: String,
    pub timestamp: DateTime<Utc>,
}

/// Opaque acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentReceipt {
    pub id: String,
    pub received_at: Option<DateTime<Utc>>,
}

/// One past decision returned by history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub categories: ConsentCategories,
    pub interaction: InteractionKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectorError {
    #[error("Collector request timed out after {0} ms")]
    Timeout(u64),
    #[error("Collector transport error: {0}")]
    Transport(String),
    #[error("Collector returned {code}: {message}")]
    Status { code: u16, message: String },
}

/// Remote consent collector
#[async_trait]
pub trait ConsentCollector: Send + Sync {
    /// Submit a decision
    async fn submit(&self, report: ConsentReport) -> Result<ConsentReceipt, CollectorError>;

    /// Past decisions for a visitor, oldest first
    async fn history(&self, visitor_id: &str) -> Result<Vec<HistoryEntry>, CollectorError>;
}
