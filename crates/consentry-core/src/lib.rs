//! Consentry Core
//!
//! Value types and persistence shared by every Consentry crate: the consent
//! state model, the ordered pattern classifier, visitor/session identifiers,
//! configuration, and the dual-backend consent store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐
//! │ ConsentCategories│   │   PatternTable   │  ← storage keys / script URLs
//! └────────┬─────────┘   └────────┬─────────┘
//!          │                      │
//!          ▼                      ▼
//! ┌──────────────────┐   ┌──────────────────┐
//! │  ConsentRecord   │   │  classify(...)   │  first match wins
//! └────────┬─────────┘   └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────┐
//! │              ConsentStore               │
//! │   CookieStore (durable) + KeyValueStore │
//! └─────────────────────────────────────────┘
//! ```

pub mod categories;
pub mod config;
pub mod identifier;
pub mod known_patterns;
pub mod memory;
pub mod patterns;
pub mod persistence;
pub mod record;

pub use categories::*;
pub use config::*;
pub use identifier::{generate_id, is_valid_id};
pub use memory::{MemoryCookieStore, MemoryStorage};
pub use patterns::*;
pub use persistence::*;
pub use record::ConsentRecord;

use thiserror::Error;

/// Prefix shared by every key Consentry itself writes.
pub const SDK_KEY_PREFIX: &str = "consentry_";

/// Key of the persisted consent record (cookie and local store).
pub const CONSENT_KEY: &str = "consentry_consent";

/// Key of the long-lived visitor identifier.
pub const VISITOR_ID_KEY: &str = "consentry_visitor_id";

/// Key of the per-session identifier.
pub const SESSION_ID_KEY: &str = "consentry_session_id";

/// Errors from core operations
#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("Storage backend error: {0}")]
    Storage(String),
    #[error("Cookie store error: {0}")]
    Cookie(String),
    #[error("Invalid consent record: {0}")]
    InvalidRecord(String),
    #[error("Unknown consent category: {0}")]
    UnknownCategory(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, ConsentError>;
