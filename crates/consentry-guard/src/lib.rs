//! Consentry Guard
//!
//! Consent-gated interception of storage writes and script insertion.
//!
//! # Architecture
//!
//! ```text
//!   page code                       document host
//!       │                                 │ MutationBatch
//!       ▼                                 ▼
//! ┌──────────────┐                ┌──────────────┐
//! │ GuardedStore │                │ ScriptGuard  │
//! │ set/remove/  │                │ classify src │
//! │ clear        │                │ or inline    │
//! └──────┬───────┘                └──────┬───────┘
//!        │ classify key                  │
//!        ▼                               ▼
//!   ✅ execute │ 🧊 queue │ ❌ drop     ✅ untouched │ ❌ neutralise
//!        │                               │
//!        └──────── update_consent ───────┘
//!                 replay / reactivate
//! ```
//!
//! Storage keys that match no rule need the strictest category; scripts
//! that match no rule are left alone.

pub mod dom;
pub mod queue;
pub mod script;
pub mod storage;

pub use dom::*;
pub use queue::*;
pub use script::*;
pub use storage::*;

use consentry_core::ConsentError;
use thiserror::Error;

/// Errors from interception operations
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Storage backend error: {0}")]
    Backend(#[from] ConsentError),
    #[error("Unknown document node: {0}")]
    UnknownNode(u64),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for interception operations
pub type Result<T> = std::result::Result<T, GuardError>;
