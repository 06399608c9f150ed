//! Consentry Client
//!
//! The consent orchestrator. A [`ConsentClient`] owns the visitor's consent
//! state, persists it, and fans every change out to the interception
//! engines, the consent-mode adapter, subscribers and the remote collector.
//!
//! # Architecture
//!
//! ```text
//!                 set_consent / accept_all / reject_all
//!                               │
//!                               ▼
//!                     ┌───────────────────┐
//!                     │   ConsentClient   │──► ConsentStore (cookie + local)
//!                     └─────────┬─────────┘
//!        ┌──────────────┬───────┴───────┬───────────────┬──────────────┐
//!        ▼              ▼               ▼               ▼              ▼
//!  StorageGuard    ScriptGuard   ConsentModeAdapter   EventBus   ConsentCollector
//!  replay queue    reactivate    `update` signal     sync        detached task,
//!                                                    callbacks   timeout bound
//! ```
//!
//! At most one client coordinates a page at a time; [`PageContext`] holds it.

pub mod client;
pub mod collector;
pub mod consent_mode;
pub mod context;
pub mod events;

pub use client::{ConsentClient, ConsentClientBuilder};
pub use collector::{
    CollectorError, ConsentCollector, ConsentReceipt, ConsentReport, HistoryEntry,
    InteractionKind,
};
pub use consent_mode::{
    signals_for, ConsentModeAdapter, ConsentModeCommand, ConsentModeSignal, DataLayer,
    SignalMap, SignalSink, SignalValue,
};
pub use context::PageContext;
pub use events::{ConsentEvent, EventBus, EventKind, Subscription};

use thiserror::Error;

/// Errors from client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Core error: {0}")]
    Core(#[from] consentry_core::ConsentError),
    #[error("Collector error: {0}")]
    Collector(#[from] CollectorError),
    #[error("No remote collector configured")]
    NoCollector,
    #[error("Missing builder component: {0}")]
    Builder(&'static str),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
