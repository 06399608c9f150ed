//! Storage interception engine
//!
//! [`StorageGuard`] decorates a local and a session [`KeyValueStore`]. Page
//! code writes through the [`GuardedStore`] handles it hands out; while the
//! guard is active every write, remove and clear is classified and either
//! executed, queued for replay, or dropped. Reads are never intercepted.

use crate::{OperationKind, OperationQueue, QueuedOperation, Result, StoreKind};
use consentry_core::{
    classify_storage_key, ConsentCategories, ConsentCategory, KeyValueStore, PatternSet,
    PatternSource, PatternTable, StorageConfig, SDK_KEY_PREFIX,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to an intercepted call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interception {
    /// Passed through to the backend
    Executed,
    /// Suppressed and queued for replay
    Queued,
    /// Suppressed without a record
    Dropped,
}

/// Counters for intercepted calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardStats {
    pub allowed: u64,
    pub queued: u64,
    pub dropped: u64,
    pub replayed: u64,
    /// Queue entries lost to drop-oldest overflow
    pub evicted: u64,
}

/// One key found by [`StorageGuard::scan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub store: StoreKind,
    pub key: String,
    pub category: ConsentCategory,
    pub description: Option<String>,
    /// Whether a rule matched (false means the strictest default applied)
    pub matched: bool,
    /// Whether the key bypasses classification
    pub allowlisted: bool,
}

struct GuardInner {
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    table: PatternTable,
    allow: PatternSet,
    queue_enabled: bool,
    active: AtomicBool,
    consent: RwLock<ConsentCategories>,
    queue: Mutex<OperationQueue>,
    stats: Mutex<GuardStats>,
}

/// The storage interception engine
#[derive(Clone)]
pub struct StorageGuard {
    inner: Arc<GuardInner>,
}

impl StorageGuard {
    /// Create an inactive guard over the two raw stores
    pub fn new(
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        config: &StorageConfig,
    ) -> Self {
        let mut allow = PatternSet::new(&config.allow_patterns);
        allow.push(&PatternSource::Literal(SDK_KEY_PREFIX.to_string()));

        Self {
            inner: Arc::new(GuardInner {
                local,
                session,
                table: PatternTable::storage(&config.patterns),
                allow,
                queue_enabled: config.queue_enabled,
                active: AtomicBool::new(false),
                consent: RwLock::new(ConsentCategories::default()),
                queue: Mutex::new(OperationQueue::new(config.max_queue_size)),
                stats: Mutex::new(GuardStats::default()),
            }),
        }
    }

    /// Begin intercepting (idempotent)
    pub fn start(&self) {
        if !self.inner.active.swap(true, Ordering::SeqCst) {
            info!("Storage interception started");
        }
    }

    /// Stop intercepting (idempotent). Queued operations are kept.
    pub fn stop(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            info!("Storage interception stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Guarded handle for the local area
    pub fn local(&self) -> GuardedStore {
        GuardedStore {
            store: StoreKind::Local,
            inner: self.inner.clone(),
        }
    }

    /// Guarded handle for the session area
    pub fn session(&self) -> GuardedStore {
        GuardedStore {
            store: StoreKind::Session,
            inner: self.inner.clone(),
        }
    }

    pub fn consent(&self) -> ConsentCategories {
        *self.inner.consent.read()
    }

    /// Replace the consent state and replay every queued operation it now
    /// permits, in enqueue order. Returns the number replayed.
    ///
    /// While stopped the state is recorded but nothing is replayed; the
    /// queue waits for the next `start()`.
    pub fn update_consent(&self, categories: ConsentCategories) -> usize {
        *self.inner.consent.write() = categories;
        if !self.is_active() {
            return 0;
        }

        let ready = self.inner.queue.lock().take_satisfied(|c| categories.allows(c));
        let mut replayed = 0;
        for op in ready {
            match self.inner.replay(&op) {
                Ok(()) => replayed += 1,
                Err(e) => warn!("Failed to replay queued {:?} on {:?}: {}", op.kind, op.store, e),
            }
        }
        if replayed > 0 {
            self.inner.stats.lock().replayed += replayed as u64;
            debug!("Replayed {} queued storage operations", replayed);
        }
        replayed
    }

    /// Enumerate every key in both stores with its classification.
    ///
    /// Reads the raw stores directly and mutates nothing.
    pub fn scan(&self) -> Vec<ScanEntry> {
        let mut entries = Vec::new();
        for store in [StoreKind::Local, StoreKind::Session] {
            let keys = match self.inner.backend(store).keys() {
                Ok(keys) => keys,
                Err(e) => {
                    warn!("Failed to enumerate {:?} storage: {}", store, e);
                    continue;
                }
            };
            for key in keys {
                let classification = classify_storage_key(&key, &self.inner.table);
                entries.push(ScanEntry {
                    store,
                    allowlisted: self.inner.allow.matches_any(&key),
                    category: classification.category,
                    description: classification.description,
                    matched: classification.matched,
                    key,
                });
            }
        }
        entries
    }

    /// Snapshot of the queue in enqueue order
    pub fn queued(&self) -> Vec<QueuedOperation> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Discard every queued operation without executing it
    pub fn clear_queue(&self) {
        self.inner.queue.lock().clear();
    }

    pub fn stats(&self) -> GuardStats {
        self.inner.stats.lock().clone()
    }

    /// Export the queue as JSON (for audits/debugging)
    pub fn export_queue_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.queued())?)
    }
}

impl GuardInner {
    fn backend(&self, store: StoreKind) -> &dyn KeyValueStore {
        match store {
            StoreKind::Local => self.local.as_ref(),
            StoreKind::Session => self.session.as_ref(),
        }
    }

    fn intercept(
        &self,
        store: StoreKind,
        kind: OperationKind,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<Interception> {
        if !self.active.load(Ordering::SeqCst) {
            self.execute(store, kind, key, value)?;
            return Ok(Interception::Executed);
        }

        let category = match key {
            Some(k) if kind != OperationKind::Clear => {
                if self.allow.matches_any(k) {
                    self.execute(store, kind, key, value)?;
                    self.stats.lock().allowed += 1;
                    return Ok(Interception::Executed);
                }
                classify_storage_key(k, &self.table).category
            }
            _ => ConsentCategory::STRICTEST,
        };

        let granted = self.consent.read().allows(category);
        if granted {
            self.execute(store, kind, key, value)?;
            self.stats.lock().allowed += 1;
            return Ok(Interception::Executed);
        }

        if !self.queue_enabled {
            debug!("Dropped {:?} on {:?} {:?} (needs {})", kind, store, key, category);
            self.stats.lock().dropped += 1;
            return Ok(Interception::Dropped);
        }

        let op = match kind {
            OperationKind::Set => QueuedOperation::set(store, key.unwrap_or_default(), value.unwrap_or_default(), category),
            OperationKind::Remove => QueuedOperation::remove(store, key.unwrap_or_default(), category),
            OperationKind::Clear => QueuedOperation::clear(store),
        };
        let evicted = self.queue.lock().push(op);

        let mut stats = self.stats.lock();
        stats.queued += 1;
        if let Some(old) = evicted {
            stats.evicted += 1;
            debug!("Queue full, evicted oldest {:?} {:?}", old.kind, old.key);
        }
        debug!("Queued {:?} on {:?} {:?} (needs {})", kind, store, key, category);
        Ok(Interception::Queued)
    }

    fn execute(
        &self,
        store: StoreKind,
        kind: OperationKind,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<()> {
        let backend = self.backend(store);
        match (kind, key) {
            (OperationKind::Set, Some(k)) => backend.set(k, value.unwrap_or_default())?,
            (OperationKind::Remove, Some(k)) => backend.remove(k)?,
            (OperationKind::Clear, _) => backend.clear()?,
            (_, None) => {}
        }
        Ok(())
    }

    fn replay(&self, op: &QueuedOperation) -> Result<()> {
        self.execute(op.store, op.kind, op.key.as_deref(), op.value.as_deref())
    }
}

/// A storage area routed through the guard
#[derive(Clone)]
pub struct GuardedStore {
    store: StoreKind,
    inner: Arc<GuardInner>,
}

impl GuardedStore {
    pub fn kind(&self) -> StoreKind {
        self.store
    }

    /// Write a value, reporting what the guard did with it
    pub fn try_set(&self, key: &str, value: &str) -> Result<Interception> {
        self.inner
            .intercept(self.store, OperationKind::Set, Some(key), Some(value))
    }

    /// Remove a key, reporting what the guard did with it
    pub fn try_remove(&self, key: &str) -> Result<Interception> {
        self.inner
            .intercept(self.store, OperationKind::Remove, Some(key), None)
    }

    /// Clear the area, reporting what the guard did with it
    pub fn try_clear(&self) -> Result<Interception> {
        self.inner
            .intercept(self.store, OperationKind::Clear, None, None)
    }
}

impl KeyValueStore for GuardedStore {
    fn get(&self, key: &str) -> consentry_core::Result<Option<String>> {
        self.inner.backend(self.store).get(key)
    }

    fn set(&self, key: &str, value: &str) -> consentry_core::Result<()> {
        self.try_set(key, value).map(|_| ()).map_err(into_core)
    }

    fn remove(&self, key: &str) -> consentry_core::Result<()> {
        self.try_remove(key).map(|_| ()).map_err(into_core)
    }

    fn clear(&self) -> consentry_core::Result<()> {
        self.try_clear().map(|_| ()).map_err(into_core)
    }

    fn keys(&self) -> consentry_core::Result<Vec<String>> {
        self.inner.backend(self.store).keys()
    }
}

fn into_core(e: crate::GuardError) -> consentry_core::ConsentError {
    match e {
        crate::GuardError::Backend(inner) => inner,
        other => consentry_core::ConsentError::Storage(other.to_string()),
    }
}
