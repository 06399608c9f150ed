//! Consent orchestrator

use crate::{
    ClientError, CollectorError, ConsentCollector, ConsentEvent, ConsentModeAdapter,
    ConsentReport, EventBus, EventKind, HistoryEntry, InteractionKind, Result, SignalSink,
    Subscription,
};
use consentry_core::{
    ConsentCategories, ConsentConfig, ConsentRecord, ConsentStore, CookieStore, KeyValueStore,
    MemoryCookieStore, MemoryStorage, PartialConsent,
};
use consentry_guard::{
    DocumentHost, GuardedStore, MutationBatch, ScanEntry, ScriptGuard, StorageGuard,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wires a [`ConsentClient`] from its collaborators
pub struct ConsentClientBuilder {
    config: ConsentConfig,
    cookies: Option<Arc<dyn CookieStore>>,
    local: Option<Arc<dyn KeyValueStore>>,
    session: Option<Arc<dyn KeyValueStore>>,
    document: Option<Arc<dyn DocumentHost>>,
    collector: Option<Arc<dyn ConsentCollector>>,
    signal_sink: Option<Arc<dyn SignalSink>>,
}

impl ConsentClientBuilder {
    pub fn new(config: ConsentConfig) -> Self {
        Self {
            config: config.normalized(),
            cookies: None,
            local: None,
            session: None,
            document: None,
            collector: None,
            signal_sink: None,
        }
    }

    /// Use fresh in-memory cookie, local and session backends
    pub fn with_memory_backends(self) -> Self {
        self.cookies(Arc::new(MemoryCookieStore::new()))
            .local_storage(Arc::new(MemoryStorage::new()))
            .session_storage(Arc::new(MemoryStorage::new()))
    }

    pub fn cookies(mut self, cookies: Arc<dyn CookieStore>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn local_storage(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.local = Some(store);
        self
    }

    pub fn session_storage(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.session = Some(store);
        self
    }

    /// Enables script interception against this document
    pub fn document(mut self, host: Arc<dyn DocumentHost>) -> Self {
        self.document = Some(host);
        self
    }

    pub fn collector(mut self, collector: Arc<dyn ConsentCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Enables consent-mode signalling into this sink
    pub fn signal_sink(mut self, sink: Arc<dyn SignalSink>) -> Self {
        self.signal_sink = Some(sink);
        self
    }

    /// Load persisted state, resolve identifiers, send the consent-mode
    /// default and start the engines
    pub fn build(self) -> Result<ConsentClient> {
        let cookies = self.cookies.ok_or(ClientError::Builder("cookie store"))?;
        let local = self.local.ok_or(ClientError::Builder("local storage"))?;
        let session = self.session.ok_or(ClientError::Builder("session storage"))?;
        let config = self.config;

        let store = ConsentStore::new(cookies, local.clone(), session.clone(), config.cookie.clone());
        let record = store.load();
        let decided = record.is_some();
        let categories = record.map(|r| r.categories).unwrap_or_default();
        let visitor_id = store.resolve_visitor_id();
        let session_id = store.resolve_session_id();

        let consent_mode = self
            .signal_sink
            .map(|sink| ConsentModeAdapter::new(sink, config.consent_mode.clone()));
        if let Some(adapter) = &consent_mode {
            adapter.emit_default();
            if decided {
                adapter.update_consent(&categories);
            }
        }

        let storage = StorageGuard::new(local, session, &config.storage);
        storage.update_consent(categories);
        if config.storage.enabled {
            storage.start();
        }

        let scripts = self.document.map(|host| {
            let guard = Arc::new(ScriptGuard::new(host, &config.scripts));
            guard.update_consent(categories);
            if config.scripts.enabled {
                guard.enable();
            }
            guard
        });

        info!(
            "Consent client ready (decision on record: {}, granted: {:?})",
            decided,
            categories.granted_categories()
        );

        Ok(ConsentClient {
            config,
            store,
            state: RwLock::new(ClientState { categories, decided }),
            update_lock: Mutex::new(()),
            visitor_id,
            session_id,
            storage,
            scripts,
            consent_mode,
            events: EventBus::new(),
            collector: self.collector,
            reports: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }
}

struct ClientState {
    categories: ConsentCategories,
    decided: bool,
}

/// Owns the visitor's consent state and keeps every dependent in sync
pub struct ConsentClient {
    config: ConsentConfig,
    store: ConsentStore,
    state: RwLock<ClientState>,
    /// Serialises merge, save and propagate so the persisted record and the
    /// engines always reflect the latest in-memory state
    update_lock: Mutex<()>,
    visitor_id: String,
    session_id: String,
    storage: StorageGuard,
    scripts: Option<Arc<ScriptGuard>>,
    consent_mode: Option<ConsentModeAdapter>,
    events: EventBus,
    collector: Option<Arc<dyn ConsentCollector>>,
    reports: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl ConsentClient {
    pub fn builder(config: ConsentConfig) -> ConsentClientBuilder {
        ConsentClientBuilder::new(config)
    }

    pub fn config(&self) -> &ConsentConfig {
        &self.config
    }

    /// Snapshot of the current consent state
    pub fn consent(&self) -> ConsentCategories {
        self.state.read().categories
    }

    /// Whether the visitor has made (or restored) a decision
    pub fn has_decision(&self) -> bool {
        self.state.read().decided
    }

    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Merge a partial update into the current state and propagate it.
    /// `necessary` in the update is ignored.
    pub fn set_consent(&self, update: PartialConsent) -> ConsentCategories {
        self.apply(update, InteractionKind::Custom)
    }

    pub fn accept_all(&self) -> ConsentCategories {
        let categories = self.apply(PartialConsent::all(true), InteractionKind::AcceptAll);
        self.events.emit(&ConsentEvent::AcceptAll { categories });
        categories
    }

    pub fn reject_all(&self) -> ConsentCategories {
        let categories = self.apply(PartialConsent::all(false), InteractionKind::RejectAll);
        self.events.emit(&ConsentEvent::RejectAll { categories });
        categories
    }

    /// Apply choices made in the preferences view
    pub fn save_preferences(&self, update: PartialConsent) -> ConsentCategories {
        let categories = self.apply(update, InteractionKind::SavePreferences);
        self.events.emit(&ConsentEvent::PreferencesSaved { categories });
        categories
    }

    fn apply(&self, update: PartialConsent, interaction: InteractionKind) -> ConsentCategories {
        let (previous, categories, record) = {
            let _update = self.update_lock.lock();
            let (previous, categories) = {
                let mut state = self.state.write();
                let previous = state.categories;
                state.categories = previous.merge(&update);
                state.decided = true;
                (previous, state.categories)
            };

            let record =
                ConsentRecord::new(self.visitor_id.clone(), self.session_id.clone(), categories);
            self.store.save(&record);
            self.propagate(categories);
            (previous, categories, record)
        };
        info!(
            "Consent updated via {:?}: granted {:?}",
            interaction,
            categories.granted_categories()
        );

        self.events.emit(&ConsentEvent::ConsentChanged {
            categories,
            previous,
        });
        self.report(ConsentReport {
            visitor_id: self.visitor_id.clone(),
            session_id: self.session_id.clone(),
            categories,
            interaction,
            language: self.config.language.clone(),
            timestamp: record.timestamp,
        });
        categories
    }

    /// Forget the decision and return to defaults. The visitor id is kept
    /// and nothing is reported.
    pub fn reset_consent(&self) -> ConsentCategories {
        let (previous, categories) = {
            let _update = self.update_lock.lock();
            self.store.clear();
            let (previous, categories) = {
                let mut state = self.state.write();
                let previous = state.categories;
                state.categories = ConsentCategories::default();
                state.decided = false;
                (previous, state.categories)
            };
            self.propagate(categories);
            (previous, categories)
        };
        info!("Consent reset to defaults");

        self.events.emit(&ConsentEvent::ConsentChanged {
            categories,
            previous,
        });
        categories
    }

    fn propagate(&self, categories: ConsentCategories) {
        let replayed = self.storage.update_consent(categories);
        let reactivated = self
            .scripts
            .as_ref()
            .map_or(0, |s| s.update_consent(categories));
        if let Some(adapter) = &self.consent_mode {
            adapter.update_consent(&categories);
        }
        debug!(
            "Propagated consent: {} storage operations replayed, {} scripts reactivated",
            replayed, reactivated
        );
    }

    fn collector_timeout(&self) -> Duration {
        Duration::from_millis(self.config.collector.timeout_ms)
    }

    /// Submit in the background on the ambient runtime. Failures are logged.
    fn report(&self, report: ConsentReport) {
        let Some(collector) = self.collector.clone() else {
            return;
        };
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No async runtime available; consent report not sent");
                return;
            }
        };

        let timeout = self.collector_timeout();
        let task = handle.spawn(async move {
            match tokio::time::timeout(timeout, collector.submit(report)).await {
                Ok(Ok(receipt)) => debug!("Consent report acknowledged: {}", receipt.id),
                Ok(Err(e)) => warn!("Consent report failed: {}", e),
                Err(_) => warn!(
                    "Consent report failed: {}",
                    CollectorError::Timeout(timeout.as_millis() as u64)
                ),
            }
        });

        let mut reports = self.reports.lock();
        reports.retain(|t| !t.is_finished());
        reports.push(task);
    }

    /// Wait for every in-flight report to settle
    pub async fn flush_reports(&self) {
        let pending: Vec<_> = std::mem::take(&mut *self.reports.lock());
        for task in pending {
            if let Err(e) = task.await {
                warn!("Consent report task failed: {}", e);
            }
        }
    }

    /// Past decisions for this visitor from the remote collector
    pub async fn fetch_history(&self) -> Result<Vec<HistoryEntry>> {
        let collector = self.collector.clone().ok_or(ClientError::NoCollector)?;
        let timeout = self.collector_timeout();
        let history = tokio::time::timeout(timeout, collector.history(&self.visitor_id))
            .await
            .map_err(|_| CollectorError::Timeout(timeout.as_millis() as u64))??;
        Ok(history)
    }

    pub fn notify_banner_shown(&self) {
        self.events.emit(&ConsentEvent::BannerShown);
    }

    pub fn notify_banner_hidden(&self) {
        self.events.emit(&ConsentEvent::BannerHidden);
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConsentEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.events.unsubscribe(subscription)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Every key in both stores with its classification
    pub fn scan_storage(&self) -> Vec<ScanEntry> {
        self.storage.scan()
    }

    /// Guarded local storage handle for page code
    pub fn local_storage(&self) -> GuardedStore {
        self.storage.local()
    }

    /// Guarded session storage handle for page code
    pub fn session_storage(&self) -> GuardedStore {
        self.storage.session()
    }

    pub fn storage_guard(&self) -> &StorageGuard {
        &self.storage
    }

    pub fn script_guard(&self) -> Option<&Arc<ScriptGuard>> {
        self.scripts.as_ref()
    }

    /// Feed insertion batches to the script engine on the ambient runtime.
    /// Returns `None` without a document or a runtime.
    pub fn spawn_observer(&self, batches: mpsc::Receiver<MutationBatch>) -> Option<JoinHandle<usize>> {
        let scripts = self.scripts.clone()?;
        let handle = Handle::try_current().ok()?;
        Some(handle.spawn(scripts.observe(batches)))
    }

    /// Stop both engines. Consent state and persistence stay usable.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.storage.stop();
        if let Some(scripts) = &self.scripts {
            scripts.disable();
        }
        info!("Consent client shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
