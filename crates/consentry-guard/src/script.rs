//! Script interception engine
//!
//! Inserted script elements are classified by their publisher tag, their
//! `src`, or their inline body. Scripts needing a category that is not
//! granted are neutralised in place and remembered; when the category is
//! granted later they are replaced by an executable copy at the same
//! position. Revoking consent never re-blocks a script that already ran.
//!
//! # Known limitation
//!
//! Insertions are reported after the fact in batches. A script can start
//! loading before its batch arrives, so neutralisation is best effort.
//! Publishers who need a hard guarantee should insert scripts pre-tagged
//! with `type="text/plain"` and `data-consent-category`.

use crate::{DocumentHost, InsertedNode, MutationBatch, NodeId, ScriptElement};
use chrono::{DateTime, Utc};
use consentry_core::{ConsentCategories, ConsentCategory, PatternTable, ScriptConfig};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Set once on every element the engine has seen
pub const PROCESSED_ATTR: &str = "data-consent-processed";
/// Category that blocked the element
pub const BLOCKED_ATTR: &str = "data-consent-blocked";
/// Publisher-supplied category
pub const CATEGORY_ATTR: &str = "data-consent-category";
/// Parked `src` of a neutralised element
pub const SRC_ATTR: &str = "data-consent-src";
/// Parked `type` of a neutralised element
pub const TYPE_ATTR: &str = "data-consent-type";
/// Set on replacement elements
pub const REACTIVATED_ATTR: &str = "data-consent-reactivated";

const NEUTRAL_TYPE: &str = "text/plain";

/// Markers stripped when building the executable replacement
const BLOCKING_MARKERS: &[&str] = &[
    "type",
    BLOCKED_ATTR,
    SRC_ATTR,
    TYPE_ATTR,
    PROCESSED_ATTR,
    REACTIVATED_ATTR,
];

/// Where a blocked script's code comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum ScriptSource {
    Url(String),
    Inline(String),
}

/// A neutralised script awaiting consent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedScript {
    pub node: NodeId,
    pub category: ConsentCategory,
    pub source: ScriptSource,
    /// The element as it was left in the document
    pub element: ScriptElement,
    pub blocked_at: DateTime<Utc>,
}

/// The script interception engine
pub struct ScriptGuard {
    host: Arc<dyn DocumentHost>,
    table: PatternTable,
    enabled: AtomicBool,
    observing: AtomicBool,
    consent: RwLock<ConsentCategories>,
    blocked: Mutex<Vec<BlockedScript>>,
}

impl ScriptGuard {
    /// Create a disabled engine writing back to `host`
    pub fn new(host: Arc<dyn DocumentHost>, config: &ScriptConfig) -> Self {
        Self {
            host,
            table: PatternTable::scripts(&config.patterns),
            enabled: AtomicBool::new(false),
            observing: AtomicBool::new(false),
            consent: RwLock::new(ConsentCategories::default()),
            blocked: Mutex::new(Vec::new()),
        }
    }

    /// Turn blocking on and start observing
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        self.start();
    }

    /// Turn blocking off and stop observing. Elements already neutralised
    /// stay neutralised.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.stop();
    }

    pub fn start(&self) {
        if !self.observing.swap(true, Ordering::SeqCst) {
            info!("Script observation started");
        }
    }

    pub fn stop(&self) {
        if self.observing.swap(false, Ordering::SeqCst) {
            info!("Script observation stopped");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_observing(&self) -> bool {
        self.observing.load(Ordering::SeqCst)
    }

    pub fn consent(&self) -> ConsentCategories {
        *self.consent.read()
    }

    /// Handle one batch of insertions. Returns how many were neutralised.
    pub fn process_mutations(&self, batch: &MutationBatch) -> usize {
        if !self.is_enabled() || !self.is_observing() {
            return 0;
        }
        batch
            .inserted
            .iter()
            .filter(|n| self.process_node(n))
            .count()
    }

    /// Consume batches until the sender side closes
    pub async fn observe(self: Arc<Self>, mut batches: mpsc::Receiver<MutationBatch>) -> usize {
        let mut blocked = 0;
        while let Some(batch) = batches.recv().await {
            blocked += self.process_mutations(&batch);
        }
        debug!("Mutation stream closed after blocking {} scripts", blocked);
        blocked
    }

    fn process_node(&self, inserted: &InsertedNode) -> bool {
        let element = &inserted.element;
        if !element.is_script() || element.attr(PROCESSED_ATTR) == Some("true") {
            return false;
        }

        let pre_tagged = self.tagged_category(element);
        let category = match pre_tagged {
            Some(c) => Some(c),
            None if element.is_executable() => self.classify(element),
            None => None,
        };

        let mut marked = element.clone();
        marked.set_attr(PROCESSED_ATTR, "true");

        let Some(category) = category else {
            self.write_back(inserted.node, &marked);
            return false;
        };

        if self.consent.read().allows(category) {
            if pre_tagged.is_some() && !marked.is_executable() {
                self.activate(inserted.node, &marked);
            } else {
                self.write_back(inserted.node, &marked);
            }
            return false;
        }

        let source = match marked.src().or_else(|| marked.attr(SRC_ATTR)) {
            Some(src) => ScriptSource::Url(src.to_string()),
            None => ScriptSource::Inline(marked.text.clone().unwrap_or_default()),
        };
        neutralise(&mut marked, category);
        self.write_back(inserted.node, &marked);
        debug!("Blocked script {} ({:?}) pending {}", inserted.node, source, category);

        self.blocked.lock().push(BlockedScript {
            node: inserted.node,
            category,
            source,
            element: marked,
            blocked_at: Utc::now(),
        });
        true
    }

    fn tagged_category(&self, element: &ScriptElement) -> Option<ConsentCategory> {
        let raw = element.attr(CATEGORY_ATTR)?;
        match raw.trim().parse() {
            Ok(category) => Some(category),
            Err(_) => {
                warn!("Ignoring unknown {} value {:?}", CATEGORY_ATTR, raw);
                None
            }
        }
    }

    fn classify(&self, element: &ScriptElement) -> Option<ConsentCategory> {
        if let Some(src) = element.src() {
            if let Some(rule) = self.table.classify(src) {
                return Some(rule.category);
            }
        }
        element
            .inline_text()
            .and_then(|text| self.table.classify(text))
            .map(|rule| rule.category)
    }

    fn write_back(&self, node: NodeId, element: &ScriptElement) {
        if let Err(e) = self.host.update(node, element) {
            warn!("Failed to update script {}: {}", node, e);
        }
    }

    fn activate(&self, node: NodeId, element: &ScriptElement) -> bool {
        match self.host.replace(node, reactivated(element)) {
            Ok(fresh) => {
                debug!("Activated script {} as {}", node, fresh);
                true
            }
            Err(e) => {
                warn!("Failed to activate script {}: {}", node, e);
                false
            }
        }
    }

    /// Record the new consent state and reactivate every blocked script
    /// whose category just became granted. Returns the number reactivated.
    ///
    /// Runs whether or not the engine is enabled.
    pub fn update_consent(&self, categories: ConsentCategories) -> usize {
        let previous = std::mem::replace(&mut *self.consent.write(), categories);
        let flipped = categories.newly_granted(&previous);
        if flipped.is_empty() {
            return 0;
        }

        let ready: Vec<BlockedScript> = {
            let mut blocked = self.blocked.lock();
            let (ready, pending): (Vec<_>, Vec<_>) = blocked
                .drain(..)
                .partition(|b| flipped.contains(&b.category));
            *blocked = pending;
            ready
        };

        let mut failed = Vec::new();
        let mut reactivated = 0;
        for record in ready {
            if self.activate(record.node, &record.element) {
                reactivated += 1;
            } else {
                failed.push(record);
            }
        }
        if !failed.is_empty() {
            self.blocked.lock().extend(failed);
        }
        if reactivated > 0 {
            info!("Reactivated {} blocked scripts", reactivated);
        }
        reactivated
    }

    /// Snapshot of scripts still blocked
    pub fn blocked(&self) -> Vec<BlockedScript> {
        self.blocked.lock().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.blocked.lock().len()
    }
}

fn neutralise(element: &mut ScriptElement, category: ConsentCategory) {
    if let Some(original) = element.script_type().map(str::to_string) {
        if !original.eq_ignore_ascii_case(NEUTRAL_TYPE) {
            element.set_attr(TYPE_ATTR, original);
        }
    }
    element.set_attr("type", NEUTRAL_TYPE);
    if let Some(src) = element.remove_attr("src") {
        element.set_attr(SRC_ATTR, src);
    }
    element.set_attr(BLOCKED_ATTR, category.as_str());
}

/// Executable copy of a neutralised element
fn reactivated(element: &ScriptElement) -> ScriptElement {
    let mut fresh = ScriptElement::new(element.tag.clone());
    for (name, value) in element.attributes() {
        if !BLOCKING_MARKERS.contains(&name) {
            fresh.set_attr(name, value);
        }
    }
    if let Some(original) = element.attr(TYPE_ATTR) {
        fresh.set_attr("type", original);
    }
    if let Some(src) = element.attr(SRC_ATTR) {
        fresh.set_attr("src", src);
    }
    fresh.text = element.text.clone();
    fresh.set_attr(PROCESSED_ATTR, "true");
    fresh.set_attr(REACTIVATED_ATTR, "true");
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDocument;

    const GTM: &str = "https://www.googletagmanager.com/gtm.js?id=GTM-XYZ";
    const PIXEL: &str = "https://connect.facebook.net/en_US/fbevents.js";

    fn fixture() -> (Arc<MemoryDocument>, ScriptGuard) {
        let doc = Arc::new(MemoryDocument::new());
        let guard = ScriptGuard::new(doc.clone(), &ScriptConfig::default());
        guard.enable();
        (doc, guard)
    }

    #[test]
    fn test_marketing_script_is_neutralised() {
        let (doc, guard) = fixture();
        let batch = doc.insert_batch([ScriptElement::external(PIXEL).with_attr("async", "")]);
        assert_eq!(guard.process_mutations(&batch), 1);

        let el = doc.get(batch.inserted[0].node).unwrap();
        assert_eq!(el.script_type(), Some("text/plain"));
        assert!(el.src().is_none());
        assert_eq!(el.attr(SRC_ATTR), Some(PIXEL));
        assert_eq!(el.attr(BLOCKED_ATTR), Some("marketing"));
        assert_eq!(el.attr(PROCESSED_ATTR), Some("true"));
        assert!(!el.has_attr(TYPE_ATTR));

        let blocked = guard.blocked();
        assert_eq!(blocked[0].source, ScriptSource::Url(PIXEL.to_string()));
        assert_eq!(blocked[0].category, ConsentCategory::Marketing);
    }

    #[test]
    fn test_unmatched_script_is_left_alone() {
        let (doc, guard) = fixture();
        let batch = doc.insert_batch([ScriptElement::external("https://cdn.example.com/app.js")]);
        assert_eq!(guard.process_mutations(&batch), 0);
        let el = doc.get(batch.inserted[0].node).unwrap();
        assert!(el.is_executable());
        assert_eq!(el.src(), Some("https://cdn.example.com/app.js"));
        assert_eq!(guard.pending_count(), 0);
    }

    #[test]
    fn test_inline_script_classified_by_body() {
        let (doc, guard) = fixture();
        let batch = doc.insert_batch([ScriptElement::inline("fbq('init', '123');")]);
        assert_eq!(guard.process_mutations(&batch), 1);
        assert!(matches!(guard.blocked()[0].source, ScriptSource::Inline(ref t) if t.contains("fbq")));
    }

    #[test]
    fn test_granted_script_is_not_blocked() {
        let (doc, guard) = fixture();
        guard.update_consent(ConsentCategories::new(true, false, false));
        let batch = doc.insert_batch([ScriptElement::external(GTM)]);
        assert_eq!(guard.process_mutations(&batch), 0);
        assert!(doc.get(batch.inserted[0].node).unwrap().is_executable());
    }

    #[test]
    fn test_processed_elements_are_skipped() {
        let (doc, guard) = fixture();
        let batch = doc.insert_batch([ScriptElement::external(PIXEL)]);
        guard.process_mutations(&batch);
        let again = MutationBatch::single(InsertedNode {
            node: batch.inserted[0].node,
            element: doc.get(batch.inserted[0].node).unwrap(),
        });
        assert_eq!(guard.process_mutations(&again), 0);
        assert_eq!(guard.pending_count(), 1);
    }

    #[test]
    fn test_reactivation_restores_original_in_place() {
        let (doc, guard) = fixture();
        doc.insert(ScriptElement::inline("first()"));
        let batch = doc.insert_batch([
            ScriptElement::external(PIXEL).with_attr("type", "module").with_attr("id", "px"),
            ScriptElement::external(GTM),
        ]);
        doc.insert(ScriptElement::inline("last()"));
        assert_eq!(guard.process_mutations(&batch), 2);

        let reactivated = guard.update_consent(ConsentCategories::new(false, true, false));
        assert_eq!(reactivated, 1);
        assert_eq!(guard.pending_count(), 1);

        let (fresh_id, fresh) = doc.nodes()[1].clone();
        assert_ne!(fresh_id, batch.inserted[0].node);
        assert_eq!(fresh.script_type(), Some("module"));
        assert_eq!(fresh.src(), Some(PIXEL));
        assert_eq!(fresh.attr("id"), Some("px"));
        assert_eq!(fresh.attr(REACTIVATED_ATTR), Some("true"));
        assert_eq!(fresh.attr(PROCESSED_ATTR), Some("true"));
        assert!(!fresh.has_attr(BLOCKED_ATTR));
        assert!(!fresh.has_attr(SRC_ATTR));
        assert!(fresh.is_executable());
    }

    #[test]
    fn test_reactivation_removes_type_when_none_was_set() {
        let (doc, guard) = fixture();
        let batch = doc.insert_batch([ScriptElement::external(GTM)]);
        guard.process_mutations(&batch);
        guard.update_consent(ConsentCategories::new(true, false, false));
        let (_, fresh) = doc.nodes()[0].clone();
        assert!(fresh.script_type().is_none());
    }

    #[test]
    fn test_revocation_does_not_reblock() {
        let (doc, guard) = fixture();
        let batch = doc.insert_batch([ScriptElement::external(GTM)]);
        guard.process_mutations(&batch);
        guard.update_consent(ConsentCategories::granted());
        assert_eq!(guard.update_consent(ConsentCategories::denied()), 0);
        assert!(doc.nodes()[0].1.is_executable());
        assert_eq!(guard.pending_count(), 0);
    }

    #[test]
    fn test_pre_tagged_category_wins() {
        let (doc, guard) = fixture();
        let batch = doc.insert_batch([ScriptElement::external("https://cdn.example.com/chat.js")
            .with_attr(CATEGORY_ATTR, "preferences")]);
        assert_eq!(guard.process_mutations(&batch), 1);
        assert_eq!(guard.blocked()[0].category, ConsentCategory::Preferences);
    }

    #[test]
    fn test_pre_tagged_inert_script_activates_when_granted() {
        let (doc, guard) = fixture();
        guard.update_consent(ConsentCategories::new(true, false, false));
        let batch = doc.insert_batch([ScriptElement::inline("track()")
            .with_attr("type", "text/plain")
            .with_attr(CATEGORY_ATTR, "analytics")]);
        assert_eq!(guard.process_mutations(&batch), 0);
        let (id, el) = doc.nodes()[0].clone();
        assert_ne!(id, batch.inserted[0].node);
        assert!(el.is_executable());
        assert_eq!(el.attr(CATEGORY_ATTR), Some("analytics"));
    }

    #[test]
    fn test_disabled_engine_ignores_batches() {
        let (doc, guard) = fixture();
        guard.disable();
        let batch = doc.insert_batch([ScriptElement::external(PIXEL)]);
        assert_eq!(guard.process_mutations(&batch), 0);
        assert!(doc.get(batch.inserted[0].node).unwrap().is_executable());
    }

    #[test]
    fn test_reactivation_runs_while_disabled() {
        let (doc, guard) = fixture();
        let batch = doc.insert_batch([ScriptElement::external(PIXEL)]);
        guard.process_mutations(&batch);
        guard.disable();
        assert!(!doc.nodes()[0].1.is_executable());
        assert_eq!(guard.update_consent(ConsentCategories::granted()), 1);
        assert!(doc.nodes()[0].1.is_executable());
    }

    #[test]
    fn test_failed_reactivation_keeps_record() {
        let doc = Arc::new(MemoryDocument::new());
        let guard = ScriptGuard::new(doc.clone(), &ScriptConfig::default());
        guard.enable();
        // Node never inserted into this document
        let orphan = MutationBatch::single(InsertedNode {
            node: NodeId(99),
            element: ScriptElement::external(PIXEL),
        });
        assert_eq!(guard.process_mutations(&orphan), 1);
        assert_eq!(guard.update_consent(ConsentCategories::granted()), 0);
        assert_eq!(guard.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_observe_consumes_stream() {
        let doc = Arc::new(MemoryDocument::new());
        let guard = Arc::new(ScriptGuard::new(doc.clone(), &ScriptConfig::default()));
        guard.enable();

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(guard.clone().observe(rx));
        tx.send(doc.insert_batch([ScriptElement::external(PIXEL)])).await.unwrap();
        tx.send(doc.insert_batch([ScriptElement::external(GTM), ScriptElement::inline("ok()")]))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(task.await.unwrap(), 2);
        assert_eq!(guard.pending_count(), 2);
    }
}
