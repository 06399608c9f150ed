//! Synchronous notification bus.
//!
//! Subscribers run on the emitting thread, in subscription order. A
//! subscriber that errors or panics is logged and skipped; the rest still
//! run.

use consentry_core::ConsentCategories;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Named events a consumer can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    ConsentChanged,
    BannerShown,
    BannerHidden,
    AcceptAll,
    RejectAll,
    PreferencesSaved,
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ConsentEvent {
    ConsentChanged {
        categories: ConsentCategories,
        previous: ConsentCategories,
    },
    BannerShown,
    BannerHidden,
    AcceptAll { categories: ConsentCategories },
    RejectAll { categories: ConsentCategories },
    PreferencesSaved { categories: ConsentCategories },
}

impl ConsentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConsentChanged { .. } => EventKind::ConsentChanged,
            Self::BannerShown => EventKind::BannerShown,
            Self::BannerHidden => EventKind::BannerHidden,
            Self::AcceptAll { .. } => EventKind::AcceptAll,
            Self::RejectAll { .. } => EventKind::RejectAll,
            Self::PreferencesSaved { .. } => EventKind::PreferencesSaved,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

type Handler = Arc<dyn Fn(&ConsentEvent) -> anyhow::Result<()> + Send + Sync>;

/// Per-kind subscriber registry
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<(Subscription, Handler)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConsentEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let subscription = Subscription {
            kind,
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        self.handlers.write().push((subscription, Arc::new(handler)));
        subscription
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(s, _)| *s != subscription);
        handlers.len() != before
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.read().iter().filter(|(s, _)| s.kind == kind).count()
    }

    /// Deliver `event` to its subscribers. Returns how many succeeded.
    pub fn emit(&self, event: &ConsentEvent) -> usize {
        let kind = event.kind();
        // Snapshot so handlers may (un)subscribe without deadlocking
        let targets: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .filter(|(s, _)| s.kind == kind)
            .map(|(_, h)| h.clone())
            .collect();

        let mut delivered = 0;
        for handler in targets {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("{:?} subscriber failed: {:#}", kind, e),
                Err(_) => warn!("{:?} subscriber panicked", kind),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn changed() -> ConsentEvent {
        ConsentEvent::ConsentChanged {
            categories: ConsentCategories::granted(),
            previous: ConsentCategories::denied(),
        }
    }

    #[test]
    fn test_delivery_by_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe(EventKind::ConsentChanged, move |e| {
            s.lock().push(e.kind());
            Ok(())
        });

        assert_eq!(bus.emit(&ConsentEvent::BannerShown), 0);
        assert_eq!(bus.emit(&changed()), 1);
        assert_eq!(*seen.lock(), vec![EventKind::ConsentChanged]);
    }

    #[test]
    fn test_failing_subscribers_do_not_stop_others() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0));

        bus.subscribe(EventKind::AcceptAll, |_| anyhow::bail!("broken listener"));
        bus.subscribe(EventKind::AcceptAll, |_| panic!("listener panic"));
        let c = calls.clone();
        bus.subscribe(EventKind::AcceptAll, move |_| {
            *c.lock() += 1;
            Ok(())
        });

        let delivered = bus.emit(&ConsentEvent::AcceptAll {
            categories: ConsentCategories::granted(),
        });
        assert_eq!(delivered, 1);
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventKind::BannerHidden, |_| Ok(()));
        assert_eq!(bus.subscriber_count(EventKind::BannerHidden), 1);
        assert!(bus.unsubscribe(sub));
        assert!(!bus.unsubscribe(sub));
        assert_eq!(bus.emit(&ConsentEvent::BannerHidden), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.subscribe(EventKind::BannerShown, move |_| {
            inner.subscribe(EventKind::BannerShown, |_| Ok(()));
            Ok(())
        });
        assert_eq!(bus.emit(&ConsentEvent::BannerShown), 1);
        assert_eq!(bus.subscriber_count(EventKind::BannerShown), 2);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(changed()).unwrap();
        assert_eq!(json["event"], "consentChanged");
        assert_eq!(json["categories"]["marketing"], true);
    }
}
