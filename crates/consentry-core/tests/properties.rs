//! Property-based tests for the consent model, classifier and persistence.

use std::sync::Arc;

use proptest::prelude::*;

use consentry_core::{
    classify_storage_key, generate_id, ConsentCategories, ConsentCategory, ConsentRecord,
    ConsentStore, CookieConfig, KeyValueStore, MemoryCookieStore, MemoryStorage, PartialConsent,
    PatternTable, CONSENT_KEY,
};

// =============================================================================
// Strategies
// =============================================================================

fn arb_categories() -> impl Strategy<Value = ConsentCategories> {
    (any::<bool>(), any::<bool>(), any::<bool>())
        .prop_map(|(a, m, p)| ConsentCategories::new(a, m, p))
}

fn arb_partial() -> impl Strategy<Value = PartialConsent> {
    (
        any::<Option<bool>>(),
        any::<Option<bool>>(),
        any::<Option<bool>>(),
        any::<Option<bool>>(),
    )
        .prop_map(|(necessary, analytics, marketing, preferences)| PartialConsent {
            necessary,
            analytics,
            marketing,
            preferences,
        })
}

fn store() -> (ConsentStore, Arc<MemoryCookieStore>, Arc<MemoryStorage>) {
    let cookies = Arc::new(MemoryCookieStore::new());
    let local = Arc::new(MemoryStorage::new());
    let store = ConsentStore::new(
        cookies.clone(),
        local.clone(),
        Arc::new(MemoryStorage::new()),
        CookieConfig::default(),
    );
    (store, cookies, local)
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_merge_keeps_necessary(base in arb_categories(), update in arb_partial()) {
        let merged = base.merge(&update);
        prop_assert!(merged.necessary());
        prop_assert_eq!(merged.analytics, update.analytics.unwrap_or(base.analytics));
        prop_assert_eq!(merged.marketing, update.marketing.unwrap_or(base.marketing));
        prop_assert_eq!(merged.preferences, update.preferences.unwrap_or(base.preferences));
    }

    #[test]
    fn prop_deserialized_categories_keep_necessary(update in arb_partial()) {
        let json = serde_json::to_string(&update).unwrap();
        let categories: ConsentCategories = serde_json::from_str(&json).unwrap();
        prop_assert!(categories.necessary());
        prop_assert_eq!(categories.analytics, update.analytics.unwrap_or(false));
    }

    #[test]
    fn prop_save_then_load_round_trips(categories in arb_categories()) {
        let (store, _, _) = store();
        let record = ConsentRecord::new(generate_id(), generate_id(), categories);
        store.save(&record);

        let loaded = store.load().unwrap();
        prop_assert_eq!(loaded.categories, record.categories);
        prop_assert_eq!(&loaded.visitor_id, &record.visitor_id);
        prop_assert_eq!(&loaded.session_id, &record.session_id);
    }

    #[test]
    fn prop_local_fallback_round_trips(categories in arb_categories()) {
        let (store, cookies, _) = store();
        let record = ConsentRecord::new(generate_id(), generate_id(), categories);
        store.save(&record);
        cookies.set_unavailable(true);
        prop_assert_eq!(store.load().map(|r| r.categories), Some(categories));
    }

    #[test]
    fn prop_unmatched_storage_key_is_marketing(key in "zz[a-z0-9_]{0,16}") {
        let table = PatternTable::storage(&[]);
        let classification = classify_storage_key(&key, &table);
        prop_assert_eq!(classification.category, ConsentCategory::Marketing);
        prop_assert!(!classification.matched);
    }

    #[test]
    fn prop_garbage_record_is_absent(raw in "\\PC{0,64}") {
        let (store, _, local) = store();
        local.set(CONSENT_KEY, &raw).unwrap();
        prop_assert!(store.load().is_none());
    }
}
