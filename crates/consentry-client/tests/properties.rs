//! Property-based tests for the orchestrator's consent state.

use proptest::prelude::*;

use consentry_client::{ConsentClient, ConsentClientBuilder};
use consentry_core::{ConsentCategories, ConsentConfig, PartialConsent};

fn client() -> ConsentClient {
    ConsentClientBuilder::new(ConsentConfig::default())
        .with_memory_backends()
        .build()
        .unwrap()
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

proptest! {
    #[test]
    fn prop_necessary_survives_any_update_sequence(
        updates in proptest::collection::vec(arb_partial(), 1..12),
    ) {
        let client = client();
        let mut expected = ConsentCategories::default();
        for update in updates {
            expected = expected.merge(&update);
            let result = client.set_consent(update);
            prop_assert!(result.necessary());
            prop_assert_eq!(client.consent(), expected);
        }
    }

    #[test]
    fn prop_snapshots_are_independent(
        updates in proptest::collection::vec(arb_partial(), 1..8),
    ) {
        let client = client();
        for update in updates {
            let mut snapshot = client.consent();
            let before = snapshot;
            snapshot.analytics = !snapshot.analytics;
            snapshot.marketing = !snapshot.marketing;
            prop_assert_eq!(client.consent(), before);
            client.set_consent(update);
        }
    }

    #[test]
    fn prop_reset_twice_equals_once(updates in proptest::collection::vec(arb_partial(), 0..6)) {
        let client = client();
        for update in updates {
            client.set_consent(update);
        }
        let once = client.reset_consent();
        let decided_once = client.has_decision();
        let twice = client.reset_consent();
        prop_assert_eq!(once, twice);
        prop_assert_eq!(decided_once, client.has_decision());
        prop_assert_eq!(client.consent(), ConsentCategories::default());
    }
}
