use std::sync::Arc;
use std::time::Duration;

use murmur::coordination::{LogicalClock, ManualTimeSource, MemoryStore, ServerRegistry};
use murmur::relay::Subscriptions;
use proptest::prelude::*;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #[test]
    fn test_observe_exceeds_both_clocks_property(
        local in 0u64..1_000_000,
        received in 0u64..1_000_000
    ) {
        let clock = LogicalClock::starting_at(local);
        let merged = clock.observe(received);
        prop_assert_eq!(merged, local.max(received) + 1);
        prop_assert!(merged > local);
        prop_assert!(merged > received);
    }

    #[test]
    fn test_clock_never_decreases_property(
        events in prop::collection::vec(prop::option::of(0u64..10_000), 1..50)
    ) {
        // None is a tick, Some(v) observes v
        let clock = LogicalClock::new();
        let mut last = clock.current();
        for event in events {
            let value = match event {
                None => clock.tick(),
                Some(received) => clock.observe(received),
            };
            prop_assert!(value > last);
            prop_assert_eq!(value, clock.current());
            last = value;
        }
    }

    #[test]
    fn test_ranks_unique_and_increasing_property(
        identities in prop::collection::vec("[a-e]{1,2}", 1..40),
        evict_after in 0usize..40
    ) {
        block_on(async {
            let time = Arc::new(ManualTimeSource::new(1_700_000_000.0));
            let mut registry = ServerRegistry::load(Arc::new(MemoryStore::new()), time.clone()).await;
            let mut assigned: std::collections::HashMap<String, u64> = Default::default();
            let mut highest = 0u64;

            for (step, identity) in identities.iter().enumerate() {
                if step == evict_after {
                    time.advance(Duration::from_secs(120));
                    for evicted in registry.evict_stale(1_700_000_120.0, Duration::from_secs(60)).await {
                        assigned.remove(&evicted);
                    }
                }
                let rank = registry.register(identity).await;
                match assigned.get(identity) {
                    // Known and not evicted: same rank
                    Some(previous) => assert_eq!(*previous, rank),
                    // New or re-registered after eviction: strictly above every earlier rank
                    None => {
                        assert!(rank > highest);
                        highest = rank;
                        assigned.insert(identity.clone(), rank);
                    }
                }
            }
            assert_eq!(registry.next_rank(), highest + 1);
        });
    }

    #[test]
    fn test_empty_prefix_matches_any_topic_property(topic in "\\PC*") {
        let mut subs = Subscriptions::new();
        subs.subscribe("");
        prop_assert!(subs.matches(&topic));
    }

    #[test]
    fn test_subscribe_unsubscribe_balance_property(
        prefix in "[a-z]{0,4}",
        times in 1usize..5
    ) {
        let mut subs = Subscriptions::new();
        for _ in 0..times {
            subs.subscribe(&prefix);
        }
        for _ in 0..times {
            let topic = format!("{}tail", prefix);
            prop_assert!(subs.matches(&topic));
            prop_assert!(subs.unsubscribe(&prefix));
        }
        prop_assert!(subs.is_empty());
        prop_assert!(!subs.unsubscribe(&prefix));
    }
}
