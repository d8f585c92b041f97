//! Dispatch order properties: priority first, then FIFO within a priority.

mod support;

use std::sync::Arc;

use chrono::TimeDelta;
use outpost_core::{DispatchConfig, Dispatcher, Priority, Store};
use proptest::prelude::*;
use support::{MockTransport, add_account, queue_message, t0};

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::High),
        Just(Priority::Normal),
        Just(Priority::Low),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn pass_sends_in_priority_then_queued_order(
        entries in prop::collection::vec((priority(), 0i64..50), 1..12)
    ) {
        let sent = tokio_test::block_on(async {
            let store = Store::in_memory().await.unwrap();
            add_account(&store, "sender@example.com", 1000).await;
            for (i, (priority, offset)) in entries.iter().enumerate() {
                queue_message(
                    &store,
                    &format!("r{i}@example.com"),
                    *priority,
                    t0() + TimeDelta::seconds(*offset),
                )
                .await;
            }

            let transport = Arc::new(MockTransport::accepting());
            let dispatcher =
                Dispatcher::new(store, Arc::clone(&transport), DispatchConfig::default()).unwrap();
            dispatcher.run_pass(t0() + TimeDelta::hours(1)).await.unwrap();
            transport.recipients()
        });

        let mut expected: Vec<_> = entries
            .iter()
            .enumerate()
            .map(|(i, (priority, offset))| (*priority, *offset, i))
            .collect();
        expected.sort_unstable();
        let expected: Vec<_> = expected
            .into_iter()
            .map(|(_, _, i)| format!("r{i}@example.com"))
            .collect();

        prop_assert_eq!(sent, expected);
    }

    #[test]
    fn deferred_entries_wait_regardless_of_priority(
        ready in priority(),
        deferred in priority(),
    ) {
        let order = tokio_test::block_on(async {
            let store = Store::in_memory().await.unwrap();
            let queue = store.queue();
            queue_message(&store, "deferred@example.com", deferred, t0()).await;
            queue_message(&store, "ready@example.com", ready, t0() + TimeDelta::seconds(1)).await;

            let first = queue.list().await.unwrap();
            let target = first
                .iter()
                .find(|e| e.queued_at == t0())
                .unwrap()
                .id;
            queue
                .defer(target, t0(), std::time::Duration::from_secs(600))
                .await
                .unwrap();

            queue.next_ready(t0() + TimeDelta::seconds(5)).await.unwrap().map(|e| e.queued_at)
        });

        prop_assert_eq!(order, Some(t0() + TimeDelta::seconds(1)));
    }
}
