//! End-to-end behaviour of accumulator, aggregator and publisher against the
//! in-memory store.

use std::sync::Arc;
use std::time::Duration;

use trendcast_core::{Observation, ObservationMessage, TrendRecord, WindowPolicy};
use trendcast_engine::{
    Accumulator, AccumulatorSettings, PublisherSettings, Shutdown, TrendPublisher,
    WindowAggregator,
};
use trendcast_store::{MemoryStore, MergeOutcome, StatsStore};

struct Harness {
    store: Arc<MemoryStore>,
    accumulator: Accumulator,
    aggregator: WindowAggregator,
    publisher: Arc<TrendPublisher>,
}

fn harness(policy: WindowPolicy) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let settings = AccumulatorSettings {
        backoff_base_ms: 0,
        ..AccumulatorSettings::default()
    };
    Harness {
        accumulator: Accumulator::new(store.clone(), settings),
        aggregator: WindowAggregator::new(store.clone(), policy),
        publisher: Arc::new(TrendPublisher::new(
            store.clone(),
            PublisherSettings::default(),
        )),
        store,
    }
}

fn record(theme: &str, mentions: i64, average_sentiment: f64) -> TrendRecord {
    TrendRecord {
        theme: theme.to_string(),
        mentions,
        average_sentiment,
    }
}

async fn seed_housing_and_roads(h: &Harness) {
    for (theme, score) in [("Housing", 4), ("Housing", 2), ("Roads", 5)] {
        h.accumulator
            .merge(&Observation::new(theme, score, 0))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn pass_inside_window_ranks_by_mentions() {
    let h = harness(WindowPolicy::tumbling(60).unwrap());
    seed_housing_and_roads(&h).await;

    h.aggregator.run_pass(10).await.unwrap();
    let view = h.publisher.current_view().await.unwrap();
    assert_eq!(
        view.records,
        vec![record("Housing", 2, 3.0), record("Roads", 1, 5.0)]
    );
}

#[tokio::test]
async fn pass_after_window_empties_view_and_deletes_stats() {
    let h = harness(WindowPolicy::tumbling(60).unwrap());
    seed_housing_and_roads(&h).await;

    let result = h.aggregator.run_pass(65).await.unwrap();
    assert_eq!(result.evicted, 2);
    assert!(h.publisher.current_view().await.unwrap().is_empty());
    assert_eq!(h.store.stats_len().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_merges_lose_no_updates() {
    let h = harness(WindowPolicy::session(120).unwrap());
    let mut tasks = Vec::new();
    for i in 0..100_i64 {
        let acc = h.accumulator.clone();
        tasks.push(tokio::spawn(async move {
            acc.merge(&Observation::new("Transit", i % 5 + 1, 0)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let expected_total: i64 = (0..100_i64).map(|i| i % 5 + 1).sum();
    let stats = h
        .store
        .theme_stats(&["Transit".to_string()])
        .await
        .unwrap()
        .pop()
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stats.mention_count, 100);
    assert_eq!(stats.total_sentiment, expected_total);
}

#[tokio::test]
async fn tumbling_window_boundary_is_inclusive() {
    let h = harness(WindowPolicy::tumbling(60).unwrap());
    h.accumulator
        .merge(&Observation::new("Parks", 3, 1_000))
        .await
        .unwrap();

    let at_edge = h.aggregator.run_pass(1_060).await.unwrap();
    assert_eq!(at_edge.ranked, 1);

    let past_edge = h.aggregator.run_pass(1_061).await.unwrap();
    assert_eq!(past_edge.ranked, 0);
    assert_eq!(past_edge.evicted, 1);
}

#[tokio::test]
async fn session_survives_steady_activity_and_expires_after_silence() {
    let h = harness(WindowPolicy::session(120).unwrap());
    for step in 0..10_i64 {
        let t = step * 30;
        h.accumulator
            .merge(&Observation::new("Schools", 4, t))
            .await
            .unwrap();
        let result = h.aggregator.run_pass(t + 29).await.unwrap();
        assert_eq!(result.evicted, 0, "evicted during steady activity at t={t}");
    }

    // Last observation at t=270.
    let still_active = h.aggregator.run_pass(390).await.unwrap();
    assert_eq!(still_active.ranked, 1);
    let expired = h.aggregator.run_pass(391).await.unwrap();
    assert_eq!(expired.evicted, 1);
    assert!(h.store.ranked().await.unwrap().is_empty());
}

#[tokio::test]
async fn ranking_is_descending_by_mentions() {
    let h = harness(WindowPolicy::session(120).unwrap());
    for (theme, count) in [("Low", 1), ("High", 5), ("Mid", 3)] {
        for _ in 0..count {
            h.accumulator
                .merge(&Observation::new(theme, 3, 0))
                .await
                .unwrap();
        }
    }
    h.aggregator.run_pass(0).await.unwrap();
    let view = h.publisher.current_view().await.unwrap();
    assert_eq!(view.themes(), vec!["High", "Mid", "Low"]);
}

#[tokio::test]
async fn replayed_message_counts_once() {
    let h = harness(WindowPolicy::session(120).unwrap());
    let message = ObservationMessage::parse(
        r#"{"id":"msg-7","observedAt":50,"themes":{"Housing":4,"Roads":2}}"#,
    )
    .unwrap();

    let first = h.accumulator.merge_message(message.clone(), 99).await;
    assert_eq!(first.applied, 2);
    let replay = h.accumulator.merge_message(message, 99).await;
    assert_eq!(replay.duplicates, 2);

    let outcome = h
        .accumulator
        .merge(&Observation::new("Housing", 4, 50).with_id("msg-7:Housing"))
        .await
        .unwrap();
    assert_eq!(outcome, MergeOutcome::Duplicate);

    h.aggregator.run_pass(60).await.unwrap();
    let view = h.publisher.current_view().await.unwrap();
    assert_eq!(
        view.records,
        vec![record("Housing", 1, 4.0), record("Roads", 1, 2.0)]
    );
}

#[tokio::test]
async fn far_future_event_time_cannot_pin_a_theme_in_the_window() {
    let h = harness(WindowPolicy::session(120).unwrap());
    let message =
        ObservationMessage::parse(r#"{"observedAt":9000000000000,"themes":{"Spam":5}}"#)
            .unwrap();
    let report = h.accumulator.merge_message(message, 100).await;
    assert_eq!(report.applied, 1);

    let later = h.aggregator.run_pass(10_000_100).await.unwrap();
    assert_eq!(later.evicted, 1);
    assert_eq!(later.ranked, 0);
    assert_eq!(h.store.stats_len().await, 0);
}

#[tokio::test]
async fn mid_stream_subscriber_receives_current_view_then_updates() {
    let h = harness(WindowPolicy::tumbling(60).unwrap());
    let (trigger, shutdown) = Shutdown::channel();
    let running = tokio::spawn(Arc::clone(&h.publisher).run(shutdown));

    seed_housing_and_roads(&h).await;
    h.aggregator.run_pass(10).await.unwrap();
    // Let the publisher drain the change notification.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (initial, mut updates) = h.publisher.on_subscriber_connect().await.unwrap();
    assert_eq!(initial.themes(), vec!["Housing", "Roads"]);

    for _ in 0..2 {
        h.accumulator
            .merge(&Observation::new("Roads", 1, 5))
            .await
            .unwrap();
    }
    h.aggregator.run_pass(10).await.unwrap();

    let pushed = tokio::time::timeout(Duration::from_secs(2), updates.recv())
        .await
        .expect("update should be pushed")
        .unwrap();
    assert_eq!(
        pushed.records,
        vec![record("Roads", 3, 7.0 / 3.0), record("Housing", 2, 3.0)]
    );

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("publisher should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn burst_of_dirty_marks_coalesces() {
    let h = harness(WindowPolicy::session(120).unwrap());
    let (trigger, shutdown) = Shutdown::channel();
    let running = tokio::spawn(Arc::clone(&h.publisher).run(shutdown));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let before = h.publisher.recompute_count();
    for _ in 0..50 {
        h.publisher.mark_dirty();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    let recomputes = h.publisher.recompute_count() - before;
    assert!(
        (1..=2).contains(&recomputes),
        "expected 1 or 2 recomputes, got {recomputes}"
    );

    trigger.trigger();
    running.await.unwrap();
}
