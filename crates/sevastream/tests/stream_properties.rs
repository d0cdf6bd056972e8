//! End-to-end behaviour of the engine through its public API.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sevastream_core::{
    EngineConfig, FeePolicy, Outcome, SchedulerBuilder, StreamError, StreamEvent, StreamRequest,
    StreamState,
};
use sevastream_testing::{EventCollector, GatedExecutor, MockExecutor};
use tokio::time;

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_three_successful_ticks() {
    let executor = Arc::new(MockExecutor::succeeding());
    let scheduler = SchedulerBuilder::new(executor.clone()).build();

    let id = scheduler.start_stream(Decimal::from(8), 10, "cause-1").unwrap();
    time::sleep(Duration::from_secs(35)).await;

    let stream = scheduler.get_stream(id).unwrap();
    assert_eq!(stream.total_sent, Decimal::from(24));
    assert_eq!(stream.success_count, 3);
    assert_eq!(stream.state, StreamState::Active);

    let requests = executor.requests_for(id);
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.recipient == "cause-1"));
    assert!(requests.iter().all(|r| r.amount == Decimal::from(8)));
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failure_on_second_tick_is_transient() {
    let scheduler = SchedulerBuilder::new(MockExecutor::failing_on_ticks([2])).build();
    let mut events = EventCollector::new(scheduler.subscribe());

    let id = scheduler.start_stream(Decimal::from(10), 5, "cause-2").unwrap();
    time::sleep(Duration::from_secs(17)).await;

    let stream = scheduler.get_stream(id).unwrap();
    assert_eq!(stream.tick_count, 3);
    assert_eq!(stream.success_count, 2);
    assert_eq!(stream.total_sent, Decimal::from(20));
    assert_eq!(stream.state, StreamState::Active);

    let outcomes: Vec<Outcome> = events.payments_for(id).iter().map(|p| p.outcome).collect();
    assert_eq!(outcomes, vec![Outcome::Success, Outcome::Failure, Outcome::Success]);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_zero_amount_is_rejected() {
    let executor = Arc::new(MockExecutor::succeeding());
    let scheduler = SchedulerBuilder::new(executor.clone()).build();
    let mut events = EventCollector::new(scheduler.subscribe());

    let result = scheduler.start_stream(Decimal::ZERO, 10, "cause-1");

    assert!(matches!(result, Err(StreamError::InvalidParameter(_))));
    assert!(scheduler.list_active_streams().is_empty());
    assert!(events.collect().is_empty());
    assert_eq!(executor.call_count(), 0);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_accounting_invariant_at_every_observation() {
    let scheduler = SchedulerBuilder::new(MockExecutor::failing_on_ticks([1, 4, 5, 9])).build();
    let ids: Vec<_> = (1..=4)
        .map(|i| {
            scheduler
                .start_stream(Decimal::new(i * 125, 2), i as u64, format!("cause-{i}"))
                .unwrap()
        })
        .collect();

    for _ in 0..40 {
        time::sleep(Duration::from_millis(700)).await;
        for id in &ids {
            let s = scheduler.get_stream(*id).unwrap();
            assert!(s.success_count <= s.tick_count);
            assert_eq!(s.total_sent, s.amount * Decimal::from(s.success_count));
        }
    }
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_always_declined_stream_keeps_ticking() {
    let executor = Arc::new(MockExecutor::failing());
    let scheduler = SchedulerBuilder::new(executor.clone()).build();

    let id = scheduler.start_stream(Decimal::from(8), 10, "cause-1").unwrap();
    time::sleep(Duration::from_secs(45)).await;

    let stream = scheduler.get_stream(id).unwrap();
    assert_eq!(stream.state, StreamState::Active);
    assert_eq!(stream.tick_count, 4);
    assert_eq!(stream.success_count, 0);
    assert_eq!(stream.total_sent, Decimal::ZERO);
    assert_eq!(executor.call_count(), 4);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_subscriber_starts_from_snapshot() {
    let scheduler = SchedulerBuilder::new(MockExecutor::succeeding()).build();
    let running = scheduler.start_stream(Decimal::from(8), 10, "cause-1").unwrap();
    let stopped = scheduler.start_stream(Decimal::from(3), 10, "cause-2").unwrap();
    time::sleep(Duration::from_secs(25)).await;
    scheduler.stop_stream(stopped).await.unwrap();

    let mut events = EventCollector::new(scheduler.subscribe());
    let snapshot = &events.subscription().snapshot;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, running);
    assert_eq!(snapshot[0].tick_count, 2);

    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(events.ticks_for(running), vec![3]);
    assert!(events.for_stream(stopped).is_empty());
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_recipient_is_isolated() {
    let scheduler =
        SchedulerBuilder::new(MockExecutor::failing_for_recipients(["cause-broken"])).build();

    let a = scheduler.start_stream(Decimal::from(5), 10, "cause-broken").unwrap();
    let b = scheduler.start_stream(Decimal::from(5), 10, "cause-healthy").unwrap();
    time::sleep(Duration::from_secs(55)).await;

    let a = scheduler.get_stream(a).unwrap();
    let b = scheduler.get_stream(b).unwrap();
    assert_eq!(a.success_count, 0);
    assert_eq!(a.tick_count, 5);
    assert_eq!(b.success_count, 5);
    assert_eq!(b.total_sent, Decimal::from(25));

    let stats = scheduler.stats().stream_stats(a.id).unwrap();
    assert_eq!(stats.success_rate, 0.0);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_racing_an_in_flight_tick() {
    let executor = GatedExecutor::new();
    let scheduler = SchedulerBuilder::new(executor.clone()).build();
    let mut events = EventCollector::new(scheduler.subscribe());

    let id = scheduler.start_stream(Decimal::from(8), 1, "cause-1").unwrap();
    executor.wait_entered().await;
    assert_eq!(executor.in_flight(), 1);

    let stop = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.stop_stream(id).await })
    };
    tokio::task::yield_now().await;
    executor.release(1);
    stop.await.unwrap().unwrap();

    let observed = scheduler.get_stream(id).unwrap();
    assert_eq!(observed.state, StreamState::Stopped);

    executor.release(10);
    time::sleep(Duration::from_secs(10)).await;

    let later = scheduler.get_stream(id).unwrap();
    assert_eq!(later.tick_count, observed.tick_count);
    assert_eq!(executor.in_flight(), 0);
    assert_eq!(events.types_for(id), vec!["started", "payment", "stopped"]);
}

#[tokio::test(start_paused = true)]
async fn test_double_stop_matches_single_stop() {
    let scheduler = SchedulerBuilder::new(MockExecutor::succeeding()).build();
    let mut events = EventCollector::new(scheduler.subscribe());
    let id = scheduler.start_stream(Decimal::from(8), 10, "cause-1").unwrap();
    time::sleep(Duration::from_secs(21)).await;

    scheduler.stop_stream(id).await.unwrap();
    let first = scheduler.get_stream(id).unwrap();
    scheduler.stop_stream(id).await.unwrap();

    assert_eq!(scheduler.get_stream(id).unwrap(), first);
    let stopped = events
        .for_stream(id)
        .iter()
        .filter(|e| matches!(e, StreamEvent::Stopped(_)))
        .count();
    assert_eq!(stopped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_early_subscriber_sees_tick_order() {
    let scheduler = SchedulerBuilder::new(MockExecutor::failing_on_ticks([3])).build();
    let mut events = EventCollector::new(scheduler.subscribe());

    let x = scheduler.start_stream(Decimal::from(3), 2, "cause-x").unwrap();
    let y = scheduler.start_stream(Decimal::from(4), 3, "cause-y").unwrap();
    time::sleep(Duration::from_secs(31)).await;

    assert_eq!(events.ticks_for(x), (1..=15).collect::<Vec<_>>());
    assert_eq!(events.ticks_for(y), (1..=10).collect::<Vec<_>>());
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_events_serialize_for_dashboards() {
    let scheduler = SchedulerBuilder::new(MockExecutor::succeeding())
        .with_config(EngineConfig {
            fee_policy: FeePolicy::AID_REQUEST,
            ..EngineConfig::default()
        })
        .build();
    let mut events = EventCollector::new(scheduler.subscribe());

    scheduler.start_stream(Decimal::from(100), 10, "cause-1").unwrap();
    time::sleep(Duration::from_secs(11)).await;

    let json = events.to_json();
    let payment = json.iter().find(|e| e["type"] == "payment").unwrap();
    assert_eq!(payment["amount"], "100");
    assert_eq!(payment["fee"], "2.00");
    assert_eq!(payment["outcome"], "success");
    assert_eq!(payment["tick"], 1);
    assert!(payment["receipt"].as_str().unwrap().starts_with("mock-"));
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bounded_stream_request() {
    let scheduler = SchedulerBuilder::new(MockExecutor::failing_on_ticks([2])).build();
    let mut events = EventCollector::new(scheduler.subscribe());

    let request =
        StreamRequest::new(Decimal::from(10), 5, "cause-1").with_target_total(Decimal::from(30));
    let id = scheduler.start(request).unwrap();
    time::sleep(Duration::from_secs(60)).await;

    let stream = scheduler.get_stream(id).unwrap();
    assert_eq!(stream.state, StreamState::Completed);
    assert_eq!(stream.tick_count, 4);
    assert_eq!(stream.total_sent, Decimal::from(30));
    assert_eq!(events.types_for(id).last(), Some(&"completed"));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_failure_moves_stream_to_failed() {
    let scheduler = SchedulerBuilder::new(MockExecutor::failing_fatally()).build();
    let id = scheduler.start_stream(Decimal::from(10), 5, "cause-1").unwrap();
    time::sleep(Duration::from_secs(30)).await;

    let stream = scheduler.get_stream(id).unwrap();
    assert_eq!(stream.state, StreamState::Failed);
    assert_eq!(stream.tick_count, 1);
    assert!(scheduler.list_active_streams().is_empty());
}
