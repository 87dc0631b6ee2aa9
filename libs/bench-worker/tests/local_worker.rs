use std::sync::Arc;
use std::time::Duration;

use bench_api::{ConsumerAssignment, KeyDistributorType, ProducerWorkAssignment, TopicSubscription, TopicsInfo};
use bench_worker::{DriverRegistry, LocalWorker, Worker, WorkerError};
use driver_loopback::LoopbackDriverFactory;

const DRIVER: &[u8] = br#"
name = "Loopback"
driver = "loopback"

[config]
topic_prefix = "it"
existing_topics = ["orders"]
"#;

fn worker() -> LocalWorker {
    LocalWorker::new(DriverRegistry::new().with("loopback", Arc::new(LoopbackDriverFactory)))
}

fn assignment(rate: f64) -> ProducerWorkAssignment {
    ProducerWorkAssignment {
        publish_rate: rate,
        key_distributor: KeyDistributorType::KeyRoundRobin,
        payload_data: vec![vec![1u8; 64], vec![2u8; 64]],
    }
}

async fn wait_until<F: Fn(u64, u64) -> bool>(worker: &LocalWorker, check: F) -> (u64, u64) {
    for _ in 0..200 {
        let c = worker.get_counters_stats().await.unwrap();
        if check(c.messages_sent, c.messages_received) {
            return (c.messages_sent, c.messages_received);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let c = worker.get_counters_stats().await.unwrap();
    (c.messages_sent, c.messages_received)
}

// ─── lifecycle ───

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_before_initialize_fail() {
    let worker = worker();
    let err = worker.create_producers(&["t".to_string()]).await.unwrap_err();
    assert!(matches!(err, WorkerError::NotInitialized));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_driver_is_rejected() {
    let worker = worker();
    let err = worker.initialize_driver(b"name = \"k\"\ndriver = \"kafka\"").await.unwrap_err();
    assert!(matches!(err, WorkerError::UnknownDriver(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn creates_topics_with_prefix_and_index() {
    let worker = worker();
    worker.initialize_driver(DRIVER).await.unwrap();

    let topics = worker
        .create_or_validate_topics(&TopicsInfo::create(3, 2).unwrap())
        .await
        .unwrap();
    assert_eq!(topics.len(), 3);
    assert!(topics[0].starts_with("it-"));
    assert!(topics[2].ends_with("-0002"));

    let existing = TopicsInfo::existing(vec!["orders".into()], vec!["missing".into()]).unwrap();
    assert!(matches!(
        worker.create_or_validate_topics(&existing).await,
        Err(WorkerError::TopicMissing(t)) if t == "missing"
    ));
    worker.stop_all().await;
}

// ─── traffic ───

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_flows_and_pause_holds_consumers() {
    let worker = worker();
    worker.initialize_driver(DRIVER).await.unwrap();
    let topics = worker
        .create_or_validate_topics(&TopicsInfo::create(1, 1).unwrap())
        .await
        .unwrap();
    worker
        .create_consumers(&ConsumerAssignment::new(vec![TopicSubscription::new(&topics[0], "sub-000")]))
        .await
        .unwrap();
    worker.create_producers(&topics).await.unwrap();

    worker.probe_producers().await.unwrap();
    let (sent, received) = wait_until(&worker, |s, r| s >= 1 && r >= 1).await;
    assert_eq!((sent, received), (1, 1));

    worker.reset_stats().await.unwrap();
    worker.start_load(&assignment(500.0)).await.unwrap();
    let (sent, _) = wait_until(&worker, |s, r| s >= 50 && r >= 50).await;
    assert!(sent >= 50);

    let period = worker.get_period_stats().await.unwrap();
    assert!(period.messages_sent > 0);
    assert_eq!(period.bytes_sent, period.messages_sent * 64);
    assert!(period.publish_latency.len() > 0);

    worker.pause_consumers().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = worker.get_counters_stats().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let during = worker.get_counters_stats().await.unwrap();
    assert!(during.messages_sent > before.messages_sent);
    // at most the deliveries already inside the callback slip through
    assert!(during.messages_received <= before.messages_received + 1);

    worker.resume_consumers().await.unwrap();
    let (_, received) = wait_until(&worker, |s, r| r + 10 >= s).await;
    assert!(received > during.messages_received);

    worker.adjust_publish_rate(1000.0).await.unwrap();
    assert!(matches!(
        worker.start_load(&assignment(500.0)).await,
        Err(WorkerError::InvalidCommand(_))
    ));

    worker.stop_all().await;
    worker.stop_all().await;
    assert_eq!(worker.get_counters_stats().await.unwrap().messages_sent, 0);
    assert!(matches!(worker.probe_producers().await, Ok(())));
    worker.close().await;
}

// ─── pacing ───

async fn producing_worker() -> LocalWorker {
    let worker = worker();
    worker.initialize_driver(DRIVER).await.unwrap();
    let topics = worker
        .create_or_validate_topics(&TopicsInfo::create(1, 1).unwrap())
        .await
        .unwrap();
    worker.create_producers(&topics).await.unwrap();
    worker
}

async fn observed_rate(worker: &LocalWorker, window: Duration) -> f64 {
    let before = worker.get_counters_stats().await.unwrap().messages_sent;
    let started = std::time::Instant::now();
    tokio::time::sleep(window).await;
    let after = worker.get_counters_stats().await.unwrap().messages_sent;
    (after - before) as f64 / started.elapsed().as_secs_f64()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_producer_keeps_up_with_high_rate() {
    let worker = producing_worker().await;
    worker.start_load(&assignment(10_000.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let rate = observed_rate(&worker, Duration::from_secs(2)).await;
    assert!(rate >= 9_500.0, "observed {rate:.0} msg/s for 10000 commanded");
    assert!(rate <= 11_000.0, "observed {rate:.0} msg/s for 10000 commanded");
    worker.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn adjusted_rate_is_followed() {
    let worker = producing_worker().await;
    worker.start_load(&assignment(2_000.0)).await.unwrap();
    worker.adjust_publish_rate(5_000.0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let rate = observed_rate(&worker, Duration::from_secs(1)).await;
    assert!((4_750.0..=5_500.0).contains(&rate), "observed {rate:.0} msg/s for 5000 commanded");
    worker.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reset_stats_keeps_running_totals() {
    let worker = producing_worker().await;
    worker.start_load(&assignment(2_000.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let before = worker.get_counters_stats().await.unwrap();
    worker.reset_stats().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let after = worker.get_counters_stats().await.unwrap();

    assert!(before.messages_sent >= 500);
    assert!(after.messages_sent >= before.messages_sent + 500);
    // the interval restarted at the reset, the totals did not
    let period = worker.get_period_stats().await.unwrap();
    assert!(period.messages_sent < after.messages_sent);
    assert!(period.total_messages_sent >= after.messages_sent);

    worker.stop_all().await;
    assert_eq!(worker.get_counters_stats().await.unwrap().messages_sent, 0);
}

// ─── shutdown ───

const SLOW_DRIVER: &[u8] = br#"
name = "Slow loopback"
driver = "loopback"

[config]
publish_delay_micros = 60000000
"#;

#[tokio::test(start_paused = true)]
async fn stop_all_aborts_sends_stuck_past_drain_timeout() {
    let worker = worker();
    worker.initialize_driver(SLOW_DRIVER).await.unwrap();
    let topics = worker
        .create_or_validate_topics(&TopicsInfo::create(1, 1).unwrap())
        .await
        .unwrap();
    worker.create_producers(&topics).await.unwrap();
    worker.start_load(&assignment(100.0)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let started = tokio::time::Instant::now();
    worker.stop_all().await;
    assert!(started.elapsed() < Duration::from_secs(30), "stop took {:?}", started.elapsed());

    // aborted sends never complete, so nothing lands in the fresh counters
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(worker.get_counters_stats().await.unwrap(), Default::default());
    worker.close().await;
}
