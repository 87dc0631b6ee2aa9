use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use bench_api::Workload;
use bench_worker::{DriverRegistry, LocalWorker, Worker};
use driver_loopback::LoopbackDriverFactory;
use workload_engine::rate_control::RateControlConfig;
use workload_engine::{EngineError, WorkloadGenerator};

const DRIVER: &[u8] = br#"
name = "Loopback"
driver = "loopback"

[config]
topic_prefix = "e2e"
publish_delay_micros = 2000
existing_topics = ["orders"]
"#;

fn workload(extra: &str) -> Workload {
    let text = format!(
        r#"
        name = "1-topic-100b"
        partitions_per_topic = 1
        message_size = 100
        use_randomized_payloads = true
        randomized_payload_pool_size = 10
        sample_rate_millis = 500
        {extra}
        "#
    );
    Workload::from_toml(&text).unwrap()
}

async fn local_worker() -> Arc<dyn Worker> {
    let worker: Arc<dyn Worker> =
        Arc::new(LocalWorker::new(DriverRegistry::new().with("loopback", Arc::new(LoopbackDriverFactory))));
    worker.initialize_driver(DRIVER).await.unwrap();
    worker
}

// ─── end to end ───

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fixed_rate_run_produces_latency_report() {
    let worker = local_worker().await;
    let generator = WorkloadGenerator::new("Loopback", workload("topics = 1\nproducer_rate = 1000"), worker)
        .unwrap()
        .with_warmup_duration(Duration::ZERO)
        .with_test_duration(Some(Duration::from_millis(500)));

    let result = generator.run().await.unwrap();

    assert_eq!(result.workload, "1-topic-100b");
    assert_eq!(result.driver, "Loopback");
    assert_eq!(result.topics, 1);
    assert!(result.samples() >= 1);
    assert_eq!(result.consumed.len(), result.sent.len());
    assert_eq!(result.publish_latency.p99.len(), result.samples());
    assert!(result.sent.iter().sum::<u64>() > 0);
    assert!(result.total_sent.windows(2).all(|w| w[0] <= w[1]));
    assert!(result.total_consumed.windows(2).all(|w| w[0] <= w[1]));

    let publish = result.aggregated_publish_latency.as_ref().unwrap();
    assert!(publish.avg.is_finite() && publish.avg > 0.0);
    let e2e = result.aggregated_end_to_end_latency.as_ref().unwrap();
    assert!(e2e.avg.is_finite() && e2e.avg > 0.0);
    assert!(!e2e.quantiles.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rate_discovery_survives_warmup_to_measurement() {
    let worker = local_worker().await;
    let rate_control = RateControlConfig {
        initial_rate: 1_000.0,
        control_period: Duration::from_millis(400),
        ..RateControlConfig::default()
    };
    let generator = WorkloadGenerator::new("Loopback", workload("topics = 1\nproducer_rate = 0"), worker)
        .unwrap()
        .with_rate_control(rate_control)
        .with_warmup_duration(Duration::from_secs(1))
        .with_test_duration(Some(Duration::from_millis(1_500)));

    let result = generator.run().await.unwrap();

    assert!(result.samples() >= 2);
    // the search only moves up from the initial rate on an unconstrained backend
    assert!(
        result.publish_rate.iter().all(|r| *r >= 800.0),
        "publish rates {:?}",
        result.publish_rate
    );
    // warm-up traffic stays in the running totals after the stats reset
    assert!(
        result.total_sent[0] > result.sent[0] + 500,
        "total {} vs period {}",
        result.total_sent[0],
        result.sent[0]
    );
    assert!(result.total_sent.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn existing_topics_consumer_only_run() {
    let worker = local_worker().await;
    let generator = WorkloadGenerator::new(
        "Loopback",
        workload("existing_topic_list = [\"orders\"]\nconsumer_only = true"),
        worker,
    )
    .unwrap()
    .with_warmup_duration(Duration::ZERO)
    .with_test_duration(Some(Duration::from_millis(500)));

    let result = generator.run().await.unwrap();
    assert_eq!(result.topics, 1);
    assert!(result.samples() >= 1);
    assert!(result.sent.iter().all(|s| *s == 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interrupt_ends_unbounded_run_with_aggregates() {
    let worker = local_worker().await;
    let interrupt = CancellationToken::new();
    let generator = WorkloadGenerator::new("Loopback", workload("topics = 1\nproducer_rate = 200"), worker)
        .unwrap()
        .with_warmup_duration(Duration::ZERO)
        .with_test_duration(None)
        .with_interrupt(interrupt.clone());

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        interrupt.cancel();
    });

    let result = generator.run().await.unwrap();
    stopper.await.unwrap();
    assert!(result.samples() >= 1);
    assert!(result.aggregated_publish_latency.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_workload_fails_before_traffic() {
    let worker = local_worker().await;
    let bad = workload("topics = 1\nexisting_topic_list = [\"orders\"]");
    assert!(matches!(
        WorkloadGenerator::new("Loopback", bad, worker.clone()),
        Err(EngineError::Workload(_))
    ));

    let backlog_without_rate = workload("topics = 1\nconsumer_backlog_size_gb = 1");
    assert!(WorkloadGenerator::new("Loopback", backlog_without_rate, worker).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_existing_topic_aborts_run() {
    let worker = local_worker().await;
    let generator = WorkloadGenerator::new("Loopback", workload("existing_topic_list = [\"nope\"]"), worker.clone())
        .unwrap()
        .with_warmup_duration(Duration::ZERO);

    assert!(matches!(generator.run().await, Err(EngineError::Worker(_))));
    // после ошибки worker остановлен и пригоден для следующего прогона
    assert_eq!(worker.get_counters_stats().await.unwrap().messages_sent, 0);
}
