use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bench_api::util::{now_nanos, random_name};
use bench_api::{
    BenchmarkConsumer, BenchmarkDriver, BenchmarkProducer, ConsumerAssignment, ConsumerCallback,
    CountersStats, CumulativeLatencies, KeyDistributor, KeyDistributorType, PeriodStats,
    ProducerWorkAssignment, TopicsInfo,
};
use rate_limiter::RateLimiter;

use crate::error::WorkerError;
use crate::registry::{DriverConfiguration, DriverRegistry};
use crate::stats::WorkerStats;
use crate::{Worker, WorkerFuture};

/// Сколько асинхронных отправок может висеть одновременно на узле.
pub const MAX_OUTSTANDING_SENDS: usize = 10_000;

/// Сколько ждать подтверждения висящих отправок при остановке.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

const PROBE_PAYLOAD_SIZE: usize = 10;

/// Worker, работающий с драйвером в этом же процессе.
///
/// Используется напрямую при локальном запуске и как исполнитель
/// команд на каждом удалённом узле (за HTTP сервером).
pub struct LocalWorker {
    registry: DriverRegistry,
    stats: Arc<WorkerStats>,
    paused: watch::Sender<bool>,
    callback: Arc<dyn ConsumerCallback>,
    state: Mutex<LocalState>,
}

#[derive(Default)]
struct LocalState {
    driver: Option<Arc<dyn BenchmarkDriver>>,
    producers: Vec<Arc<dyn BenchmarkProducer>>,
    consumers: Vec<Box<dyn BenchmarkConsumer>>,
    load: Option<LoadSession>,
}

/// Запущенная нагрузка: общий limiter и producer loop'ы.
///
/// `token` останавливает loop'ы, `abort` (его родитель) обрывает
/// отправки, не успевшие завершиться за [`DRAIN_TIMEOUT`].
struct LoadSession {
    limiter: Arc<RateLimiter>,
    in_flight: Arc<Semaphore>,
    token: CancellationToken,
    abort: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl LoadSession {
    async fn stop(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "producer loop panicked");
            }
        }
        let all = MAX_OUTSTANDING_SENDS as u32;
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, self.in_flight.acquire_many(all)).await;
        if drained.is_err() {
            let abandoned = MAX_OUTSTANDING_SENDS - self.in_flight.available_permits();
            tracing::warn!(abandoned, "outstanding sends did not complete before stop, aborting them");
            self.abort.cancel();
            // отменённые отправки сразу возвращают permit'ы
            let _ = self.in_flight.acquire_many(all).await;
        }
    }
}

impl LocalWorker {
    pub fn new(registry: DriverRegistry) -> Self {
        let stats = Arc::new(WorkerStats::new());
        let (paused, paused_rx) = watch::channel(false);
        let callback = Arc::new(StatsCallback { stats: stats.clone(), paused: paused_rx });
        Self {
            registry,
            stats,
            paused,
            callback,
            state: Mutex::new(LocalState::default()),
        }
    }

    async fn driver(&self) -> Result<Arc<dyn BenchmarkDriver>, WorkerError> {
        self.state.lock().await.driver.clone().ok_or(WorkerError::NotInitialized)
    }

    async fn do_initialize_driver(&self, raw: &[u8]) -> Result<(), WorkerError> {
        let header = DriverConfiguration::parse(raw)?;
        let factory = self.registry.get(&header.driver)?;
        let driver = factory.initialize(raw).await?;
        tracing::info!(name = %header.name, driver = %header.driver, "initialized driver");

        let previous = self.state.lock().await.driver.replace(driver);
        if let Some(old) = previous {
            if let Err(e) = old.close().await {
                tracing::warn!(error = %e, "closing previous driver");
            }
        }
        Ok(())
    }

    async fn do_create_topics(&self, info: &TopicsInfo) -> Result<Vec<String>, WorkerError> {
        let driver = self.driver().await?;
        match info {
            TopicsInfo::Create { number_of_topics, partitions_per_topic } => {
                let prefix = driver.topic_name_prefix();
                let tag = random_name(7);
                let names: Vec<String> = (0..*number_of_topics)
                    .map(|i| format!("{prefix}-{tag}-{i:04}"))
                    .collect();

                let started = Instant::now();
                try_join_all(names.iter().map(|t| driver.create_topic(t, *partitions_per_topic))).await?;
                tracing::info!(
                    count = names.len(),
                    partitions = partitions_per_topic,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "created topics"
                );
                Ok(names)
            }
            TopicsInfo::Existing { produce_topics, consume_topics } => {
                let mut all: Vec<String> = produce_topics.iter().chain(consume_topics).cloned().collect();
                all.sort();
                all.dedup();
                for topic in &all {
                    if !driver.validate_topic_exists(topic).await? {
                        return Err(WorkerError::TopicMissing(topic.clone()));
                    }
                }
                tracing::info!(count = all.len(), "validated existing topics");
                Ok(all)
            }
        }
    }

    async fn do_create_producers(&self, topics: &[String]) -> Result<(), WorkerError> {
        let driver = self.driver().await?;
        let started = Instant::now();
        let producers = try_join_all(topics.iter().map(|t| driver.create_producer(t))).await?;
        tracing::info!(
            count = producers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "created producers"
        );
        self.state.lock().await.producers.extend(producers);
        Ok(())
    }

    async fn do_create_consumers(&self, assignment: &ConsumerAssignment) -> Result<(), WorkerError> {
        let driver = self.driver().await?;
        let started = Instant::now();
        let consumers = try_join_all(assignment.topics_subscriptions.iter().map(|ts| {
            driver.create_consumer(&ts.topic, &ts.subscription, self.callback.clone())
        }))
        .await?;
        tracing::info!(
            count = consumers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "created consumers"
        );
        self.state.lock().await.consumers.extend(consumers);
        Ok(())
    }

    async fn do_probe_producers(&self) -> Result<(), WorkerError> {
        let producers = self.state.lock().await.producers.clone();
        let payload: Arc<[u8]> = Arc::from(vec![0u8; PROBE_PAYLOAD_SIZE]);
        try_join_all(producers.iter().map(|producer| {
            let payload = payload.clone();
            async move {
                producer.send_async(Some("key".to_string()), payload).await?;
                self.stats.record_message_sent();
                Ok::<_, WorkerError>(())
            }
        }))
        .await?;
        tracing::info!(count = producers.len(), "probed producers");
        Ok(())
    }

    async fn do_start_load(&self, assignment: &ProducerWorkAssignment) -> Result<(), WorkerError> {
        let mut state = self.state.lock().await;
        if state.load.is_some() {
            return Err(WorkerError::InvalidCommand("load is already running".into()));
        }
        if state.producers.is_empty() {
            tracing::info!("no producers on this node, nothing to start");
            return Ok(());
        }
        if assignment.payload_data.is_empty() {
            return Err(WorkerError::InvalidCommand("empty payload pool".into()));
        }

        let limiter = Arc::new(RateLimiter::create(assignment.publish_rate)?);
        let payloads: Arc<Vec<Arc<[u8]>>> = Arc::new(
            assignment.payload_data.iter().map(|p| Arc::from(p.as_slice())).collect(),
        );
        let in_flight = Arc::new(Semaphore::new(MAX_OUTSTANDING_SENDS));
        let abort = CancellationToken::new();
        let token = abort.child_token();

        let loops = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(state.producers.len());
        let groups = crate::partition::round_robin(&state.producers, loops);

        let handles = groups
            .into_iter()
            .map(|producers| {
                tokio::spawn(run_producers(ProducerLoop {
                    producers,
                    limiter: limiter.clone(),
                    payloads: payloads.clone(),
                    key_distributor: assignment.key_distributor,
                    stats: self.stats.clone(),
                    in_flight: in_flight.clone(),
                    token: token.clone(),
                    abort: abort.clone(),
                }))
            })
            .collect();

        tracing::info!(
            rate = assignment.publish_rate,
            producers = state.producers.len(),
            loops,
            payloads = payloads.len(),
            "started load"
        );
        state.load = Some(LoadSession { limiter, in_flight, token, abort, handles });
        Ok(())
    }

    async fn do_adjust_publish_rate(&self, publish_rate: f64) -> Result<(), WorkerError> {
        let state = self.state.lock().await;
        match &state.load {
            Some(load) => {
                load.limiter.set_rate(publish_rate)?;
                tracing::debug!(rate = publish_rate, "adjusted publish rate");
            }
            None => tracing::debug!(rate = publish_rate, "no load running, rate ignored"),
        }
        Ok(())
    }

    async fn do_stop_all(&self) {
        let mut state = self.state.lock().await;
        self.paused.send_replace(false);

        if let Some(load) = state.load.take() {
            load.stop().await;
        }
        for producer in state.producers.drain(..) {
            if let Err(e) = producer.close().await {
                tracing::warn!(error = %e, "closing producer");
            }
        }
        for consumer in state.consumers.drain(..) {
            if let Err(e) = consumer.close().await {
                tracing::warn!(error = %e, "closing consumer");
            }
        }
        if let Some(driver) = state.driver.take() {
            if let Err(e) = driver.close().await {
                tracing::warn!(error = %e, "closing driver");
            }
            tracing::info!("stopped all producers and consumers");
        }
        self.stats.reset();
    }
}

impl Worker for LocalWorker {
    fn initialize_driver<'a>(&'a self, driver_config: &'a [u8]) -> WorkerFuture<'a, ()> {
        Box::pin(self.do_initialize_driver(driver_config))
    }

    fn create_or_validate_topics<'a>(&'a self, topics: &'a TopicsInfo) -> WorkerFuture<'a, Vec<String>> {
        Box::pin(self.do_create_topics(topics))
    }

    fn create_producers<'a>(&'a self, topics: &'a [String]) -> WorkerFuture<'a, ()> {
        Box::pin(self.do_create_producers(topics))
    }

    fn create_consumers<'a>(&'a self, assignment: &'a ConsumerAssignment) -> WorkerFuture<'a, ()> {
        Box::pin(self.do_create_consumers(assignment))
    }

    fn probe_producers(&self) -> WorkerFuture<'_, ()> {
        Box::pin(self.do_probe_producers())
    }

    fn start_load<'a>(&'a self, assignment: &'a ProducerWorkAssignment) -> WorkerFuture<'a, ()> {
        Box::pin(self.do_start_load(assignment))
    }

    fn adjust_publish_rate(&self, publish_rate: f64) -> WorkerFuture<'_, ()> {
        Box::pin(self.do_adjust_publish_rate(publish_rate))
    }

    fn pause_consumers(&self) -> WorkerFuture<'_, ()> {
        Box::pin(async move {
            self.paused.send_replace(true);
            tracing::info!("paused consumers");
            Ok(())
        })
    }

    fn resume_consumers(&self) -> WorkerFuture<'_, ()> {
        Box::pin(async move {
            self.paused.send_replace(false);
            tracing::info!("resumed consumers");
            Ok(())
        })
    }

    fn reset_stats(&self) -> WorkerFuture<'_, ()> {
        Box::pin(async move {
            self.stats.reset_latencies();
            Ok(())
        })
    }

    fn get_period_stats(&self) -> WorkerFuture<'_, PeriodStats> {
        Box::pin(async move { Ok(self.stats.to_period_stats()) })
    }

    fn get_cumulative_latencies(&self) -> WorkerFuture<'_, CumulativeLatencies> {
        Box::pin(async move { Ok(self.stats.to_cumulative_latencies()) })
    }

    fn get_counters_stats(&self) -> WorkerFuture<'_, CountersStats> {
        Box::pin(async move { Ok(self.stats.to_counters_stats()) })
    }

    fn stop_all(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.do_stop_all())
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.do_stop_all())
    }
}

// ════════════════════════════════════════════════════════════════
//  Producer loop
// ════════════════════════════════════════════════════════════════

struct ProducerLoop {
    producers: Vec<Arc<dyn BenchmarkProducer>>,
    limiter: Arc<RateLimiter>,
    payloads: Arc<Vec<Arc<[u8]>>>,
    key_distributor: KeyDistributorType,
    stats: Arc<WorkerStats>,
    in_flight: Arc<Semaphore>,
    token: CancellationToken,
    abort: CancellationToken,
}

/// Крутится по своим producer'ам, на каждую отправку берёт permit у
/// общего limiter'а. Отправка уходит в отдельную task'у, loop не ждёт
/// подтверждения.
///
/// Таймер tokio тикает по 1 ms, поэтому спим только при ненулевом
/// ожидании: проспанное сверх нужного limiter отдаёт накопленными
/// permit'ами с нулевым ожиданием, и средний rate держится выше 1k/s.
async fn run_producers(ctx: ProducerLoop) {
    let ProducerLoop { producers, limiter, payloads, key_distributor, stats, in_flight, token, abort } = ctx;
    let mut keys = KeyDistributor::build(key_distributor);
    let mut rng = StdRng::from_os_rng();

    'outer: loop {
        for producer in &producers {
            let wait = match limiter.reserve(1) {
                Ok(wait) => wait,
                Err(e) => {
                    tracing::error!(error = %e, "rate limiter rejected reservation");
                    break 'outer;
                }
            };
            let intended = Instant::now() + wait;
            if !wait.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => break 'outer,
                    _ = tokio::time::sleep_until(intended) => {}
                }
            }

            let permit = tokio::select! {
                _ = token.cancelled() => break 'outer,
                permit = in_flight.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break 'outer,
                },
            };

            let payload = payloads[rng.random_range(0..payloads.len())].clone();
            let key = keys.next_key();
            let producer = producer.clone();
            let stats = stats.clone();
            let abort = abort.clone();
            let send_time = Instant::now();

            tokio::spawn(async move {
                let _permit = permit;
                let bytes = payload.len();
                let send = producer.send_async(key, payload);
                let scheduled = Instant::now();
                let sent = tokio::select! {
                    _ = abort.cancelled() => return,
                    sent = send => sent,
                };
                match sent {
                    Ok(()) => {
                        let done = Instant::now();
                        stats.record_producer_success(
                            bytes,
                            micros(done.saturating_duration_since(send_time)),
                            micros(scheduled.saturating_duration_since(send_time)),
                            micros(send_time.saturating_duration_since(intended)),
                        );
                    }
                    Err(e) => {
                        stats.record_producer_failure();
                        tracing::debug!(error = %e, "send failed");
                    }
                }
            });
        }
    }
    tracing::debug!(producers = producers.len(), "producer loop finished");
}

fn micros(d: Duration) -> u64 {
    d.as_micros() as u64
}

// ════════════════════════════════════════════════════════════════
//  Consumer callback
// ════════════════════════════════════════════════════════════════

/// Считает полученные сообщения. Пока consumer'ы на паузе, future
/// не завершается и драйвер перестаёт забирать сообщения.
struct StatsCallback {
    stats: Arc<WorkerStats>,
    paused: watch::Receiver<bool>,
}

impl ConsumerCallback for StatsCallback {
    fn message_received<'a>(
        &'a self,
        payload: &'a [u8],
        publish_timestamp_nanos: i64,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let is_paused = *self.paused.borrow();
            if is_paused {
                let mut paused = self.paused.clone();
                // Err means the worker is gone, nothing left to wait for.
                let _ = paused.wait_for(|p| !*p).await;
            }
            let end_to_end = (now_nanos() - publish_timestamp_nanos) / 1_000;
            self.stats.record_message_received(payload.len(), end_to_end);
        })
    }

    fn error(&self) {
        self.stats.record_poll_error();
    }
}
