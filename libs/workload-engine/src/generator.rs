use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bench_api::util::random_name;
use bench_api::{ConsumerAssignment, ProducerWorkAssignment, TopicSubscription, TopicsInfo, Workload};
use bench_worker::{Worker, WorkerError};

use crate::backlog::{BacklogPlan, build_and_drain};
use crate::error::EngineError;
use crate::payload;
use crate::rate_control::{RateControlConfig, run_rate_controller};
use crate::result::TestResult;
use crate::sampler::Sampler;

/// Сколько ждать, пока consumer'ы получат пробные сообщения.
pub const READY_TIMEOUT: Duration = Duration::from_secs(60);
const READY_POLL: Duration = Duration::from_millis(100);

/// Прогон одного workload'а на уже выбранной топологии worker'ов.
///
/// Фазы: topic'и → consumer'ы/producer'ы → проверка готовности →
/// нагрузка → warm-up → [backlog] → замер. Фоновые задачи (поиск rate'а,
/// backlog) живут только внутри [`run`](Self::run) и всегда
/// дожидаются перед возвратом.
pub struct WorkloadGenerator {
    driver_name: String,
    workload: Workload,
    worker: Arc<dyn Worker>,
    rate_control: RateControlConfig,
    warmup: Duration,
    test: Option<Duration>,
    ready_timeout: Duration,
    interrupt: CancellationToken,
}

impl WorkloadGenerator {
    pub fn new(driver_name: impl Into<String>, workload: Workload, worker: Arc<dyn Worker>) -> Result<Self, EngineError> {
        workload.validate()?;
        let warmup = Duration::from_secs(workload.warmup_duration_minutes * 60);
        let test = match workload.test_duration_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(minutes * 60)),
        };
        Ok(Self {
            driver_name: driver_name.into(),
            workload,
            worker,
            rate_control: RateControlConfig::default(),
            warmup,
            test,
            ready_timeout: READY_TIMEOUT,
            interrupt: CancellationToken::new(),
        })
    }

    pub fn with_warmup_duration(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// `None` = до прерывания.
    pub fn with_test_duration(mut self, test: Option<Duration>) -> Self {
        self.test = test;
        self
    }

    pub fn with_rate_control(mut self, config: RateControlConfig) -> Self {
        self.rate_control = config;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Отмена этого токена (Ctrl-C) завершает текущую фазу штатно.
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub async fn run(&self) -> Result<TestResult, EngineError> {
        let completed = self.interrupt.child_token();
        let mut tasks = BackgroundTasks::default();

        let outcome = self.run_phases(&completed, &mut tasks).await;

        completed.cancel();
        tasks.join().await;
        self.worker.stop_all().await;
        outcome
    }

    async fn run_phases(
        &self,
        completed: &CancellationToken,
        tasks: &mut BackgroundTasks,
    ) -> Result<TestResult, EngineError> {
        let w = &self.workload;

        // ─── topics ───
        let info = TopicsInfo::from_workload(w)?;
        let started = Instant::now();
        let topics = self.worker.create_or_validate_topics(&info).await?;
        tracing::info!(
            topics = topics.len(),
            existing = info.is_existing(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "topics ready"
        );

        // ─── producers / consumers ───
        let consume_topics = match &info {
            TopicsInfo::Existing { produce_topics, consume_topics } => {
                self.create_producers(produce_topics).await?;
                self.create_consumers(consume_topics).await?;
                consume_topics.len()
            }
            TopicsInfo::Create { .. } => {
                self.create_consumers(&topics).await?;
                self.create_producers(&topics).await?;
                topics.len()
            }
        };
        self.ensure_topics_ready(consume_topics, completed).await?;

        // ─── load ───
        let publish_rate = if w.producer_rate > 0.0 {
            w.producer_rate
        } else {
            self.rate_control.initial_rate
        };
        if w.producer_rate <= 0.0 && !w.consumer_only {
            tracing::info!(initial_rate = publish_rate, "discovering maximum sustainable rate");
            tasks.spawn(
                "rate controller",
                run_rate_controller(
                    self.worker.clone(),
                    w.subscriptions_per_topic,
                    self.rate_control.clone(),
                    completed.clone(),
                ),
            );
        }

        if w.consumer_only {
            tracing::info!("consumer-only workload, not starting producers");
        } else {
            let assignment = ProducerWorkAssignment {
                publish_rate,
                key_distributor: w.key_distributor,
                payload_data: payload::build_pool(w)?,
            };
            self.worker.start_load(&assignment).await?;
            tracing::info!(publish_rate, payloads = assignment.payload_data.len(), "load started");
        }

        let sampler = Sampler::new(
            self.worker.clone(),
            w.subscriptions_per_topic,
            Duration::from_millis(w.sample_rate_millis),
        );
        let draining = Arc::new(AtomicBool::new(false));

        // ─── warm-up ───
        if !self.warmup.is_zero() {
            tracing::info!(duration_secs = self.warmup.as_secs(), "----- starting warm-up traffic -----");
            let mut warmup = TestResult::new(w, &self.driver_name, topics.len());
            let until = Instant::now() + self.warmup;
            sampler.run(&mut warmup, Some(until), &draining, &self.interrupt).await?;
        }

        // ─── backlog ───
        if w.backlog_mode() {
            draining.store(true, Ordering::Release);
            let plan = BacklogPlan::new(w.backlog_bytes(), w.message_size, w.subscriptions_per_topic);
            tasks.spawn(
                "backlog",
                build_and_drain(self.worker.clone(), plan, draining.clone(), completed.clone()),
            );
        }

        // ─── measurement ───
        self.worker.reset_stats().await?;
        match self.test {
            Some(d) => tracing::info!(duration_secs = d.as_secs(), "----- starting benchmark traffic -----"),
            None => tracing::info!("----- starting benchmark traffic until interrupted -----"),
        }
        let mut result = TestResult::new(w, &self.driver_name, topics.len());
        let until = self.test.map(|d| Instant::now() + d);
        sampler.run(&mut result, until, &draining, &self.interrupt).await?;
        sampler.finalize(&mut result).await?;

        tracing::info!(samples = result.samples(), "benchmark phase completed");
        Ok(result)
    }

    /// Каждый topic повторяется `producers_per_topic` раз, список перемешан.
    async fn create_producers(&self, topics: &[String]) -> Result<(), EngineError> {
        if self.workload.consumer_only {
            return Ok(());
        }
        let mut producers: Vec<String> = (0..self.workload.producers_per_topic)
            .flat_map(|_| topics.iter().cloned())
            .collect();
        producers.shuffle(&mut rand::rng());

        let started = Instant::now();
        self.worker.create_producers(&producers).await?;
        tracing::info!(
            producers = producers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "created producers"
        );
        Ok(())
    }

    /// `subscriptions_per_topic` подписок на topic, в каждой
    /// `consumer_per_subscription` consumer'ов; пары перемешаны.
    async fn create_consumers(&self, topics: &[String]) -> Result<(), EngineError> {
        let mut pairs = Vec::new();
        for topic in topics {
            for i in 0..self.workload.subscriptions_per_topic {
                let subscription = format!("sub-{i:03}-{}", random_name(7));
                for _ in 0..self.workload.consumer_per_subscription {
                    pairs.push(TopicSubscription::new(topic, &subscription));
                }
            }
        }
        pairs.shuffle(&mut rand::rng());

        let assignment = ConsumerAssignment::new(pairs);
        let started = Instant::now();
        self.worker.create_consumers(&assignment).await?;
        tracing::info!(
            consumers = assignment.topics_subscriptions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "created consumers"
        );
        Ok(())
    }

    /// Пробное сообщение с каждого producer'а и ожидание, пока каждая
    /// подписка получит хотя бы одно.
    async fn ensure_topics_ready(&self, consume_topics: usize, completed: &CancellationToken) -> Result<(), EngineError> {
        let w = &self.workload;
        let consumers = consume_topics as u64 * w.subscriptions_per_topic as u64 * w.consumer_per_subscription as u64;
        if consumers == 0 || w.consumer_only {
            tracing::info!("not waiting for consumers");
            return Ok(());
        }

        tracing::info!("waiting for consumers to be ready");
        self.worker.probe_producers().await?;

        let expected = consume_topics as u64 * w.subscriptions_per_topic as u64;
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            let counters = self.worker.get_counters_stats().await?;
            if counters.messages_received >= expected {
                tracing::info!("all consumers are ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::warn!(received = counters.messages_received, expected, "timed out waiting for consumers");
                return Ok(());
            }
            tokio::select! {
                _ = completed.cancelled() => return Ok(()),
                _ = tokio::time::sleep(READY_POLL) => {}
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Background tasks
// ════════════════════════════════════════════════════════════════

#[derive(Default)]
struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<Result<(), WorkerError>>)>,
}

impl BackgroundTasks {
    fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        self.handles.push((name, tokio::spawn(task)));
    }

    /// Дождаться всех задач. Ошибки логируются, прогон они не валят.
    async fn join(&mut self) {
        for (name, handle) in self.handles.drain(..) {
            match handle.await {
                Ok(Ok(())) => tracing::debug!(task = name, "background task finished"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "background task failed"),
                Err(e) => tracing::error!(
                    task = name,
                    error = %EngineError::Task { task: name, detail: e.to_string() },
                    "background task aborted"
                ),
            }
        }
    }
}
