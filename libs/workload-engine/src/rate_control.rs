//! Поиск максимального устойчивого rate'а.
//!
//! Bracketed search: экспоненциальный рост, пока узкого места нет,
//! и деление пополам между нижней и верхней границей, когда producer'ы
//! или consumer'ы отстают.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bench_worker::{Worker, WorkerError};

/// Эмпирические пороги контроллера.
#[derive(Debug, Clone)]
pub struct RateControlConfig {
    /// С какого rate'а начинается поиск.
    pub initial_rate: f64,
    pub min_rate: f64,
    pub control_period: Duration,
    /// Producer'ы отстают, если publish < `publish_shortfall` × текущий rate.
    pub publish_shortfall: f64,
    /// Consumer'ы отстают, если receive < `receive_shortfall` × publish.
    pub receive_shortfall: f64,
    /// Верхняя граница при отставании producer'ов, × текущий rate.
    pub producer_ceiling: f64,
    /// Ширина окна (±) после стабилизации.
    pub convergence_band: f64,
    /// Сколько подряд успешных периодов на потолке до сужения окна.
    pub stable_periods: u32,
    /// Backlog (сообщений), ниже которого разбор считается законченным.
    pub drained_backlog: i64,
    pub drain_poll: Duration,
    /// Пауза после возврата к рабочему rate'у.
    pub catch_up: Duration,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            initial_rate: 10_000.0,
            min_rate: 0.1,
            control_period: Duration::from_secs(3),
            publish_shortfall: 0.95,
            receive_shortfall: 0.98,
            producer_ceiling: 1.1,
            convergence_band: 0.05,
            stable_periods: 3,
            drained_backlog: 1000,
            drain_poll: Duration::from_millis(100),
            catch_up: Duration::from_millis(500),
        }
    }
}

/// Результат одного шага контроллера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Producer'ы не выдают запрошенный rate.
    ProducersBehind,
    /// Consumer'ы не успевают, нужно разобрать backlog.
    ConsumersBehind,
    /// Узкого места нет, rate растёт.
    Increase,
    /// Держим rate на потолке.
    Hold,
    /// Окно сужено до ±band вокруг текущего rate'а.
    Narrow,
}

/// Состояние поиска без ввода-вывода.
#[derive(Debug, Clone)]
pub struct RateController {
    config: RateControlConfig,
    current: f64,
    min: f64,
    max: f64,
    successful_periods: u32,
}

impl RateController {
    pub fn new(config: RateControlConfig) -> Self {
        Self {
            current: config.initial_rate,
            min: config.min_rate,
            max: f64::MAX,
            successful_periods: 0,
            config,
        }
    }

    pub fn current_rate(&self) -> f64 {
        self.current
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Rate, до которого притормаживаем producer'ов на время разбора backlog'а.
    pub fn throttle_rate(&self) -> f64 {
        self.min / 10.0
    }

    /// Один контрольный период: rate'ы publish/receive (msg/s) за период.
    pub fn observe(&mut self, publish_rate: f64, receive_rate: f64) -> Decision {
        let cfg = &self.config;
        if publish_rate < self.current * cfg.publish_shortfall {
            self.max = self.current * cfg.producer_ceiling;
            self.current = self.min + (self.current - self.min) / 2.0;
            Decision::ProducersBehind
        } else if receive_rate < publish_rate * cfg.receive_shortfall {
            self.max = self.current;
            self.current = self.min + (self.current - self.min) / 2.0;
            Decision::ConsumersBehind
        } else if self.current < self.max {
            self.min = self.current;
            self.current = (self.current * 2.0).min(self.max);
            Decision::Increase
        } else {
            self.successful_periods += 1;
            if self.successful_periods > cfg.stable_periods {
                self.min = self.current * (1.0 - cfg.convergence_band);
                self.max = self.current * (1.0 + cfg.convergence_band);
                self.successful_periods = 0;
                Decision::Narrow
            } else {
                Decision::Hold
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Control loop
// ════════════════════════════════════════════════════════════════

/// Контроллер до отмены `completed`. Каждый период сравнивает rate'ы
/// по дельтам счётчиков и рассылает новый rate через `adjust_publish_rate`.
pub async fn run_rate_controller(
    worker: Arc<dyn Worker>,
    subscriptions_per_topic: u32,
    config: RateControlConfig,
    completed: CancellationToken,
) -> Result<(), WorkerError> {
    let period = config.control_period;
    let drain_poll = config.drain_poll;
    let catch_up = config.catch_up;
    let drained_backlog = config.drained_backlog;
    let mut controller = RateController::new(config);

    let mut last = worker.get_counters_stats().await?;
    let mut last_at = Instant::now();

    loop {
        tokio::select! {
            _ = completed.cancelled() => return Ok(()),
            _ = tokio::time::sleep(period) => {}
        }

        let stats = worker.get_counters_stats().await?;
        let now = Instant::now();
        let elapsed = now.duration_since(last_at).as_secs_f64().max(f64::EPSILON);
        let publish_rate = stats.messages_sent.saturating_sub(last.messages_sent) as f64 / elapsed;
        let receive_rate = stats.messages_received.saturating_sub(last.messages_received) as f64 / elapsed;
        last = stats;
        last_at = now;

        let (min, max) = controller.bounds();
        tracing::debug!(
            current = controller.current_rate(),
            publish_rate,
            receive_rate,
            min,
            max,
            "rate control period"
        );

        match controller.observe(publish_rate, receive_rate) {
            Decision::ProducersBehind => {
                tracing::info!(rate = controller.current_rate(), "producers are not meeting requested rate");
            }
            Decision::ConsumersBehind => {
                tracing::info!(rate = controller.current_rate(), "consumers are falling behind, draining backlog");
                worker.adjust_publish_rate(controller.throttle_rate()).await?;
                loop {
                    let counters = worker.get_counters_stats().await?;
                    if counters.backlog(subscriptions_per_topic) < drained_backlog {
                        break;
                    }
                    tokio::select! {
                        _ = completed.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(drain_poll) => {}
                    }
                }

                tracing::debug!(rate = controller.current_rate(), "resuming load at reduced rate");
                worker.adjust_publish_rate(controller.current_rate()).await?;
                tokio::select! {
                    _ = completed.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(catch_up) => {}
                }
                last = worker.get_counters_stats().await?;
                last_at = Instant::now();
            }
            Decision::Increase => {
                tracing::debug!(rate = controller.current_rate(), "no bottleneck found, increasing rate");
            }
            Decision::Hold | Decision::Narrow => {}
        }

        worker.adjust_publish_rate(controller.current_rate()).await?;
    }
}
