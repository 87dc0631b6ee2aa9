//! Накопление и разбор backlog'а.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use bench_worker::{Worker, WorkerError};

#[derive(Debug, Clone)]
pub struct BacklogPlan {
    /// Сколько байт должно накопиться до возобновления consumer'ов.
    pub target_bytes: u64,
    pub message_size: usize,
    pub subscriptions_per_topic: u32,
    /// Разбор закончен, когда backlog (сообщений) не больше этого.
    pub drained_backlog: i64,
    pub build_poll: Duration,
    pub drain_poll: Duration,
}

impl BacklogPlan {
    pub fn new(target_bytes: u64, message_size: usize, subscriptions_per_topic: u32) -> Self {
        Self {
            target_bytes,
            message_size,
            subscriptions_per_topic,
            drained_backlog: 1000,
            build_poll: Duration::from_secs(1),
            drain_poll: Duration::from_millis(100),
        }
    }
}

/// Сбрасывает флаг ожидания разбора на любом выходе.
struct DrainFlag(Arc<AtomicBool>);

impl Drop for DrainFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Пауза consumer'ов → накопление `target_bytes` → resume → разбор до
/// `drained_backlog`. Флаг `draining` выставляет вызывающий до запуска
/// задачи, здесь он сбрасывается при любом выходе.
pub async fn build_and_drain(
    worker: Arc<dyn Worker>,
    plan: BacklogPlan,
    draining: Arc<AtomicBool>,
    completed: CancellationToken,
) -> Result<(), WorkerError> {
    let _flag = DrainFlag(draining);

    tracing::info!(target_bytes = plan.target_bytes, "pausing consumers to build backlog");
    worker.pause_consumers().await?;

    loop {
        let counters = worker.get_counters_stats().await?;
        let backlog = counters.backlog(plan.subscriptions_per_topic).max(0) as u64;
        if backlog.saturating_mul(plan.message_size as u64) >= plan.target_bytes {
            tracing::info!(backlog, "backlog built");
            break;
        }
        tokio::select! {
            _ = completed.cancelled() => return Ok(()),
            _ = tokio::time::sleep(plan.build_poll) => {}
        }
    }

    tracing::info!("start draining backlog");
    worker.resume_consumers().await?;

    loop {
        let counters = worker.get_counters_stats().await?;
        let backlog = counters.backlog(plan.subscriptions_per_topic);
        if backlog <= plan.drained_backlog {
            tracing::info!(backlog, "completed backlog draining");
            return Ok(());
        }
        tokio::select! {
            _ = completed.cancelled() => return Ok(()),
            _ = tokio::time::sleep(plan.drain_poll) => {}
        }
    }
}
