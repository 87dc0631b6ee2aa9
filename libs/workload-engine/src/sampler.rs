use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bench_api::PeriodStats;
use bench_worker::Worker;

use crate::error::EngineError;
use crate::result::TestResult;

/// Периодический опрос `/period-stats` и запись серий в результат.
pub struct Sampler {
    worker: Arc<dyn Worker>,
    subscriptions_per_topic: u32,
    sample_rate: Duration,
}

impl Sampler {
    pub fn new(worker: Arc<dyn Worker>, subscriptions_per_topic: u32, sample_rate: Duration) -> Self {
        Self { worker, subscriptions_per_topic, sample_rate }
    }

    /// Сэмплировать до `until` (None = без ограничения) или до отмены
    /// `interrupt`. Фаза не заканчивается, пока выставлен `draining`.
    pub async fn run(
        &self,
        result: &mut TestResult,
        until: Option<Instant>,
        draining: &AtomicBool,
        interrupt: &CancellationToken,
    ) -> Result<(), EngineError> {
        let mut last = Instant::now();
        loop {
            tokio::select! {
                _ = interrupt.cancelled() => {
                    tracing::info!(samples = result.samples(), "sampling interrupted");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.sample_rate) => {}
            }

            let stats = self.worker.get_period_stats().await?;
            let now = Instant::now();
            let elapsed = now.duration_since(last).as_secs_f64();
            last = now;

            let backlog = self.subscriptions_per_topic as i64 * stats.total_messages_sent as i64
                - stats.total_messages_received as i64;
            log_sample(&stats, elapsed, backlog);
            result.record_sample(&stats, elapsed, backlog);

            if until.is_some_and(|end| now >= end) && !draining.load(Ordering::Acquire) {
                return Ok(());
            }
        }
    }

    /// Накопленные latency за замер → агрегаты результата.
    pub async fn finalize(&self, result: &mut TestResult) -> Result<(), EngineError> {
        let latencies = self.worker.get_cumulative_latencies().await?;
        result.record_aggregates(&latencies);
        if let Some(publish) = &result.aggregated_publish_latency {
            tracing::info!(
                avg_ms = publish.avg,
                p50_ms = publish.p50,
                p99_ms = publish.p99,
                p999_ms = publish.p999,
                max_ms = publish.max,
                "aggregated publish latency"
            );
        }
        if let Some(e2e) = &result.aggregated_end_to_end_latency {
            tracing::info!(
                avg_ms = e2e.avg,
                p50_ms = e2e.p50,
                p99_ms = e2e.p99,
                p999_ms = e2e.p999,
                max_ms = e2e.max,
                "aggregated end-to-end latency"
            );
        }
        Ok(())
    }
}

fn log_sample(stats: &PeriodStats, elapsed: f64, backlog: i64) {
    let elapsed = elapsed.max(f64::EPSILON);
    let mb = 1024.0 * 1024.0;
    tracing::info!(
        pub_rate = %format_args!("{:.1}", stats.messages_sent as f64 / elapsed),
        pub_mb_s = %format_args!("{:.3}", stats.bytes_sent as f64 / elapsed / mb),
        cons_rate = %format_args!("{:.1}", stats.messages_received as f64 / elapsed),
        cons_mb_s = %format_args!("{:.3}", stats.bytes_received as f64 / elapsed / mb),
        backlog_k = %format_args!("{:.1}", backlog as f64 / 1000.0),
        pub_avg_ms = %format_args!("{:.3}", stats.publish_latency.mean() / 1000.0),
        pub_p99_ms = %format_args!("{:.3}", stats.publish_latency.value_at_percentile(99.0) as f64 / 1000.0),
        pub_delay_p99_us = stats.publish_delay_latency.value_at_percentile(99.0),
        e2e_avg_ms = %format_args!("{:.3}", stats.end_to_end_latency.mean() / 1000.0),
        e2e_p99_ms = %format_args!("{:.3}", stats.end_to_end_latency.value_at_percentile(99.0) as f64 / 1000.0),
        "sample"
    );
}
