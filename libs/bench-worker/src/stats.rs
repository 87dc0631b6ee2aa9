use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bench_api::{CountersStats, CumulativeLatencies, PeriodStats};

/// Счётчики и гистограммы одного узла.
///
/// Горячий путь — атомики плюс короткая критическая секция на запись
/// в гистограмму. Period-гистограммы забираются целиком при каждом
/// чтении, cumulative живут до `reset`.
#[derive(Default)]
pub struct WorkerStats {
    messages_sent: AtomicU64,
    message_send_errors: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    poll_errors: AtomicU64,

    total_messages_sent: AtomicU64,
    total_message_send_errors: AtomicU64,
    total_messages_received: AtomicU64,

    period: Mutex<CumulativeLatencies>,
    cumulative: Mutex<CumulativeLatencies>,
}

fn lock(m: &Mutex<CumulativeLatencies>) -> MutexGuard<'_, CumulativeLatencies> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Сообщение отправлено без замера latency (probe).
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.total_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Подтверждённая отправка. Все latency в микросекундах.
    pub fn record_producer_success(
        &self,
        bytes: usize,
        publish_latency: u64,
        schedule_latency: u64,
        publish_delay: u64,
    ) {
        self.record_message_sent();
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);

        for latencies in [&self.period, &self.cumulative] {
            let mut h = lock(latencies);
            h.publish_latency.saturating_record(publish_latency);
            h.schedule_latency.saturating_record(schedule_latency);
            h.publish_delay_latency.saturating_record(publish_delay);
        }
    }

    pub fn record_producer_failure(&self) {
        self.message_send_errors.fetch_add(1, Ordering::Relaxed);
        self.total_message_send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// `end_to_end` пишется только если > 0 (часы узлов могут расходиться).
    pub fn record_message_received(&self, bytes: usize, end_to_end: i64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.total_messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);

        if end_to_end > 0 {
            for latencies in [&self.period, &self.cumulative] {
                lock(latencies).end_to_end_latency.saturating_record(end_to_end as u64);
            }
        }
    }

    pub fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Снять статистику интервала и начать новый.
    pub fn to_period_stats(&self) -> PeriodStats {
        let latencies = std::mem::take(&mut *lock(&self.period));
        PeriodStats {
            messages_sent: self.messages_sent.swap(0, Ordering::Relaxed),
            message_send_errors: self.message_send_errors.swap(0, Ordering::Relaxed),
            bytes_sent: self.bytes_sent.swap(0, Ordering::Relaxed),
            messages_received: self.messages_received.swap(0, Ordering::Relaxed),
            bytes_received: self.bytes_received.swap(0, Ordering::Relaxed),
            poll_errors: self.poll_errors.swap(0, Ordering::Relaxed),
            total_messages_sent: self.total_messages_sent.load(Ordering::Relaxed),
            total_message_send_errors: self.total_message_send_errors.load(Ordering::Relaxed),
            total_messages_received: self.total_messages_received.load(Ordering::Relaxed),
            publish_latency: latencies.publish_latency,
            schedule_latency: latencies.schedule_latency,
            publish_delay_latency: latencies.publish_delay_latency,
            end_to_end_latency: latencies.end_to_end_latency,
        }
    }

    pub fn to_cumulative_latencies(&self) -> CumulativeLatencies {
        lock(&self.cumulative).clone()
    }

    pub fn to_counters_stats(&self) -> CountersStats {
        CountersStats {
            messages_sent: self.total_messages_sent.load(Ordering::Relaxed),
            messages_received: self.total_messages_received.load(Ordering::Relaxed),
            message_send_errors: self.total_message_send_errors.load(Ordering::Relaxed),
        }
    }

    /// Начать замер заново: интервальные счётчики и все гистограммы.
    /// Накопительные totals не трогаются, по ним работают rate controller
    /// и backlog.
    pub fn reset_latencies(&self) {
        for counter in [
            &self.messages_sent,
            &self.message_send_errors,
            &self.bytes_sent,
            &self.messages_received,
            &self.bytes_received,
            &self.poll_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *lock(&self.period) = CumulativeLatencies::default();
        *lock(&self.cumulative) = CumulativeLatencies::default();
    }

    /// Полный сброс, вместе с totals. Только для `stop_all`.
    pub fn reset(&self) {
        self.reset_latencies();
        for counter in [
            &self.total_messages_sent,
            &self.total_message_send_errors,
            &self.total_messages_received,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
