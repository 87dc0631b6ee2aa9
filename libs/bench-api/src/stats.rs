use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use crate::histogram::{self, new_end_to_end_histogram, new_latency_histogram};

/// Ошибка при слиянии статистики с разных узлов.
#[derive(Debug, thiserror::Error)]
#[error("merge {histogram} histogram: {detail}")]
pub struct MergeError {
    pub histogram: &'static str,
    pub detail: String,
}

fn add_into(
    target: &mut Histogram<u64>,
    source: &Histogram<u64>,
    histogram: &'static str,
) -> Result<(), MergeError> {
    target
        .add(source)
        .map_err(|e| MergeError { histogram, detail: format!("{e:?}") })
}

// ════════════════════════════════════════════════════════════════
//  PeriodStats
// ════════════════════════════════════════════════════════════════

/// Статистика за один интервал сэмплирования.
///
/// Счётчики без `total_` обнуляются при каждом чтении, `total_*`
/// монотонны до `reset_stats`. Latency в микросекундах.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodStats {
    pub messages_sent: u64,
    pub message_send_errors: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub poll_errors: u64,

    pub total_messages_sent: u64,
    pub total_message_send_errors: u64,
    pub total_messages_received: u64,

    #[serde(with = "histogram::serde_base64")]
    pub publish_latency: Histogram<u64>,
    #[serde(with = "histogram::serde_base64")]
    pub schedule_latency: Histogram<u64>,
    #[serde(with = "histogram::serde_base64")]
    pub publish_delay_latency: Histogram<u64>,
    #[serde(with = "histogram::serde_base64")]
    pub end_to_end_latency: Histogram<u64>,
}

impl Default for PeriodStats {
    fn default() -> Self {
        Self {
            messages_sent: 0,
            message_send_errors: 0,
            bytes_sent: 0,
            messages_received: 0,
            bytes_received: 0,
            poll_errors: 0,
            total_messages_sent: 0,
            total_message_send_errors: 0,
            total_messages_received: 0,
            publish_latency: new_latency_histogram(),
            schedule_latency: new_latency_histogram(),
            publish_delay_latency: new_latency_histogram(),
            end_to_end_latency: new_end_to_end_histogram(),
        }
    }
}

impl PeriodStats {
    /// Добавить статистику другого узла: счётчики суммируются,
    /// гистограммы складываются.
    pub fn merge(&mut self, other: &PeriodStats) -> Result<(), MergeError> {
        self.messages_sent += other.messages_sent;
        self.message_send_errors += other.message_send_errors;
        self.bytes_sent += other.bytes_sent;
        self.messages_received += other.messages_received;
        self.bytes_received += other.bytes_received;
        self.poll_errors += other.poll_errors;
        self.total_messages_sent += other.total_messages_sent;
        self.total_message_send_errors += other.total_message_send_errors;
        self.total_messages_received += other.total_messages_received;

        add_into(&mut self.publish_latency, &other.publish_latency, "publish")?;
        add_into(&mut self.schedule_latency, &other.schedule_latency, "schedule")?;
        add_into(&mut self.publish_delay_latency, &other.publish_delay_latency, "publish-delay")?;
        add_into(&mut self.end_to_end_latency, &other.end_to_end_latency, "end-to-end")
    }
}

// ════════════════════════════════════════════════════════════════
//  CumulativeLatencies
// ════════════════════════════════════════════════════════════════

/// Latency за всю фазу измерения, сбрасывается только `reset_stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CumulativeLatencies {
    #[serde(with = "histogram::serde_base64")]
    pub publish_latency: Histogram<u64>,
    #[serde(with = "histogram::serde_base64")]
    pub schedule_latency: Histogram<u64>,
    #[serde(with = "histogram::serde_base64")]
    pub publish_delay_latency: Histogram<u64>,
    #[serde(with = "histogram::serde_base64")]
    pub end_to_end_latency: Histogram<u64>,
}

impl Default for CumulativeLatencies {
    fn default() -> Self {
        Self {
            publish_latency: new_latency_histogram(),
            schedule_latency: new_latency_histogram(),
            publish_delay_latency: new_latency_histogram(),
            end_to_end_latency: new_end_to_end_histogram(),
        }
    }
}

impl CumulativeLatencies {
    pub fn merge(&mut self, other: &CumulativeLatencies) -> Result<(), MergeError> {
        add_into(&mut self.publish_latency, &other.publish_latency, "publish")?;
        add_into(&mut self.schedule_latency, &other.schedule_latency, "schedule")?;
        add_into(&mut self.publish_delay_latency, &other.publish_delay_latency, "publish-delay")?;
        add_into(&mut self.end_to_end_latency, &other.end_to_end_latency, "end-to-end")
    }
}

// ════════════════════════════════════════════════════════════════
//  CountersStats
// ════════════════════════════════════════════════════════════════

/// Дешёвый снимок счётчиков для опроса backlog'а.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub message_send_errors: u64,
}

impl CountersStats {
    pub fn merge(&mut self, other: &CountersStats) {
        self.messages_sent += other.messages_sent;
        self.messages_received += other.messages_received;
        self.message_send_errors += other.message_send_errors;
    }

    /// Оценка backlog'а: каждая подписка должна получить каждое сообщение.
    pub fn backlog(&self, subscriptions_per_topic: u32) -> i64 {
        subscriptions_per_topic as i64 * self.messages_sent as i64 - self.messages_received as i64
    }
}
