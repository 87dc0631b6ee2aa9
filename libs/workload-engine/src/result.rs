//! Результат одного прогона (workload × driver).

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use bench_api::{CumulativeLatencies, PeriodStats, Workload};

/// Перцентили одной строки серии.
const LADDER: [f64; 6] = [50.0, 75.0, 95.0, 99.0, 99.9, 99.99];

/// Гистограммы хранят микросекунды; publish/schedule/e2e отчитываются
/// в миллисекундах, publish delay в микросекундах.
#[derive(Debug, Clone, Copy)]
enum Unit {
    Millis,
    Micros,
}

impl Unit {
    fn scale(self, micros: f64) -> f64 {
        match self {
            Self::Millis => micros / 1000.0,
            Self::Micros => micros,
        }
    }
}

/// Серия по сэмплам для одного класса latency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySeries {
    pub avg: Vec<f64>,
    pub min: Vec<f64>,
    pub p50: Vec<f64>,
    pub p75: Vec<f64>,
    pub p95: Vec<f64>,
    pub p99: Vec<f64>,
    pub p999: Vec<f64>,
    pub p9999: Vec<f64>,
    pub max: Vec<f64>,
}

impl LatencySeries {
    fn push(&mut self, histogram: &Histogram<u64>, unit: Unit) {
        let [p50, p75, p95, p99, p999, p9999] = LADDER.map(|p| unit.scale(histogram.value_at_percentile(p) as f64));
        self.avg.push(unit.scale(histogram.mean()));
        self.min.push(unit.scale(histogram.min() as f64));
        self.p50.push(p50);
        self.p75.push(p75);
        self.p95.push(p95);
        self.p99.push(p99);
        self.p999.push(p999);
        self.p9999.push(p9999);
        self.max.push(unit.scale(histogram.max() as f64));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantile {
    pub percentile: f64,
    pub value: f64,
}

/// Итог по накопленной гистограмме за весь замер.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub avg: f64,
    pub min: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub p9999: f64,
    pub max: f64,
    /// Таблица перцентилей (100 шагов на половину расстояния до 100%).
    pub quantiles: Vec<Quantile>,
}

impl LatencySummary {
    fn from_histogram(histogram: &Histogram<u64>, unit: Unit) -> Self {
        let [p50, p75, p95, p99, p999, p9999] = LADDER.map(|p| unit.scale(histogram.value_at_percentile(p) as f64));

        let mut quantiles: Vec<Quantile> = Vec::new();
        for step in histogram.iter_quantiles(100) {
            let percentile = step.quantile() * 100.0;
            let value = unit.scale(step.value_iterated_to() as f64);
            match quantiles.last_mut() {
                Some(last) if last.percentile == percentile => last.value = value,
                _ => quantiles.push(Quantile { percentile, value }),
            }
        }

        Self {
            avg: unit.scale(histogram.mean()),
            min: unit.scale(histogram.min() as f64),
            p50,
            p75,
            p95,
            p99,
            p999,
            p9999,
            max: unit.scale(histogram.max() as f64),
            quantiles,
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  TestResult
// ════════════════════════════════════════════════════════════════

/// Документ результата: идентичность прогона, серии одинаковой длины
/// (по одному элементу на сэмпл) и агрегаты по всему замеру.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub workload: String,
    pub driver: String,
    pub service_version: Option<String>,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    pub topics: usize,
    pub partitions: u32,
    pub message_size: usize,
    pub producers_per_topic: u32,
    pub consumers_per_topic: u32,
    pub sample_rate_millis: u64,

    pub sent: Vec<u64>,
    pub consumed: Vec<u64>,
    pub publish_failed: Vec<u64>,
    pub consume_failed: Vec<u64>,
    pub publish_rate: Vec<f64>,
    pub consume_rate: Vec<f64>,
    pub backlog: Vec<i64>,
    pub total_sent: Vec<u64>,
    pub total_consumed: Vec<u64>,

    pub publish_latency: LatencySeries,
    pub schedule_latency: LatencySeries,
    /// Микросекунды.
    pub publish_delay_latency: LatencySeries,
    pub end_to_end_latency: LatencySeries,

    pub aggregated_publish_latency: Option<LatencySummary>,
    pub aggregated_schedule_latency: Option<LatencySummary>,
    /// Микросекунды.
    pub aggregated_publish_delay_latency: Option<LatencySummary>,
    pub aggregated_end_to_end_latency: Option<LatencySummary>,
}

impl TestResult {
    pub fn new(workload: &Workload, driver: &str, topics: usize) -> Self {
        Self {
            workload: workload.name.clone(),
            driver: driver.to_string(),
            topics,
            partitions: workload.partitions_per_topic,
            message_size: workload.message_size,
            producers_per_topic: workload.producers_per_topic,
            consumers_per_topic: workload.consumer_per_subscription,
            sample_rate_millis: workload.sample_rate_millis,
            ..Default::default()
        }
    }

    pub fn samples(&self) -> usize {
        self.sent.len()
    }

    /// Добавить один сэмпл: rate'ы за `elapsed_secs` и текущий backlog.
    pub fn record_sample(&mut self, stats: &PeriodStats, elapsed_secs: f64, backlog: i64) {
        let elapsed = elapsed_secs.max(f64::EPSILON);
        self.sent.push(stats.messages_sent);
        self.consumed.push(stats.messages_received);
        self.publish_failed.push(stats.message_send_errors);
        self.consume_failed.push(stats.poll_errors);
        self.publish_rate.push(stats.messages_sent as f64 / elapsed);
        self.consume_rate.push(stats.messages_received as f64 / elapsed);
        self.backlog.push(backlog);
        self.total_sent.push(stats.total_messages_sent);
        self.total_consumed.push(stats.total_messages_received);

        self.publish_latency.push(&stats.publish_latency, Unit::Millis);
        self.schedule_latency.push(&stats.schedule_latency, Unit::Millis);
        self.publish_delay_latency.push(&stats.publish_delay_latency, Unit::Micros);
        self.end_to_end_latency.push(&stats.end_to_end_latency, Unit::Millis);
    }

    /// Заполнить агрегаты по накопленным latency.
    pub fn record_aggregates(&mut self, latencies: &CumulativeLatencies) {
        self.aggregated_publish_latency = Some(LatencySummary::from_histogram(&latencies.publish_latency, Unit::Millis));
        self.aggregated_schedule_latency =
            Some(LatencySummary::from_histogram(&latencies.schedule_latency, Unit::Millis));
        self.aggregated_publish_delay_latency =
            Some(LatencySummary::from_histogram(&latencies.publish_delay_latency, Unit::Micros));
        self.aggregated_end_to_end_latency =
            Some(LatencySummary::from_histogram(&latencies.end_to_end_latency, Unit::Millis));
    }

    /// Имя файла `{workload}-{driver}-{yyyy-MM-dd-HH-mm-ss}.json`.
    pub fn file_name(&self, at: DateTime<Utc>) -> String {
        format!(
            "{}-{}-{}.json",
            sanitize(&self.workload),
            sanitize(&self.driver),
            at.format("%Y-%m-%d-%H-%M-%S")
        )
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stats(sent: u64, latency_micros: u64) -> PeriodStats {
        let mut s = PeriodStats {
            messages_sent: sent,
            messages_received: sent / 2,
            total_messages_sent: sent * 3,
            total_messages_received: sent,
            ..Default::default()
        };
        s.publish_latency.record(latency_micros).unwrap();
        s.publish_delay_latency.record(latency_micros).unwrap();
        s
    }

    fn workload() -> Workload {
        Workload::from_toml("name = \"w\"\ntopics = 1\nmessage_size = 10\nuse_randomized_payloads = true").unwrap()
    }

    #[test]
    fn sample_appends_rates_and_ladder() {
        let mut result = TestResult::new(&workload(), "loopback", 1);
        result.record_sample(&stats(1000, 2000), 2.0, 42);
        result.record_sample(&stats(500, 4000), 1.0, 7);

        assert_eq!(result.samples(), 2);
        assert_eq!(result.publish_rate, vec![500.0, 500.0]);
        assert_eq!(result.consume_rate, vec![250.0, 250.0]);
        assert_eq!(result.backlog, vec![42, 7]);
        assert_eq!(result.total_sent, vec![3000, 1500]);
        // publish в мс, publish delay в мкс
        assert!((result.publish_latency.p50[0] - 2.0).abs() < 0.01);
        assert!((result.publish_delay_latency.p50[0] - 2000.0).abs() < 10.0);
        assert_eq!(result.publish_latency.max.len(), 2);
    }

    #[test]
    fn aggregates_include_quantile_table() {
        let mut latencies = CumulativeLatencies::default();
        for v in 1..=1000u64 {
            latencies.publish_latency.record(v * 10).unwrap();
            latencies.end_to_end_latency.record(v * 100).unwrap();
        }
        let mut result = TestResult::default();
        result.record_aggregates(&latencies);

        let publish = result.aggregated_publish_latency.unwrap();
        assert!((publish.avg - 5.005).abs() < 0.01);
        assert!((publish.max - 10.0).abs() < 0.01);
        assert!(!publish.quantiles.is_empty());
        assert!(publish.quantiles.windows(2).all(|w| w[0].percentile < w[1].percentile));
        assert!((publish.quantiles.last().unwrap().percentile - 100.0).abs() < 1e-9);

        let schedule = result.aggregated_schedule_latency.unwrap();
        assert_eq!(schedule.avg, 0.0);
    }

    #[test]
    fn serializes_in_camel_case() {
        let mut result = TestResult::new(&workload(), "loopback", 1);
        result.record_sample(&stats(10, 100), 1.0, 0);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["messageSize"], 10);
        assert!(json["publishLatency"]["p99"].is_array());
        assert!(json["aggregatedEndToEndLatency"].is_null());
    }

    #[test]
    fn file_name_uses_timestamp() {
        let result = TestResult { workload: "1 topic/100b".into(), driver: "Loopback".into(), ..Default::default() };
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(result.file_name(at), "1-topic-100b-Loopback-2026-03-04-05-06-07.json");
    }
}
