use std::future::Future;
use std::pin::Pin;

use bench_api::{ConsumerAssignment, CountersStats, CumulativeLatencies, PeriodStats, ProducerWorkAssignment, TopicsInfo};

pub mod distributed;
pub mod error;
pub mod local;
pub mod partition;
pub mod registry;
pub mod stats;

pub use distributed::{DistributedWorkersEnsemble, SwarmWorker};
pub use error::WorkerError;
pub use local::LocalWorker;
pub use partition::NodeRatio;
pub use registry::{DriverConfiguration, DriverRegistry};

pub type WorkerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, WorkerError>> + Send + 'a>>;

// ════════════════════════════════════════════════════════════════
//  Worker
// ════════════════════════════════════════════════════════════════

/// Единый набор команд над одним или многими узлами с драйвером.
///
/// Реализации: [`LocalWorker`] (драйвер в этом процессе),
/// [`DistributedWorkersEnsemble`] (узлы разделены на producer'ов и
/// consumer'ов) и [`SwarmWorker`] (каждый узел делает всё).
/// Топология выбирается один раз при старте.
pub trait Worker: Send + Sync {
    /// Сырые байты конфиг файла драйвера.
    fn initialize_driver<'a>(&'a self, driver_config: &'a [u8]) -> WorkerFuture<'a, ()>;

    /// Создать новые topic'и или проверить существующие. Возвращает имена.
    fn create_or_validate_topics<'a>(&'a self, topics: &'a TopicsInfo) -> WorkerFuture<'a, Vec<String>>;

    /// Один producer на каждый элемент списка (topic'и могут повторяться).
    fn create_producers<'a>(&'a self, topics: &'a [String]) -> WorkerFuture<'a, ()>;

    fn create_consumers<'a>(&'a self, assignment: &'a ConsumerAssignment) -> WorkerFuture<'a, ()>;

    /// Отправить по одному пробному сообщению с каждого producer'а.
    fn probe_producers(&self) -> WorkerFuture<'_, ()>;

    /// `publish_rate` в assignment'е — общий rate для всей топологии.
    fn start_load<'a>(&'a self, assignment: &'a ProducerWorkAssignment) -> WorkerFuture<'a, ()>;

    fn adjust_publish_rate(&self, publish_rate: f64) -> WorkerFuture<'_, ()>;

    fn pause_consumers(&self) -> WorkerFuture<'_, ()>;

    fn resume_consumers(&self) -> WorkerFuture<'_, ()>;

    /// Сбросить latency и интервальные счётчики. Накопительные totals
    /// (`get_counters_stats`) обнуляет только `stop_all`.
    fn reset_stats(&self) -> WorkerFuture<'_, ()>;

    fn get_period_stats(&self) -> WorkerFuture<'_, PeriodStats>;

    fn get_cumulative_latencies(&self) -> WorkerFuture<'_, CumulativeLatencies>;

    fn get_counters_stats(&self) -> WorkerFuture<'_, CountersStats>;

    /// Остановить нагрузку, закрыть producer'ы, consumer'ы и драйвер.
    /// Идемпотентно, ошибки только логируются.
    fn stop_all(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Освободить ресурсы worker'а. Повторный вызов безопасен.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
