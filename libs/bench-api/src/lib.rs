use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub mod commands;
pub mod distributor;
pub mod error;
pub mod histogram;
pub mod stats;
pub mod util;
pub mod workload;

pub use commands::{ConsumerAssignment, ProducerWorkAssignment, TopicSubscription};
pub use distributor::{KeyDistributor, KeyDistributorType};
pub use error::DriverError;
pub use stats::{CountersStats, CumulativeLatencies, PeriodStats};
pub use workload::{TopicsInfo, Workload, WorkloadError};

// ════════════════════════════════════════════════════════════════
//  Driver capability
// ════════════════════════════════════════════════════════════════

/// Фабрика драйвера. Получает сырые байты конфиг файла драйвера
/// (TOML) и возвращает инициализированный экземпляр.
///
/// Worker выбирает фабрику по ключу `driver` из того же файла,
/// сама фабрика разбирает свою секцию `[config]`.
pub trait DriverFactory: Send + Sync {
    fn initialize<'a>(
        &'a self,
        config: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BenchmarkDriver>, DriverError>> + Send + 'a>>;
}

/// Адаптер к конкретной messaging системе.
///
/// Все вызовы асинхронные, порядок их завершения не гарантирован.
pub trait BenchmarkDriver: Send + Sync {
    /// Префикс для имён создаваемых topic'ов.
    fn topic_name_prefix(&self) -> &str;

    fn create_topic<'a>(
        &'a self,
        topic: &'a str,
        partitions: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + 'a>>;

    /// Проверить, что существующий topic доступен.
    /// По умолчанию драйвер ничего не проверяет.
    fn validate_topic_exists<'a>(
        &'a self,
        _topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, DriverError>> + Send + 'a>> {
        Box::pin(async { Ok(true) })
    }

    fn create_producer<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BenchmarkProducer>, DriverError>> + Send + 'a>>;

    fn create_consumer<'a>(
        &'a self,
        topic: &'a str,
        subscription: &'a str,
        callback: Arc<dyn ConsumerCallback>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BenchmarkConsumer>, DriverError>> + Send + 'a>>;

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>>;
}

pub trait BenchmarkProducer: Send + Sync {
    /// Отправить сообщение. Future завершается, когда брокер подтвердил запись.
    fn send_async(
        &self,
        key: Option<String>,
        payload: Arc<[u8]>,
    ) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>>;

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>>;
}

pub trait BenchmarkConsumer: Send + Sync {
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>>;
}

/// Callback, через который драйвер отдаёт полученные сообщения worker'у.
pub trait ConsumerCallback: Send + Sync {
    /// `publish_timestamp_nanos` — wall clock момента публикации (ns since epoch).
    /// Future может не завершаться, пока consumer'ы на паузе.
    fn message_received<'a>(
        &'a self,
        payload: &'a [u8],
        publish_timestamp_nanos: i64,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Ошибка при чтении. Считается, consume loop продолжается.
    fn error(&self);
}
