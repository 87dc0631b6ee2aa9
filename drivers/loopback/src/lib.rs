//! In-process брокер для прогонов без внешней системы.
//!
//! Сообщения доставляются сразу же через in-memory каналы, подписки
//! работают как consumer groups. Опциональная задержка публикации
//! имитирует сетевой round trip.

pub mod error;
pub mod topic;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bench_api::util::now_nanos;
use bench_api::{
    BenchmarkConsumer, BenchmarkDriver, BenchmarkProducer, ConsumerCallback, DriverError, DriverFactory,
};

pub use error::LoopbackError;
pub use topic::{Delivery, Topic};

/// Ключ драйвера в конфиг файле (`driver = "loopback"`).
pub const DRIVER_NAME: &str = "loopback";

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

fn default_topic_prefix() -> String {
    "test-topic".into()
}

/// Секция `[config]` файла драйвера.
#[derive(Debug, Clone, Deserialize)]
pub struct LoopbackConfig {
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Искусственная задержка перед подтверждением отправки.
    #[serde(default)]
    pub publish_delay_micros: u64,
    /// Topic'и, которые "уже существуют" при старте (1 партиция).
    #[serde(default)]
    pub existing_topics: Vec<String>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            publish_delay_micros: 0,
            existing_topics: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoopbackFile {
    #[serde(default)]
    config: LoopbackConfig,
}

impl LoopbackConfig {
    pub fn parse(raw: &[u8]) -> Result<Self, LoopbackError> {
        let text = std::str::from_utf8(raw).map_err(|e| LoopbackError::Config(e.to_string()))?;
        let file: LoopbackFile = toml::from_str(text).map_err(|e| LoopbackError::Config(e.to_string()))?;
        Ok(file.config)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Factory
// ═══════════════════════════════════════════════════════════════

pub struct LoopbackDriverFactory;

impl DriverFactory for LoopbackDriverFactory {
    fn initialize<'a>(
        &'a self,
        config: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BenchmarkDriver>, DriverError>> + Send + 'a>> {
        Box::pin(async move {
            let config = LoopbackConfig::parse(config)?;
            let driver = LoopbackDriver::new(config);
            for name in driver.config.existing_topics.clone() {
                driver.create_topic(&name, 1).await?;
            }
            Ok(Arc::new(driver) as Arc<dyn BenchmarkDriver>)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Driver
// ═══════════════════════════════════════════════════════════════

pub struct LoopbackDriver {
    config: LoopbackConfig,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl LoopbackDriver {
    pub fn new(config: LoopbackConfig) -> Self {
        Self { config, topics: RwLock::new(HashMap::new()) }
    }

    async fn topic(&self, name: &str) -> Result<Arc<Topic>, LoopbackError> {
        self.topics
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| LoopbackError::NotFound(name.to_string()))
    }
}

impl BenchmarkDriver for LoopbackDriver {
    fn topic_name_prefix(&self) -> &str {
        &self.config.topic_prefix
    }

    fn create_topic<'a>(
        &'a self,
        topic: &'a str,
        partitions: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + 'a>> {
        Box::pin(async move {
            let mut topics = self.topics.write().await;
            if topics.contains_key(topic) {
                return Err(LoopbackError::AlreadyExists(topic.to_string()).into());
            }
            topics.insert(topic.to_string(), Arc::new(Topic::new(topic.to_string(), partitions)));
            tracing::debug!(topic, partitions, "loopback topic created");
            Ok(())
        })
    }

    fn validate_topic_exists<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, DriverError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.topics.read().await.contains_key(topic)) })
    }

    fn create_producer<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BenchmarkProducer>, DriverError>> + Send + 'a>> {
        Box::pin(async move {
            let topic = self.topic(topic).await?;
            let producer = LoopbackProducer {
                topic,
                delay: Duration::from_micros(self.config.publish_delay_micros),
                closed: AtomicBool::new(false),
            };
            Ok(Arc::new(producer) as Arc<dyn BenchmarkProducer>)
        })
    }

    fn create_consumer<'a>(
        &'a self,
        topic: &'a str,
        subscription: &'a str,
        callback: Arc<dyn ConsumerCallback>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BenchmarkConsumer>, DriverError>> + Send + 'a>> {
        Box::pin(async move {
            let rx = self.topic(topic).await?.subscribe(subscription).await?;
            let token = CancellationToken::new();
            let handle = tokio::spawn(consume(rx, callback, token.clone()));
            Ok(Box::new(LoopbackConsumer { token, handle: Mutex::new(Some(handle)) }) as Box<dyn BenchmarkConsumer>)
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        Box::pin(async move {
            let topics: Vec<Arc<Topic>> = self.topics.write().await.drain().map(|(_, t)| t).collect();
            for topic in &topics {
                topic.close().await;
            }
            tracing::debug!(topics = topics.len(), "loopback driver closed");
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Producer / Consumer
// ═══════════════════════════════════════════════════════════════

struct LoopbackProducer {
    topic: Arc<Topic>,
    delay: Duration,
    closed: AtomicBool,
}

impl BenchmarkProducer for LoopbackProducer {
    fn send_async(
        &self,
        key: Option<String>,
        payload: Arc<[u8]>,
    ) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(LoopbackError::Closed(self.topic.name.clone()).into());
            }
            let delivery = Delivery { payload, publish_timestamp_nanos: now_nanos() };
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.topic.publish(key.as_deref(), delivery).await?;
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        self.closed.store(true, Ordering::Release);
        Box::pin(async { Ok(()) })
    }
}

struct LoopbackConsumer {
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BenchmarkConsumer for LoopbackConsumer {
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        self.token.cancel();
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        Box::pin(async move {
            if let Some(handle) = handle {
                handle
                    .await
                    .map_err(|e| DriverError::Other(format!("consumer task: {e}")))?;
            }
            Ok(())
        })
    }
}

/// Consume loop: отдаёт сообщения в callback, пока канал жив и нет отмены.
async fn consume(
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    callback: Arc<dyn ConsumerCallback>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            delivery = rx.recv() => {
                let Some(delivery) = delivery else { break };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = callback.message_received(&delivery.payload, delivery.publish_timestamp_nanos) => {}
                }
            }
        }
    }
}
