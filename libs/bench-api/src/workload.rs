use serde::{Deserialize, Serialize};

use crate::distributor::KeyDistributorType;

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("parse workload: {0}")]
    Parse(String),

    #[error("exactly one of `topics` or an existing topic list must be set (topics={topics}, existing={existing})")]
    TopicSource { topics: u32, existing: bool },

    #[error("existing {0} topic list is empty")]
    EmptyTopicList(&'static str),

    #[error("invalid {field}: {detail}")]
    Invalid { field: &'static str, detail: String },

    #[error("backlog mode requires a positive producer_rate")]
    BacklogWithoutRate,

    #[error("backlog mode requires at least one subscription and one consumer")]
    BacklogWithoutConsumers,
}

// ════════════════════════════════════════════════════════════════
//  Workload
// ════════════════════════════════════════════════════════════════

/// Описание одного benchmark прогона.
///
/// Загружается один раз на запуск, после `validate()` не меняется.
/// Источник topic'ов: либо `topics` (создать новые), либо списки
/// существующих topic'ов, ровно одно из двух.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub name: String,

    /// Сколько topic'ов создать. 0, если используются существующие.
    #[serde(default)]
    pub topics: u32,
    #[serde(default = "default_partitions")]
    pub partitions_per_topic: u32,
    /// Topic'и, на которые и пишем, и подписываемся.
    #[serde(default)]
    pub existing_topic_list: Vec<String>,
    /// Дополнительные topic'и только для producer'ов.
    #[serde(default)]
    pub existing_produce_topic_list: Vec<String>,
    /// Дополнительные topic'и только для consumer'ов.
    #[serde(default)]
    pub existing_consume_topic_list: Vec<String>,

    #[serde(default)]
    pub key_distributor: KeyDistributorType,
    pub message_size: usize,
    #[serde(default)]
    pub use_randomized_payloads: bool,
    /// Доля случайных байт в сгенерированном payload, остальное нули.
    #[serde(default = "default_random_bytes_ratio")]
    pub random_bytes_ratio: f64,
    #[serde(default = "default_payload_pool_size")]
    pub randomized_payload_pool_size: usize,
    /// Файл (или каталог) с готовыми payload'ами.
    #[serde(default)]
    pub payload_file: Option<String>,

    #[serde(default = "default_one")]
    pub subscriptions_per_topic: u32,
    #[serde(default = "default_one")]
    pub producers_per_topic: u32,
    #[serde(default = "default_one")]
    pub consumer_per_subscription: u32,

    /// Сообщений в секунду суммарно. 0 = подобрать автоматически.
    #[serde(default)]
    pub producer_rate: f64,
    /// > 0 включает режим накопления и разбора backlog'а.
    #[serde(default)]
    pub consumer_backlog_size_gb: u64,

    #[serde(default = "default_warmup_minutes")]
    pub warmup_duration_minutes: u64,
    /// 0 = до прерывания процесса.
    #[serde(default = "default_test_minutes")]
    pub test_duration_minutes: u64,
    #[serde(default = "default_sample_rate_millis")]
    pub sample_rate_millis: u64,

    /// Только читать, producer'ы не создаются.
    #[serde(default)]
    pub consumer_only: bool,
}

fn default_partitions() -> u32 {
    1
}
fn default_one() -> u32 {
    1
}
fn default_random_bytes_ratio() -> f64 {
    0.5
}
fn default_payload_pool_size() -> usize {
    1000
}
fn default_warmup_minutes() -> u64 {
    1
}
fn default_test_minutes() -> u64 {
    5
}
fn default_sample_rate_millis() -> u64 {
    10_000
}

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

impl Workload {
    pub fn from_toml(content: &str) -> Result<Self, WorkloadError> {
        toml::from_str(content).map_err(|e| WorkloadError::Parse(e.to_string()))
    }

    pub fn uses_existing_topics(&self) -> bool {
        !self.existing_topic_list.is_empty()
            || !self.existing_produce_topic_list.is_empty()
            || !self.existing_consume_topic_list.is_empty()
    }

    /// Размер backlog'а, который нужно накопить, в байтах.
    pub fn backlog_bytes(&self) -> u64 {
        self.consumer_backlog_size_gb.saturating_mul(BYTES_PER_GB)
    }

    pub fn backlog_mode(&self) -> bool {
        self.consumer_backlog_size_gb > 0
    }

    /// Eager проверка до старта трафика.
    pub fn validate(&self) -> Result<(), WorkloadError> {
        TopicsInfo::from_workload(self)?;

        if self.message_size == 0 {
            return Err(invalid("message_size", "must be positive"));
        }
        if !self.producer_rate.is_finite() || self.producer_rate < 0.0 {
            return Err(invalid("producer_rate", format!("{} is not a rate", self.producer_rate)));
        }
        if self.sample_rate_millis == 0 {
            return Err(invalid("sample_rate_millis", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.random_bytes_ratio) {
            return Err(invalid("random_bytes_ratio", "must be within [0, 1]"));
        }
        if !self.consumer_only {
            if self.use_randomized_payloads {
                if self.randomized_payload_pool_size == 0 {
                    return Err(invalid("randomized_payload_pool_size", "must be positive"));
                }
            } else if self.payload_file.is_none() {
                return Err(invalid(
                    "payload_file",
                    "required unless use_randomized_payloads is set",
                ));
            }
        }
        if self.backlog_mode() {
            if self.producer_rate <= 0.0 {
                return Err(WorkloadError::BacklogWithoutRate);
            }
            if self.subscriptions_per_topic == 0 || self.consumer_per_subscription == 0 {
                return Err(WorkloadError::BacklogWithoutConsumers);
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, detail: impl Into<String>) -> WorkloadError {
    WorkloadError::Invalid { field, detail: detail.into() }
}

// ════════════════════════════════════════════════════════════════
//  TopicsInfo
// ════════════════════════════════════════════════════════════════

/// Что передаётся на `/create-topics`: создать N новых topic'ов
/// или проверить существующие.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TopicsInfo {
    Create {
        number_of_topics: u32,
        partitions_per_topic: u32,
    },
    Existing {
        produce_topics: Vec<String>,
        consume_topics: Vec<String>,
    },
}

impl TopicsInfo {
    pub fn create(number_of_topics: u32, partitions_per_topic: u32) -> Result<Self, WorkloadError> {
        if number_of_topics == 0 {
            return Err(invalid("topics", "must be positive"));
        }
        if partitions_per_topic == 0 {
            return Err(invalid("partitions_per_topic", "must be positive"));
        }
        Ok(Self::Create { number_of_topics, partitions_per_topic })
    }

    pub fn existing(
        produce_topics: Vec<String>,
        consume_topics: Vec<String>,
    ) -> Result<Self, WorkloadError> {
        if produce_topics.is_empty() {
            return Err(WorkloadError::EmptyTopicList("produce"));
        }
        if consume_topics.is_empty() {
            return Err(WorkloadError::EmptyTopicList("consume"));
        }
        Ok(Self::Existing { produce_topics, consume_topics })
    }

    /// Строит TopicsInfo из workload'а. Общий список existing topic'ов
    /// попадает и в produce, и в consume.
    pub fn from_workload(workload: &Workload) -> Result<Self, WorkloadError> {
        let existing = workload.uses_existing_topics();
        if (workload.topics > 0) == existing {
            return Err(WorkloadError::TopicSource { topics: workload.topics, existing });
        }

        if !existing {
            return Self::create(workload.topics, workload.partitions_per_topic);
        }

        let produce = workload
            .existing_topic_list
            .iter()
            .chain(&workload.existing_produce_topic_list)
            .cloned()
            .collect();
        let consume = workload
            .existing_topic_list
            .iter()
            .chain(&workload.existing_consume_topic_list)
            .cloned()
            .collect();
        Self::existing(produce, consume)
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Self::Existing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Workload {
        Workload::from_toml(
            r#"
            name = "unit"
            topics = 2
            message_size = 100
            use_randomized_payloads = true
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let w = base();
        assert_eq!(w.partitions_per_topic, 1);
        assert_eq!(w.subscriptions_per_topic, 1);
        assert_eq!(w.sample_rate_millis, 10_000);
        assert_eq!(w.key_distributor, KeyDistributorType::NoKey);
        w.validate().unwrap();
    }

    #[test]
    fn topic_count_and_existing_list_are_exclusive() {
        let mut w = base();
        w.existing_topic_list = vec!["a".into()];
        assert!(matches!(
            TopicsInfo::from_workload(&w),
            Err(WorkloadError::TopicSource { topics: 2, existing: true })
        ));

        w.topics = 0;
        w.existing_topic_list.clear();
        assert!(matches!(
            TopicsInfo::from_workload(&w),
            Err(WorkloadError::TopicSource { topics: 0, existing: false })
        ));
    }

    #[test]
    fn existing_lists_are_merged_per_role() {
        let mut w = base();
        w.topics = 0;
        w.existing_topic_list = vec!["shared".into()];
        w.existing_produce_topic_list = vec!["in".into()];
        w.existing_consume_topic_list = vec!["out".into()];

        let info = TopicsInfo::from_workload(&w).unwrap();
        assert_eq!(
            info,
            TopicsInfo::Existing {
                produce_topics: vec!["shared".into(), "in".into()],
                consume_topics: vec!["shared".into(), "out".into()],
            }
        );
    }

    #[test]
    fn existing_mode_needs_both_roles() {
        let mut w = base();
        w.topics = 0;
        w.existing_produce_topic_list = vec!["in".into()];
        assert!(matches!(
            TopicsInfo::from_workload(&w),
            Err(WorkloadError::EmptyTopicList("consume"))
        ));
    }

    #[test]
    fn backlog_mode_requires_rate() {
        let mut w = base();
        w.consumer_backlog_size_gb = 1;
        assert!(matches!(w.validate(), Err(WorkloadError::BacklogWithoutRate)));

        w.producer_rate = 1000.0;
        w.consumer_per_subscription = 0;
        assert!(matches!(w.validate(), Err(WorkloadError::BacklogWithoutConsumers)));

        w.consumer_per_subscription = 1;
        w.validate().unwrap();
        assert_eq!(w.backlog_bytes(), 1024 * 1024 * 1024);
    }

    #[test]
    fn payload_source_is_required() {
        let mut w = base();
        w.use_randomized_payloads = false;
        assert!(matches!(w.validate(), Err(WorkloadError::Invalid { field: "payload_file", .. })));

        w.consumer_only = true;
        w.validate().unwrap();
    }

    #[test]
    fn topics_info_serializes_with_mode_tag() {
        let info = TopicsInfo::create(3, 4).unwrap();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["mode"], "create");
        assert_eq!(json["number_of_topics"], 3);
    }
}
