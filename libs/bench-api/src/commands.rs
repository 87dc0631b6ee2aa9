use serde::{Deserialize, Serialize};

use crate::distributor::KeyDistributorType;

/// Команда `/start-load`: с какой скоростью и чем нагружать.
///
/// `publish_rate` — доля этого узла, distributed worker делит общий
/// rate на число задействованных узлов перед отправкой.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerWorkAssignment {
    pub publish_rate: f64,
    #[serde(default)]
    pub key_distributor: KeyDistributorType,
    /// Пул payload'ов, producer выбирает случайный для каждой отправки.
    #[serde(with = "payload_pool")]
    pub payload_data: Vec<Vec<u8>>,
}

impl ProducerWorkAssignment {
    /// Копия с rate, поделённым между `nodes` узлами.
    pub fn divided_by(&self, nodes: usize) -> Self {
        Self {
            publish_rate: self.publish_rate / nodes.max(1) as f64,
            key_distributor: self.key_distributor,
            payload_data: self.payload_data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicSubscription {
    pub topic: String,
    pub subscription: String,
}

impl TopicSubscription {
    pub fn new(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self { topic: topic.into(), subscription: subscription.into() }
    }
}

/// Команда `/create-consumers`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerAssignment {
    pub topics_subscriptions: Vec<TopicSubscription>,
}

impl ConsumerAssignment {
    pub fn new(topics_subscriptions: Vec<TopicSubscription>) -> Self {
        Self { topics_subscriptions }
    }

    pub fn is_empty(&self) -> bool {
        self.topics_subscriptions.is_empty()
    }
}

/// Пул payload'ов в JSON передаётся списком base64 строк.
mod payload_pool {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(pool: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(pool.iter().map(|p| STANDARD.encode(p)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
