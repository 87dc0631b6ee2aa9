use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::util::{now_nanos, random_name};

/// Количество различных ключей, между которыми распределяются сообщения.
pub const UNIQUE_KEY_COUNT: usize = 10_000;

const KEY_LENGTH: usize = 7;

/// Стратегия выбора ключа сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyDistributorType {
    /// Сообщения без ключа.
    #[default]
    NoKey,
    /// Ключи по кругу из фиксированного набора.
    KeyRoundRobin,
    /// Ключ выбирается по младшим разрядам наносекундных часов.
    RandomNano,
}

/// Генератор ключей для одного producer loop'а.
#[derive(Debug)]
pub enum KeyDistributor {
    NoKey,
    RoundRobin { next: usize },
    RandomNano,
}

impl KeyDistributor {
    pub fn build(kind: KeyDistributorType) -> Self {
        match kind {
            KeyDistributorType::NoKey => Self::NoKey,
            KeyDistributorType::KeyRoundRobin => Self::RoundRobin { next: 0 },
            KeyDistributorType::RandomNano => Self::RandomNano,
        }
    }

    pub fn next_key(&mut self) -> Option<String> {
        match self {
            Self::NoKey => None,
            Self::RoundRobin { next } => {
                let key = &keys()[*next % UNIQUE_KEY_COUNT];
                *next = next.wrapping_add(1);
                Some(key.clone())
            }
            Self::RandomNano => {
                let index = now_nanos().unsigned_abs() as usize % UNIQUE_KEY_COUNT;
                Some(keys()[index].clone())
            }
        }
    }
}

/// Набор ключей генерируется один раз на процесс.
fn keys() -> &'static [String] {
    static KEYS: OnceLock<Vec<String>> = OnceLock::new();
    KEYS.get_or_init(|| (0..UNIQUE_KEY_COUNT).map(|_| random_name(KEY_LENGTH)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_yields_nothing() {
        let mut d = KeyDistributor::build(KeyDistributorType::NoKey);
        assert_eq!(d.next_key(), None);
    }

    #[test]
    fn round_robin_wraps_after_unique_count() {
        let mut d = KeyDistributor::build(KeyDistributorType::KeyRoundRobin);
        let first = d.next_key().unwrap();
        let second = d.next_key().unwrap();
        assert_ne!(first, second);
        for _ in 2..UNIQUE_KEY_COUNT {
            d.next_key();
        }
        assert_eq!(d.next_key().unwrap(), first);
    }

    #[test]
    fn random_nano_picks_known_key() {
        let mut d = KeyDistributor::build(KeyDistributorType::RandomNano);
        let key = d.next_key().unwrap();
        assert!(keys().contains(&key));
    }

    #[test]
    fn type_uses_screaming_case_names() {
        let parsed: KeyDistributorType = serde_json::from_str("\"KEY_ROUND_ROBIN\"").unwrap();
        assert_eq!(parsed, KeyDistributorType::KeyRoundRobin);
    }
}
