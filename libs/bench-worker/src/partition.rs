//! Раскладка узлов по ролям и работы по узлам.

use crate::error::WorkerError;

/// Сколько узлов ensemble'а отдать producer'ам.
///
/// Соотношение подобрано эмпирически под конкретный класс брокеров,
/// поэтому оставлено настраиваемым.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRatio {
    /// Половина узлов пишет, половина читает.
    #[default]
    Balanced,
    /// Примерно треть пишет, остальные читают.
    ExtraConsumers,
    /// Ровно столько producer-узлов (зажимается в `1..total`).
    Fixed(usize),
}

impl NodeRatio {
    pub fn producer_count(self, total: usize) -> usize {
        let upper = total.saturating_sub(1).max(1);
        let count = match self {
            NodeRatio::Balanced => total / 2,
            NodeRatio::ExtraConsumers => (total + 2) / 3,
            NodeRatio::Fixed(p) => p,
        };
        count.clamp(1, upper)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRoles {
    pub producers: Vec<String>,
    pub consumers: Vec<String>,
}

/// Разделить узлы на непересекающиеся producer и consumer множества.
/// Consumer'ами становятся узлы с конца списка.
pub fn split_roles(workers: &[String], ratio: NodeRatio) -> Result<NodeRoles, WorkerError> {
    if workers.len() < 2 {
        return Err(WorkerError::Topology(format!(
            "ensemble needs at least 2 workers, got {}",
            workers.len()
        )));
    }
    let producers = ratio.producer_count(workers.len());
    let reversed: Vec<String> = workers.iter().rev().cloned().collect();
    let (consumers, producers) = reversed.split_at(workers.len() - producers);
    Ok(NodeRoles { producers: producers.to_vec(), consumers: consumers.to_vec() })
}

/// Разбить список на `shards` непрерывных кусков, размеры отличаются не больше чем на 1.
pub fn contiguous_shards<T: Clone>(items: &[T], shards: usize) -> Vec<Vec<T>> {
    if shards == 0 {
        return Vec::new();
    }
    let base = items.len() / shards;
    let extra = items.len() % shards;
    let mut result = Vec::with_capacity(shards);
    let mut start = 0;
    for shard in 0..shards {
        let len = base + usize::from(shard < extra);
        result.push(items[start..start + len].to_vec());
        start += len;
    }
    result
}

/// Разложить элементы по `buckets` корзинам по кругу.
pub fn round_robin<T: Clone>(items: &[T], buckets: usize) -> Vec<Vec<T>> {
    let mut result = vec![Vec::new(); buckets];
    if buckets == 0 {
        return result;
    }
    for (i, item) in items.iter().enumerate() {
        result[i % buckets].push(item.clone());
    }
    result
}
