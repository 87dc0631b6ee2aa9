use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};

use crate::error::LoopbackError;

/// Сообщение в пути от producer'а к consumer'у.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Arc<[u8]>,
    pub publish_timestamp_nanos: i64,
}

/// Подписка = consumer group. Каждое сообщение получает ровно один
/// участник группы: партиция делится между участниками по модулю.
#[derive(Default)]
struct Group {
    members: Vec<mpsc::UnboundedSender<Delivery>>,
}

impl Group {
    /// Отдать сообщение владельцу партиции. Закрытые участники удаляются.
    fn deliver(&mut self, partition: usize, delivery: Delivery) {
        let mut delivery = delivery;
        while !self.members.is_empty() {
            let index = partition % self.members.len();
            match self.members[index].send(delivery) {
                Ok(()) => return,
                Err(mpsc::error::SendError(back)) => {
                    self.members.swap_remove(index);
                    delivery = back;
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topic
// ═══════════════════════════════════════════════════════════════

/// In-memory topic: партиции + consumer groups.
///
/// Каналы unbounded, как у брокера с неограниченным retention:
/// пока consumer'ы на паузе, сообщения копятся.
pub struct Topic {
    pub name: String,
    partitions: u32,
    groups: RwLock<HashMap<String, Group>>,
    next_partition: AtomicU64,
    closed: AtomicBool,
}

impl Topic {
    pub fn new(name: String, partitions: u32) -> Self {
        Self {
            name,
            partitions: partitions.max(1),
            groups: RwLock::new(HashMap::new()),
            next_partition: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Вступить в consumer group `subscription`.
    pub async fn subscribe(&self, subscription: &str) -> Result<mpsc::UnboundedReceiver<Delivery>, LoopbackError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LoopbackError::Closed(self.name.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut groups = self.groups.write().await;
        groups.entry(subscription.to_string()).or_default().members.push(tx);
        Ok(rx)
    }

    /// Сообщения с ключом идут в партицию по хэшу ключа, без ключа — по кругу.
    fn partition_for(&self, key: Option<&str>) -> usize {
        let slot = match key {
            Some(k) => {
                let mut hasher = DefaultHasher::new();
                k.hash(&mut hasher);
                hasher.finish()
            }
            None => self.next_partition.fetch_add(1, Ordering::Relaxed),
        };
        (slot % self.partitions as u64) as usize
    }

    /// Опубликовать: каждая подписка получает копию.
    pub async fn publish(&self, key: Option<&str>, delivery: Delivery) -> Result<(), LoopbackError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LoopbackError::Closed(self.name.clone()));
        }
        let partition = self.partition_for(key);
        let mut groups = self.groups.write().await;
        for group in groups.values_mut() {
            group.deliver(partition, delivery.clone());
        }
        Ok(())
    }

    /// Закрыть topic: дальнейшие publish падают, consumer'ы видят конец канала.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.groups.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(byte: u8) -> Delivery {
        Delivery { payload: Arc::from(vec![byte]), publish_timestamp_nanos: 1 }
    }

    #[tokio::test]
    async fn every_subscription_gets_a_copy() {
        let topic = Topic::new("t".into(), 1);
        let mut a = topic.subscribe("sub-a").await.unwrap();
        let mut b = topic.subscribe("sub-b").await.unwrap();

        topic.publish(None, msg(7)).await.unwrap();
        assert_eq!(&*a.recv().await.unwrap().payload, &[7]);
        assert_eq!(&*b.recv().await.unwrap().payload, &[7]);
    }

    #[tokio::test]
    async fn group_members_share_messages() {
        let topic = Topic::new("t".into(), 4);
        let mut first = topic.subscribe("sub").await.unwrap();
        let mut second = topic.subscribe("sub").await.unwrap();

        for i in 0..8 {
            topic.publish(None, msg(i)).await.unwrap();
        }
        let mut total = 0;
        while first.try_recv().is_ok() {
            total += 1;
        }
        let mut other = 0;
        while second.try_recv().is_ok() {
            other += 1;
        }
        assert_eq!(total + other, 8);
        assert!(total > 0 && other > 0);
    }

    #[tokio::test]
    async fn closed_member_is_skipped() {
        let topic = Topic::new("t".into(), 1);
        let dropped = topic.subscribe("sub").await.unwrap();
        let mut alive = topic.subscribe("sub").await.unwrap();
        drop(dropped);

        topic.publish(None, msg(1)).await.unwrap();
        topic.publish(None, msg(2)).await.unwrap();
        assert_eq!(&*alive.recv().await.unwrap().payload, &[1]);
        assert_eq!(&*alive.recv().await.unwrap().payload, &[2]);
    }

    #[tokio::test]
    async fn closed_topic_rejects_publish() {
        let topic = Topic::new("t".into(), 1);
        let mut rx = topic.subscribe("sub").await.unwrap();
        topic.close().await;
        assert!(matches!(topic.publish(None, msg(1)).await, Err(LoopbackError::Closed(_))));
        assert!(rx.recv().await.is_none());
    }
}
