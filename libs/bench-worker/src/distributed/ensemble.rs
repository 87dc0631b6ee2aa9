use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::try_join_all;

use bench_api::{
    ConsumerAssignment, CountersStats, CumulativeLatencies, PeriodStats, ProducerWorkAssignment, TopicsInfo,
};

use super::http::NodeClient;
use super::paths;
use crate::error::WorkerError;
use crate::partition::{NodeRatio, contiguous_shards, round_robin, split_roles};
use crate::{Worker, WorkerFuture};

/// Ensemble: узлы поделены на producer'ов и consumer'ов.
///
/// Rate делится на число producer-узлов, которым реально достались
/// topic'и. Stats собираются со всех узлов.
pub struct DistributedWorkersEnsemble {
    workers: Vec<String>,
    producer_workers: Vec<String>,
    consumer_workers: Vec<String>,
    used_producer_workers: AtomicUsize,
    client: NodeClient,
}

impl DistributedWorkersEnsemble {
    pub fn new(workers: Vec<String>, ratio: NodeRatio) -> Result<Self, WorkerError> {
        let roles = split_roles(&workers, ratio)?;
        tracing::info!(producers = ?roles.producers, "producer workers");
        tracing::info!(consumers = ?roles.consumers, "consumer workers");
        Ok(Self {
            workers,
            producer_workers: roles.producers,
            consumer_workers: roles.consumers,
            used_producer_workers: AtomicUsize::new(0),
            client: NodeClient::new()?,
        })
    }

    pub fn producer_workers(&self) -> &[String] {
        &self.producer_workers
    }

    pub fn consumer_workers(&self) -> &[String] {
        &self.consumer_workers
    }

    /// Сколько producer-узлов получили topic'и в последнем `create_producers`.
    pub fn used_producer_workers(&self) -> usize {
        self.used_producer_workers.load(Ordering::SeqCst)
    }

    fn used_for_rate(&self) -> Result<usize, WorkerError> {
        match self.used_producer_workers() {
            0 => Err(WorkerError::InvalidCommand("no producers were created".into())),
            n => Ok(n),
        }
    }

    async fn do_create_topics(&self, topics: &TopicsInfo) -> Result<Vec<String>, WorkerError> {
        // Topic'и создаёт один узел.
        let body = self.client.post_json(&self.workers[0], paths::CREATE_TOPICS, topics).await?;
        serde_json::from_slice(&body).map_err(|e| WorkerError::Decode {
            node: self.workers[0].clone(),
            path: paths::CREATE_TOPICS,
            detail: e.to_string(),
        })
    }

    async fn do_create_producers(&self, topics: &[String]) -> Result<(), WorkerError> {
        let per_node: Vec<Vec<String>> = if topics.len() <= self.producer_workers.len() {
            topics.iter().map(|t| vec![t.clone()]).collect()
        } else {
            contiguous_shards(topics, self.producer_workers.len())
        };

        try_join_all(
            self.producer_workers
                .iter()
                .zip(&per_node)
                .map(|(node, topics)| self.client.post_json(node, paths::CREATE_PRODUCERS, topics)),
        )
        .await?;

        self.used_producer_workers.store(per_node.len(), Ordering::SeqCst);
        tracing::info!(nodes = per_node.len(), producers = topics.len(), "assigned producers");
        Ok(())
    }

    async fn do_create_consumers(&self, assignment: &ConsumerAssignment) -> Result<(), WorkerError> {
        let per_node = round_robin(&assignment.topics_subscriptions, self.consumer_workers.len());
        try_join_all(self.consumer_workers.iter().zip(per_node).map(|(node, pairs)| async move {
            self.client
                .post_json(node, paths::CREATE_CONSUMERS, &ConsumerAssignment::new(pairs))
                .await
        }))
        .await?;
        tracing::info!(
            nodes = self.consumer_workers.len(),
            consumers = assignment.topics_subscriptions.len(),
            "assigned consumers"
        );
        Ok(())
    }

    async fn do_start_load(&self, assignment: &ProducerWorkAssignment) -> Result<(), WorkerError> {
        let per_node = assignment.divided_by(self.used_for_rate()?);
        self.client.post_all_json(&self.producer_workers, paths::START_LOAD, &per_node).await
    }

    async fn do_adjust_publish_rate(&self, publish_rate: f64) -> Result<(), WorkerError> {
        let per_node = publish_rate / self.used_for_rate()? as f64;
        self.client.post_all_json(&self.producer_workers, paths::ADJUST_PUBLISH_RATE, &per_node).await
    }
}

impl Worker for DistributedWorkersEnsemble {
    fn initialize_driver<'a>(&'a self, driver_config: &'a [u8]) -> WorkerFuture<'a, ()> {
        Box::pin(self.client.post_all(&self.workers, paths::INITIALIZE_DRIVER, driver_config.to_vec()))
    }

    fn create_or_validate_topics<'a>(&'a self, topics: &'a TopicsInfo) -> WorkerFuture<'a, Vec<String>> {
        Box::pin(self.do_create_topics(topics))
    }

    fn create_producers<'a>(&'a self, topics: &'a [String]) -> WorkerFuture<'a, ()> {
        Box::pin(self.do_create_producers(topics))
    }

    fn create_consumers<'a>(&'a self, assignment: &'a ConsumerAssignment) -> WorkerFuture<'a, ()> {
        Box::pin(self.do_create_consumers(assignment))
    }

    fn probe_producers(&self) -> WorkerFuture<'_, ()> {
        Box::pin(self.client.post_all(&self.producer_workers, paths::PROBE_PRODUCERS, Vec::new()))
    }

    fn start_load<'a>(&'a self, assignment: &'a ProducerWorkAssignment) -> WorkerFuture<'a, ()> {
        Box::pin(self.do_start_load(assignment))
    }

    fn adjust_publish_rate(&self, publish_rate: f64) -> WorkerFuture<'_, ()> {
        Box::pin(self.do_adjust_publish_rate(publish_rate))
    }

    fn pause_consumers(&self) -> WorkerFuture<'_, ()> {
        Box::pin(self.client.post_all(&self.consumer_workers, paths::PAUSE_CONSUMERS, Vec::new()))
    }

    fn resume_consumers(&self) -> WorkerFuture<'_, ()> {
        Box::pin(self.client.post_all(&self.consumer_workers, paths::RESUME_CONSUMERS, Vec::new()))
    }

    fn reset_stats(&self) -> WorkerFuture<'_, ()> {
        Box::pin(self.client.post_all(&self.workers, paths::RESET_STATS, Vec::new()))
    }

    fn get_period_stats(&self) -> WorkerFuture<'_, PeriodStats> {
        Box::pin(super::merged_period_stats(&self.client, &self.workers))
    }

    fn get_cumulative_latencies(&self) -> WorkerFuture<'_, CumulativeLatencies> {
        Box::pin(super::merged_cumulative_latencies(&self.client, &self.workers))
    }

    fn get_counters_stats(&self) -> WorkerFuture<'_, CountersStats> {
        Box::pin(super::merged_counters_stats(&self.client, &self.workers))
    }

    fn stop_all(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(super::stop_all_nodes(&self.client, &self.workers))
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move { self.client.close() })
    }
}
