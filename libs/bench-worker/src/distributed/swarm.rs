use std::future::Future;
use std::pin::Pin;

use bench_api::{
    ConsumerAssignment, CountersStats, CumulativeLatencies, PeriodStats, ProducerWorkAssignment, TopicsInfo,
};

use super::http::NodeClient;
use super::paths;
use crate::error::WorkerError;
use crate::{Worker, WorkerFuture};

/// Swarm: каждый узел и пишет, и читает.
///
/// Все узлы получают полный список producer'ов и подписок, rate
/// делится на число узлов. Подписки с одинаковым именем на разных
/// узлах делят сообщения между собой. End-to-end latency не зависит
/// от рассинхронизации часов между узлами, ценой удвоенного трафика.
pub struct SwarmWorker {
    workers: Vec<String>,
    client: NodeClient,
}

impl SwarmWorker {
    pub fn new(workers: Vec<String>) -> Result<Self, WorkerError> {
        if workers.is_empty() {
            return Err(WorkerError::Topology("swarm needs at least one worker".into()));
        }
        tracing::info!(workers = ?workers, "swarm workers");
        Ok(Self { workers, client: NodeClient::new()? })
    }

    async fn do_create_topics(&self, topics: &TopicsInfo) -> Result<Vec<String>, WorkerError> {
        let body = self.client.post_json(&self.workers[0], paths::CREATE_TOPICS, topics).await?;
        serde_json::from_slice(&body).map_err(|e| WorkerError::Decode {
            node: self.workers[0].clone(),
            path: paths::CREATE_TOPICS,
            detail: e.to_string(),
        })
    }

    fn nodes(&self) -> usize {
        self.workers.len()
    }
}

impl Worker for SwarmWorker {
    fn initialize_driver<'a>(&'a self, driver_config: &'a [u8]) -> WorkerFuture<'a, ()> {
        Box::pin(self.client.post_all(&self.workers, paths::INITIALIZE_DRIVER, driver_config.to_vec()))
    }

    fn create_or_validate_topics<'a>(&'a self, topics: &'a TopicsInfo) -> WorkerFuture<'a, Vec<String>> {
        Box::pin(self.do_create_topics(topics))
    }

    fn create_producers<'a>(&'a self, topics: &'a [String]) -> WorkerFuture<'a, ()> {
        Box::pin(self.client.post_all_json(&self.workers, paths::CREATE_PRODUCERS, topics))
    }

    fn create_consumers<'a>(&'a self, assignment: &'a ConsumerAssignment) -> WorkerFuture<'a, ()> {
        Box::pin(self.client.post_all_json(&self.workers, paths::CREATE_CONSUMERS, assignment))
    }

    fn probe_producers(&self) -> WorkerFuture<'_, ()> {
        Box::pin(self.client.post_all(&self.workers, paths::PROBE_PRODUCERS, Vec::new()))
    }

    fn start_load<'a>(&'a self, assignment: &'a ProducerWorkAssignment) -> WorkerFuture<'a, ()> {
        Box::pin(async move {
            let per_node = assignment.divided_by(self.nodes());
            self.client.post_all_json(&self.workers, paths::START_LOAD, &per_node).await
        })
    }

    fn adjust_publish_rate(&self, publish_rate: f64) -> WorkerFuture<'_, ()> {
        Box::pin(async move {
            let per_node = publish_rate / self.nodes() as f64;
            self.client.post_all_json(&self.workers, paths::ADJUST_PUBLISH_RATE, &per_node).await
        })
    }

    fn pause_consumers(&self) -> WorkerFuture<'_, ()> {
        Box::pin(self.client.post_all(&self.workers, paths::PAUSE_CONSUMERS, Vec::new()))
    }

    fn resume_consumers(&self) -> WorkerFuture<'_, ()> {
        Box::pin(self.client.post_all(&self.workers, paths::RESUME_CONSUMERS, Vec::new()))
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
