//! Worker'ы поверх HTTP узлов.

mod ensemble;
mod http;
mod swarm;

pub use ensemble::DistributedWorkersEnsemble;
pub use http::REQUEST_TIMEOUT;
pub use swarm::SwarmWorker;

use bench_api::{CountersStats, CumulativeLatencies, PeriodStats};

use crate::error::WorkerError;
use http::NodeClient;

pub(crate) mod paths {
    pub const INITIALIZE_DRIVER: &str = "/initialize-driver";
    pub const CREATE_TOPICS: &str = "/create-topics";
    pub const CREATE_PRODUCERS: &str = "/create-producers";
    pub const PROBE_PRODUCERS: &str = "/probe-producers";
    pub const CREATE_CONSUMERS: &str = "/create-consumers";
    pub const PAUSE_CONSUMERS: &str = "/pause-consumers";
    pub const RESUME_CONSUMERS: &str = "/resume-consumers";
    pub const START_LOAD: &str = "/start-load";
    pub const ADJUST_PUBLISH_RATE: &str = "/adjust-publish-rate";
    pub const STOP_ALL: &str = "/stop-all";
    pub const RESET_STATS: &str = "/reset-stats";
    pub const PERIOD_STATS: &str = "/period-stats";
    pub const CUMULATIVE_LATENCIES: &str = "/cumulative-latencies";
    pub const COUNTERS_STATS: &str = "/counters-stats";
}

// Stats со всех узлов: счётчики суммируются, гистограммы складываются.

async fn merged_period_stats(client: &NodeClient, nodes: &[String]) -> Result<PeriodStats, WorkerError> {
    let all: Vec<PeriodStats> = client.get_all(nodes, paths::PERIOD_STATS).await?;
    let mut merged = PeriodStats::default();
    for stats in &all {
        merged.merge(stats)?;
    }
    Ok(merged)
}

async fn merged_cumulative_latencies(
    client: &NodeClient,
    nodes: &[String],
) -> Result<CumulativeLatencies, WorkerError> {
    let all: Vec<CumulativeLatencies> = client.get_all(nodes, paths::CUMULATIVE_LATENCIES).await?;
    let mut merged = CumulativeLatencies::default();
    for latencies in &all {
        merged.merge(latencies)?;
    }
    Ok(merged)
}

async fn merged_counters_stats(client: &NodeClient, nodes: &[String]) -> Result<CountersStats, WorkerError> {
    let all: Vec<CountersStats> = client.get_all(nodes, paths::COUNTERS_STATS).await?;
    Ok(all.iter().fold(CountersStats::default(), |mut acc, c| {
        acc.merge(c);
        acc
    }))
}

async fn stop_all_nodes(client: &NodeClient, nodes: &[String]) {
    if let Err(e) = client.post_all(nodes, paths::STOP_ALL, Vec::new()).await {
        tracing::error!(error = %e, "stop-all failed on some workers");
    }
}
