use bench_api::stats::MergeError;
use bench_api::{DriverError, WorkloadError};
use rate_limiter::RateLimiterError;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("driver: {0}")]
    Driver(#[from] DriverError),

    #[error("driver is not initialized")]
    NotInitialized,

    #[error("driver config: {0}")]
    DriverConfig(String),

    #[error("unknown driver '{0}'")]
    UnknownDriver(String),

    #[error("topic '{0}' does not exist")]
    TopicMissing(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("rate limiter: {0}")]
    RateLimiter(#[from] RateLimiterError),

    #[error("{0}")]
    Workload(#[from] WorkloadError),

    #[error("{0}")]
    Merge(#[from] MergeError),

    #[error("topology: {0}")]
    Topology(String),

    #[error("{method} {node}{path}: HTTP {status}: {body}")]
    Status {
        method: &'static str,
        node: String,
        path: &'static str,
        status: u16,
        body: String,
    },

    #[error("{method} {node}{path}: {source}")]
    Transport {
        method: &'static str,
        node: String,
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("decode {path} from {node}: {detail}")]
    Decode {
        node: String,
        path: &'static str,
        detail: String,
    },

    #[error("encode {path}: {detail}")]
    Encode { path: &'static str, detail: serde_json::Error },

    #[error("worker is closed")]
    Closed,
}
