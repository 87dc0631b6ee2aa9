use bench_api::WorkloadError;
use bench_worker::WorkerError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Workload(#[from] WorkloadError),

    #[error("{0}")]
    Worker(#[from] WorkerError),

    #[error("payload {path}: {detail}")]
    Payload { path: String, detail: String },

    #[error("{task} task: {detail}")]
    Task { task: &'static str, detail: String },
}

impl EngineError {
    pub(crate) fn payload(path: impl Into<String>, detail: impl ToString) -> Self {
        Self::Payload { path: path.into(), detail: detail.to_string() }
    }
}
