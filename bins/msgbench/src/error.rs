#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Engine(#[from] workload_engine::EngineError),

    #[error("{0}")]
    Worker(#[from] bench_worker::WorkerError),

    #[error("write {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker api: {0}")]
    Serve(String),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),

    #[error("{failed} of {total} benchmark runs failed")]
    RunsFailed { failed: usize, total: usize },
}
