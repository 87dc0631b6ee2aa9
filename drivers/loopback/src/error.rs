use bench_api::DriverError;

#[derive(Debug, thiserror::Error)]
pub enum LoopbackError {
    #[error("topic '{0}' not found")]
    NotFound(String),

    #[error("topic '{0}' already exists")]
    AlreadyExists(String),

    #[error("topic '{0}' is closed")]
    Closed(String),

    #[error("config: {0}")]
    Config(String),
}

impl From<LoopbackError> for DriverError {
    fn from(e: LoopbackError) -> Self {
        match e {
            LoopbackError::NotFound(topic) => DriverError::TopicNotFound(topic),
            LoopbackError::AlreadyExists(topic) => DriverError::TopicExists(topic),
            LoopbackError::Closed(topic) => DriverError::Closed(topic),
            LoopbackError::Config(detail) => DriverError::Config(detail),
        }
    }
}
