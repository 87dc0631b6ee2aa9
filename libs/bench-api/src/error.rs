/// Ошибка любого вызова драйвера.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// Конфиг драйвера не разобрался или противоречив.
    #[error("driver config: {0}")]
    Config(String),

    #[error("topic '{0}' not found")]
    TopicNotFound(String),

    #[error("topic '{0}' already exists")]
    TopicExists(String),

    /// Topic, producer или consumer уже закрыт.
    #[error("'{0}' is closed")]
    Closed(String),

    #[error("{0}")]
    Other(String),
}

