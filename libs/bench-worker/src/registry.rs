use std::collections::HashMap;
use std::sync::Arc;

use bench_api::DriverFactory;
use serde::Deserialize;

use crate::error::WorkerError;

/// Заголовок конфиг файла драйвера. Секцию `[config]` разбирает сам драйвер.
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfiguration {
    /// Имя для отчётов.
    pub name: String,
    /// Ключ в [`DriverRegistry`].
    pub driver: String,
}

impl DriverConfiguration {
    pub fn parse(raw: &[u8]) -> Result<Self, WorkerError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| WorkerError::DriverConfig(format!("not utf-8: {e}")))?;
        toml::from_str(text).map_err(|e| WorkerError::DriverConfig(e.to_string()))
    }
}

/// Драйверы, доступные процессу. Заполняется один раз в main.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, factory: Arc<dyn DriverFactory>) -> Self {
        self.register(name, factory);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn DriverFactory>) {
        self.factories.insert(name.into(), factory);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DriverFactory>, WorkerError> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownDriver(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_ignores_driver_section() {
        let raw = br#"
            name = "Loopback"
            driver = "loopback"

            [config]
            topic_prefix = "bench"
        "#;
        let cfg = DriverConfiguration::parse(raw).unwrap();
        assert_eq!(cfg.name, "Loopback");
        assert_eq!(cfg.driver, "loopback");
    }

    #[test]
    fn missing_driver_key_is_rejected() {
        assert!(matches!(
            DriverConfiguration::parse(b"name = \"x\""),
            Err(WorkerError::DriverConfig(_))
        ));
    }

    #[test]
    fn unknown_driver_lookup_fails() {
        let registry = DriverRegistry::new();
        assert!(matches!(registry.get("kafka"), Err(WorkerError::UnknownDriver(name)) if name == "kafka"));
    }
}
