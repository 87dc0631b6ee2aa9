use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use bench_api::Workload;
use bench_worker::{DistributedWorkersEnsemble, DriverConfiguration, LocalWorker, NodeRatio, SwarmWorker, Worker};
use workload_engine::{TestResult, WorkloadGenerator};

use crate::config::{RunSettings, Topology};
use crate::error::CliError;

/// Конфиг файл драйвера: имя для отчёта + сырые байты для узлов.
struct DriverFile {
    name: String,
    raw: Vec<u8>,
}

pub async fn run(settings: RunSettings) -> Result<(), CliError> {
    // Всё читается и проверяется до первого трафика.
    let workloads = settings
        .workloads
        .iter()
        .map(|path| load_workload(Path::new(path)))
        .collect::<Result<Vec<_>, _>>()?;
    let drivers = settings
        .drivers
        .iter()
        .map(|path| load_driver(Path::new(path)))
        .collect::<Result<Vec<_>, _>>()?;

    let worker = build_worker(&settings)?;

    let interrupt = CancellationToken::new();
    let watcher = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing current run");
            watcher.cancel();
        }
    });

    let total = workloads.len() * drivers.len();
    let mut failed = 0;
    'runs: for workload in &workloads {
        for driver in &drivers {
            if interrupt.is_cancelled() {
                tracing::warn!("interrupted, skipping remaining runs");
                break 'runs;
            }
            match run_pair(&worker, workload, driver, &settings, &interrupt).await {
                Ok(path) => tracing::info!(path = %path.display(), "result written"),
                Err(e) => {
                    failed += 1;
                    tracing::error!(workload = %workload.name, driver = %driver.name, error = %e, "benchmark failed");
                    worker.stop_all().await;
                }
            }
        }
    }

    worker.close().await;
    if failed > 0 {
        return Err(CliError::RunsFailed { failed, total });
    }
    Ok(())
}

async fn run_pair(
    worker: &Arc<dyn Worker>,
    workload: &Workload,
    driver: &DriverFile,
    settings: &RunSettings,
    interrupt: &CancellationToken,
) -> Result<PathBuf, CliError> {
    tracing::info!(workload = %workload.name, driver = %driver.name, "--------------- starting benchmark ---------------");

    worker.stop_all().await;
    worker.initialize_driver(&driver.raw).await?;

    let begin = Utc::now();
    let generator = WorkloadGenerator::new(&driver.name, workload.clone(), worker.clone())?
        .with_interrupt(interrupt.child_token());
    let mut result = generator.run().await?;
    result.begin_time = Some(begin);
    result.end_time = Some(Utc::now());
    result.service_version = settings.service_version.clone();

    let path = match &settings.output {
        Some(path) => path.clone(),
        None => settings.output_dir.join(result.file_name(begin)),
    };
    write_result(&path, &result)?;
    Ok(path)
}

fn build_worker(settings: &RunSettings) -> Result<Arc<dyn Worker>, CliError> {
    if settings.workers.is_empty() {
        tracing::info!("no workers configured, running in process");
        return Ok(Arc::new(LocalWorker::new(super::registry())));
    }
    let worker: Arc<dyn Worker> = match settings.topology {
        Topology::Swarm => Arc::new(SwarmWorker::new(settings.workers.clone())?),
        Topology::Ensemble => {
            let ratio = if settings.extra_consumers { NodeRatio::ExtraConsumers } else { NodeRatio::Balanced };
            Arc::new(DistributedWorkersEnsemble::new(settings.workers.clone(), ratio)?)
        }
    };
    Ok(worker)
}

fn load_workload(path: &Path) -> Result<Workload, CliError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CliError::Config { context: "workload", detail: format!("'{}': {e}", path.display()) })?;
    let mut workload = Workload::from_toml(&content)
        .map_err(|e| CliError::Config { context: "workload", detail: format!("'{}': {e}", path.display()) })?;
    if workload.name.is_empty() {
        workload.name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    }
    workload
        .validate()
        .map_err(|e| CliError::Config { context: "workload", detail: format!("'{}': {e}", path.display()) })?;
    tracing::info!(name = %workload.name, path = %path.display(), "loaded workload");
    Ok(workload)
}

fn load_driver(path: &Path) -> Result<DriverFile, CliError> {
    let raw = std::fs::read(path)
        .map_err(|e| CliError::Config { context: "driver", detail: format!("'{}': {e}", path.display()) })?;
    let header = DriverConfiguration::parse(&raw)
        .map_err(|e| CliError::Config { context: "driver", detail: format!("'{}': {e}", path.display()) })?;
    Ok(DriverFile { name: header.name, raw })
}

fn write_result(path: &Path, result: &TestResult) -> Result<(), CliError> {
    let output = |source| CliError::Output { path: path.display().to_string(), source };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(output)?;
    }
    let json = serde_json::to_vec_pretty(result).map_err(|e| output(e.into()))?;
    std::fs::write(path, json).map_err(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_name_defaults_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("max-rate-1-topic.toml");
        std::fs::write(&path, "topics = 1\nmessage_size = 64\nuse_randomized_payloads = true").unwrap();
        assert_eq!(load_workload(&path).unwrap().name, "max-rate-1-topic");
    }

    #[test]
    fn invalid_workload_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "message_size = 64\nuse_randomized_payloads = true").unwrap();
        assert!(matches!(load_workload(&path), Err(CliError::Config { context: "workload", .. })));
    }

    #[test]
    fn driver_name_comes_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loopback.toml");
        std::fs::write(&path, "name = \"Loopback\"\ndriver = \"loopback\"\n[config]\ntopic_prefix = \"t\"").unwrap();
        let driver = load_driver(&path).unwrap();
        assert_eq!(driver.name, "Loopback");
        assert!(!driver.raw.is_empty());
    }

    #[test]
    fn result_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("r.json");
        let result = TestResult { workload: "w".into(), driver: "d".into(), ..Default::default() };
        write_result(&path, &result).unwrap();
        let back: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back["workload"], "w");
    }

    #[test]
    fn single_worker_ensemble_is_rejected() {
        let settings = RunSettings {
            drivers: vec!["d.toml".into()],
            workers: vec!["http://only:8080".into()],
            topology: Topology::Ensemble,
            extra_consumers: false,
            output: None,
            output_dir: PathBuf::from("."),
            service_version: None,
            workloads: vec!["w.toml".into()],
        };
        assert!(build_worker(&settings).is_err());
    }
}
