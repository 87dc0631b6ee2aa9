use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::error::CliError;

/// Файл со списком узлов, если `--workers` не задан.
pub const DEFAULT_WORKERS_FILE: &str = "workers.toml";
pub const DEFAULT_WORKER_PORT: u16 = 8080;

#[derive(Parser)]
#[command(name = "msgbench", about = "Нагрузочное тестирование messaging систем")]
pub struct Cli {
    /// Путь к msgbench.toml (необязательный)
    #[arg(long, default_value = "msgbench.toml", env = "MSGBENCH_CONFIG", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Прогнать workload'ы на драйверах
    Run(RunArgs),
    /// Поднять worker узел (LocalWorker за HTTP)
    Worker(WorkerArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Узлы делятся на producer'ов и consumer'ов
    Ensemble,
    /// Каждый узел и пишет, и читает
    Swarm,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Конфиг файлы драйверов, через запятую
    #[arg(long, value_delimiter = ',')]
    pub drivers: Vec<String>,

    /// URL'ы worker узлов, через запятую
    #[arg(long, value_delimiter = ',', conflicts_with = "workers_file")]
    pub workers: Vec<String>,

    /// TOML файл со списком узлов (`workers = [...]`)
    #[arg(long)]
    pub workers_file: Option<String>,

    #[arg(long, value_enum)]
    pub topology: Option<Topology>,

    /// Больше consumer узлов, чем producer узлов (только ensemble)
    #[arg(long)]
    pub extra_consumers: bool,

    /// Файл результата (только для одной пары workload × driver)
    #[arg(long)]
    pub output: Option<String>,

    /// Каталог для файлов результатов
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Версия тестируемого сервиса, попадает в результат
    #[arg(long, env = "SERVICE_VERSION")]
    pub service_version: Option<String>,

    /// Workload файлы (TOML)
    #[arg(required = true)]
    pub workloads: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct WorkerArgs {
    /// HTTP порт worker API
    #[arg(long, env = "WORKER_PORT")]
    pub port: Option<u16>,
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub drivers: Vec<String>,
    #[serde(default)]
    pub workers: Vec<String>,
    pub workers_file: Option<String>,
    pub topology: Option<Topology>,
    pub extra_consumers: Option<bool>,
    pub output_dir: Option<String>,
    pub service_version: Option<String>,
    #[serde(default)]
    pub worker: WorkerSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkerSection {
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct WorkersFile {
    workers: Vec<String>,
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path)
        .map_err(|e| CliError::Config { context: "read", detail: format!("'{}': {e}", path.display()) })
}

/// Отсутствующий файл = пустой конфиг, битый = ошибка.
pub fn load_config(path: &str) -> Result<Config, CliError> {
    let path = Path::new(path);
    if !path.exists() {
        return Ok(Config::default());
    }
    toml::from_str(&read(path)?)
        .map_err(|e| CliError::Config { context: "parse", detail: format!("'{}': {e}", path.display()) })
}

pub fn load_workers_file(path: &Path) -> Result<Vec<String>, CliError> {
    let file: WorkersFile = toml::from_str(&read(path)?)
        .map_err(|e| CliError::Config { context: "workers", detail: format!("'{}': {e}", path.display()) })?;
    Ok(file.workers)
}

// ═══════════════════════════════════════════════════════════════
//  Effective — merged config
// ═══════════════════════════════════════════════════════════════

/// Итоговые настройки `run`: msgbench.toml < env/CLI.
#[derive(Debug)]
pub struct RunSettings {
    pub drivers: Vec<String>,
    /// Пусто = локальный прогон в этом процессе.
    pub workers: Vec<String>,
    pub topology: Topology,
    pub extra_consumers: bool,
    pub output: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub service_version: Option<String>,
    pub workloads: Vec<String>,
}

impl RunSettings {
    pub fn new(args: &RunArgs, cfg: Config) -> Result<Self, CliError> {
        let drivers = if args.drivers.is_empty() { cfg.drivers } else { args.drivers.clone() };
        if drivers.is_empty() {
            return Err(CliError::Config { context: "drivers", detail: "no driver files given".into() });
        }

        let workers = if !args.workers.is_empty() {
            args.workers.clone()
        } else if let Some(file) = args.workers_file.as_ref().or(cfg.workers_file.as_ref()) {
            load_workers_file(Path::new(file))?
        } else if !cfg.workers.is_empty() {
            cfg.workers
        } else if Path::new(DEFAULT_WORKERS_FILE).exists() {
            load_workers_file(Path::new(DEFAULT_WORKERS_FILE))?
        } else {
            Vec::new()
        };

        let pairs = args.workloads.len() * drivers.len();
        if args.output.is_some() && pairs > 1 {
            return Err(CliError::Config {
                context: "output",
                detail: format!("--output needs exactly one workload and driver, got {pairs} pairs"),
            });
        }

        Ok(Self {
            drivers,
            workers,
            topology: args.topology.or(cfg.topology).unwrap_or(Topology::Ensemble),
            extra_consumers: args.extra_consumers || cfg.extra_consumers.unwrap_or(false),
            output: args.output.as_ref().map(PathBuf::from),
            output_dir: PathBuf::from(args.output_dir.clone().or(cfg.output_dir).unwrap_or_else(|| ".".into())),
            service_version: args.service_version.clone().or(cfg.service_version),
            workloads: args.workloads.clone(),
        })
    }
}

/// Итоговые настройки `worker`.
#[derive(Debug)]
pub struct WorkerSettings {
    pub port: u16,
}

impl WorkerSettings {
    pub fn new(args: &WorkerArgs, cfg: &Config) -> Self {
        Self { port: args.port.or(cfg.worker.port).unwrap_or(DEFAULT_WORKER_PORT) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["msgbench", "run"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            Commands::Worker(_) => unreachable!(),
        }
    }

    #[test]
    fn cli_overrides_config_file() {
        let cfg: Config = toml::from_str(
            r#"
            drivers = ["kafka.toml"]
            workers = ["http://a:8080"]
            topology = "swarm"
            output_dir = "results"
            "#,
        )
        .unwrap();
        let settings = RunSettings::new(
            &args(&["--drivers", "lb.toml", "--workers", "http://x:1,http://y:2", "w.toml"]),
            cfg,
        )
        .unwrap();

        assert_eq!(settings.drivers, vec!["lb.toml"]);
        assert_eq!(settings.workers, vec!["http://x:1", "http://y:2"]);
        assert_eq!(settings.topology, Topology::Swarm);
        assert_eq!(settings.output_dir, PathBuf::from("results"));
    }

    #[test]
    fn workers_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nodes.toml");
        std::fs::write(&file, "workers = [\"http://n1:8080\", \"http://n2:8080\"]").unwrap();

        let settings = RunSettings::new(
            &args(&["--drivers", "lb.toml", "--workers-file", file.to_str().unwrap(), "w.toml"]),
            Config::default(),
        )
        .unwrap();
        assert_eq!(settings.workers.len(), 2);
        assert_eq!(settings.topology, Topology::Ensemble);
    }

    #[test]
    fn drivers_are_required() {
        let err = RunSettings::new(&args(&["w.toml"]), Config::default()).unwrap_err();
        assert!(matches!(err, CliError::Config { context: "drivers", .. }));
    }

    #[test]
    fn single_output_needs_single_pair() {
        let err = RunSettings::new(
            &args(&["--drivers", "a.toml,b.toml", "--output", "r.json", "w.toml"]),
            Config::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::Config { context: "output", .. }));
    }

    #[test]
    fn missing_config_file_is_empty() {
        let cfg = load_config("/no/such/msgbench.toml").unwrap();
        assert!(cfg.drivers.is_empty());
        assert_eq!(WorkerSettings::new(&WorkerArgs { port: None }, &cfg).port, 8080);
    }
}
