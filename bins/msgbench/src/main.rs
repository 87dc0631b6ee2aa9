mod cmd;
mod config;
mod error;

use clap::Parser;
use config::{Cli, Commands, RunSettings, WorkerSettings};
use error::CliError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let cfg = config::load_config(&cli.config)?;
    match cli.command {
        Commands::Run(args) => cmd::run::run(RunSettings::new(&args, cfg)?).await,
        Commands::Worker(args) => cmd::worker::run(WorkerSettings::new(&args, &cfg)).await,
    }
}
