mod config;
mod telemetry;

use clap::{Args, Parser};
use config::{Config, ConfigError};
use shared::metrics_defs::render;
use std::path::PathBuf;
use tenants::Sweeper;

#[derive(Args)]
struct ConfigArgs {
    /// Path to the YAML config file
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(Parser)]
#[command(name = "hookrelay", about = "Multi-tenant webhook relay")]
enum CliCommand {
    /// Run the relay
    Run(ConfigArgs),
    /// Load and validate a config file, then exit
    CheckConfig(ConfigArgs),
    /// List every metric the relay emits
    Metrics,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tenants(#[from] tenants::config::ConfigError),
    #[error(transparent)]
    Telemetry(#[from] telemetry::TelemetryError),
    #[error(transparent)]
    Ingest(#[from] ingest::errors::IngestError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> Result<(), CliError> {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Run(args) => run(Config::from_file(&args.config)?),
        CliCommand::CheckConfig(args) => {
            Config::from_file(&args.config)?.validate()?;
            println!("{}: ok", args.config.display());
            Ok(())
        }
        CliCommand::Metrics => {
            println!("{}", render(tenants::metrics_defs::ALL_METRICS));
            println!("{}", render(ingest::metrics_defs::ALL_METRICS));
            Ok(())
        }
    }
}

fn run(config: Config) -> Result<(), CliError> {
    config.validate()?;

    let _sentry = telemetry::init_logging(&config.logging);
    if let Some(metrics) = &config.metrics {
        telemetry::init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), CliError> {
    let resolver = config.tenants.build_resolver()?;
    let sweeper = Sweeper::spawn(resolver.cache().clone(), config.tenants.sweep_interval());

    tracing::info!("starting hookrelay");
    let result = tokio::select! {
        result = ingest::run(config.ingest, resolver) => result.map_err(CliError::from),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            Ok(())
        }
    };

    sweeper.stop().await;
    result
}
