mod config;

use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use fleet::{Fleet, FleetError};
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use relay::errors::RelayError;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Gateway in front of a fleet of bot backends")]
enum CliCommand {
    /// Start the gateway
    Run(ConfigArgs),
    /// Check a config file and exit
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fleet(#[from] FleetError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("could not set up statsd: {0}")]
    Statsd(#[from] StatsdError),
    #[error("could not install metrics recorder: {0}")]
    MetricsRecorder(String),
}

fn main() -> Result<(), CliError> {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Validate(args) => {
            let config = Config::from_file(&args.config_file_path)?;
            config.validate()?;
            println!("{} is valid", args.config_file_path.display());
            Ok(())
        }
        CliCommand::Run(args) => {
            let config = Config::from_file(&args.config_file_path)?;
            config.validate()?;

            // Sentry must be initialized before the runtime starts its threads
            let _sentry = init_logging(&config.logging);
            if let Some(metrics_config) = &config.metrics {
                init_metrics(metrics_config)?;
            }
            shared::metrics_defs::describe_all(fleet::metrics_defs::ALL_METRICS);
            shared::metrics_defs::describe_all(relay::metrics_defs::ALL_METRICS);

            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let result = rt.block_on(run(config));
            if let Err(e) = &result {
                tracing::error!(error = %e, "gateway stopped");
            }
            result
        }
    }
}

async fn run(config: Config) -> Result<(), CliError> {
    let fleet = Fleet::new(config.fleet)?;
    fleet.start();

    tokio::select! {
        result = relay::run(fleet, config.relay) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let sentry_guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            sentry_guard
                .as_ref()
                .map(|_| sentry::integrations::tracing::layer()),
        )
        .init();

    sentry_guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(&config.prefix))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::MetricsRecorder(e.to_string()))?;
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
