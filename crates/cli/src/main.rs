mod commands;
mod metrics;
mod stdout;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use linecaster_core::{
    load_config, load_config_from_env, validate_config, Config, Distributor, LoggingConfig,
    ProgressStore, SqliteProgressStore,
};

use stdout::StdoutInbox;

/// Linecaster - deliver a text line by line to a rotation of recipients
#[derive(Parser)]
#[command(name = "linecaster")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file; defaults and LINECASTER_* variables are used without it
    #[arg(long, env = "LINECASTER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Write engine metrics in Prometheus text format to this file on exit
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a job and print each delivery as a JSON line until it finishes
    Run(commands::RunArgs),

    /// Print the durable queue history as JSON
    History {
        /// Owner whose jobs are listed (defaults to distributor.default_owner)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Resume jobs the database still marks running
    Resume,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => load_config_from_env().context("Failed to load config from environment")?,
    };
    validate_config(&config).context("Configuration validation failed")?;

    init_logging(&config.logging);
    info!("Database path: {:?}", config.database.path);

    let store: Arc<dyn ProgressStore> = Arc::new(
        SqliteProgressStore::new(&config.database.path)
            .context("Failed to open progress store")?,
    );

    let result = match cli.command {
        Commands::Run(args) => {
            let owner = args.owner.clone().unwrap_or_else(|| default_owner(&config));
            let recipients = StdoutInbox::with_recipients(args.targets.iter().cloned());
            let distributor = distributor(&config, store, recipients);
            commands::run(&distributor, &owner, args).await
        }
        Commands::History { owner } => {
            let owner = owner.unwrap_or_else(|| default_owner(&config));
            let distributor = distributor(&config, store, StdoutInbox::open());
            commands::history(&distributor, &owner).await
        }
        Commands::Resume => {
            let distributor = distributor(&config, store, StdoutInbox::open());
            commands::resume(&distributor).await
        }
    };

    if let Some(path) = &cli.metrics_out {
        let text = metrics::encode_metrics()?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write metrics to {:?}", path))?;
        info!("Metrics written to {:?}", path);
    }

    result
}

fn distributor(config: &Config, store: Arc<dyn ProgressStore>, recipients: StdoutInbox) -> Distributor {
    Distributor::new(config.distributor.clone(), store, Arc::new(recipients))
}

fn default_owner(config: &Config) -> String {
    config.distributor.default_owner.clone()
}

/// Logs go to stderr; stdout carries deliveries and command output.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let json_layer = config
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!config.json).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "linecaster",
            "run",
            "--text-file",
            "poem.txt",
            "--interval",
            "5",
            "--lines",
            "3",
            "--target",
            "alice",
            "--target",
            "bob",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.text_file, PathBuf::from("poem.txt"));
                assert_eq!(args.interval, 5);
                assert_eq!(args.lines, 3);
                assert_eq!(args.targets, vec!["alice", "bob"]);
                assert!(args.owner.is_none());
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_history_with_owner() {
        let cli = Cli::try_parse_from(["linecaster", "history", "--owner", "ops"]).unwrap();
        assert!(matches!(cli.command, Commands::History { owner: Some(ref o) } if o == "ops"));
    }

    #[test]
    fn test_parse_global_metrics_out() {
        let cli =
            Cli::try_parse_from(["linecaster", "resume", "--metrics-out", "metrics.prom"]).unwrap();
        assert_eq!(cli.metrics_out, Some(PathBuf::from("metrics.prom")));
    }
}
