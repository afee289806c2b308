//! mirror-sync
//!
//! Mirrors one configured store into another until interrupted.
//!
//! ```text
//! mirror-sync [--config disy.yml] [--verbose] <SOURCE> <DEST>
//! ```
//!
//! Exit status: `0` after Ctrl-C, `2` on configuration errors, `1` when a
//! store cannot be opened.

use clap::Parser;
use mirror_sync::config::DEFAULT_CONFIG_PATH;
use mirror_sync::{MirrorConfig, MirrorError, Registry, Synchronizer};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Keep a destination store equal to a source store.
#[derive(Parser)]
#[command(name = "mirror-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Name of the store to read from
    source: String,

    /// Name of the store to make equal to the source
    dest: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = MirrorConfig::load(&cli.config);
    let log_file = config.as_ref().ok().and_then(|c| c.log_file.clone());
    if let Err(e) = init_logging(cli.verbose, log_file.as_deref()) {
        eprintln!("cannot open log file: {e}");
        return ExitCode::from(2);
    }

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "Cannot load configuration");
            return ExitCode::from(2);
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ MirrorError::Config(_)) => {
            error!(error = %e, "Invalid configuration");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "Startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: MirrorConfig) -> mirror_sync::Result<()> {
    if cli.source == cli.dest {
        return Err(MirrorError::Config(format!(
            "source and destination are both {}",
            cli.source
        )));
    }

    let registry = Registry::new(config);
    registry.config().validate_store(&cli.source)?;
    registry.config().validate_store(&cli.dest)?;

    let source = registry.build(&cli.source).await?;
    let dest = registry.build(&cli.dest).await?;
    info!(source = %cli.source, dest = %cli.dest, "Mirroring");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            let _ = shutdown_tx.send(true);
        }
    });

    Synchronizer::new(source, dest, registry.pass_timing())
        .run(shutdown_rx)
        .await;
    Ok(())
}

fn init_logging(verbose: bool, log_file: Option<&str>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
