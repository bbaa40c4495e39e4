use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use floodgate::config::{FloodgateConfig, LogFormat};
use floodgate::ratelimit::RateLimiter;
use floodgate::replay::Replayer;

/// Replay request lines from stdin through the rate limiter.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
struct Args {
    /// Configuration file (YAML); FLOODGATE__* env vars override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format, overriding the configuration file
    #[arg(long, value_enum)]
    log_format: Option<CliLogFormat>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Text,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Text => LogFormat::Text,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = FloodgateConfig::load(args.config.as_deref())?;

    init_tracing(&config, args.log_format.map(Into::into));

    info!("Starting Floodgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let policies = config.policy_set()?;
    config.limiter.check_policies(&policies);
    info!(
        policies = policies.len(),
        cleanup_interval_ms = config.limiter.cleanup_interval_ms,
        retention_horizon_ms = config.limiter.retention_horizon_ms,
        failure_mode = ?config.limiter.failure_mode,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::new(config.limiter.clone())?);
    limiter.start_cleanup()?;

    let replayer = Replayer::new(limiter.clone(), policies);
    let result = tokio::select! {
        result = replay_stdin(&replayer) => result,
        _ = shutdown_signal() => Ok(()),
    };

    limiter.stop_cleanup().await;
    info!(identifiers = limiter.identifier_count(), "Floodgate stopped");
    result
}

fn init_tracing(config: &FloodgateConfig, format_override: Option<LogFormat>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format_override.unwrap_or(config.logging.format) {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_thread_ids(true).init(),
    }
}

/// Check every stdin line and print one JSON decision per line.
async fn replay_stdin(replayer: &Replayer) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        match replayer.handle_line(&line) {
            Ok(Some(output)) => {
                stdout.write_all(&output.to_json_line()?).await?;
                stdout.flush().await?;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, line = %line, "Skipping input line"),
        }
    }

    info!("End of input");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
