//! Multiple Spanning Tree Daemon
//!
//! Main entry point for the mstpd daemon.
//! Builds the bridge from the daemon configuration file and runs it until
//! SIGINT/SIGTERM.

use anyhow::Context;
use clap::Parser;
use sonic_mstp::InstanceId;
use sonic_mstpd::{BridgeWorker, LogSink, MstpMgr, MstpdConfig, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// SONiC Multiple Spanning Tree daemon
#[derive(Parser, Debug)]
#[command(name = "mstpd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Daemon configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Tick length in milliseconds, overrides the configuration file
    #[arg(long)]
    tick_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("mstpd: Starting multiple spanning tree daemon");

    match run_daemon(args).await {
        Ok(()) => {
            info!("mstpd: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "mstpd: Daemon exiting with error");
            Err(e)
        }
    }
}

/// Initialize structured logging; RUST_LOG wins over `--log-level`.
fn init_logging(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set logger")?;
    Ok(())
}

async fn run_daemon(args: Args) -> anyhow::Result<()> {
    let mut config = MstpdConfig::load_or_default(&args.config)?;
    if let Some(tick_ms) = args.tick_ms {
        config.daemon.tick_ms = tick_ms;
    }
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", args.config.display()))?;

    let bridge = config.build_bridge()?;
    let mgr = MstpMgr::from_config(&config)?;
    let tick = Duration::from_millis(config.daemon.tick_ms);
    info!(
        mac = %config.bridge.mac,
        tick_ms = config.daemon.tick_ms,
        ports = config.ports.len(),
        "mstpd: Bridge initialized"
    );

    let (handle, task) = BridgeWorker::spawn(bridge, mgr, Arc::new(LogSink), Some(tick), config.daemon.queue_depth);

    signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("mstpd: Received shutdown signal");

    if let Ok(state) = handle.query_state(InstanceId::CIST).await {
        info!(state = %serde_json::to_string(&state)?, "mstpd: Final CIST state");
    }
    handle.shutdown().await?;
    task.await.context("bridge worker panicked")?;
    Ok(())
}
