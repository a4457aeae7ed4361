use anyhow::Context;
use clap::Parser;
use dx_spot_watcher::config::Config;
use dx_spot_watcher::services::Supervisor;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dx-spot-watcher", about = "DX cluster spot ingestion and enrichment")]
struct Cli {
    /// Settings file (INI). Defaults to the per-user config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds between status reports
    #[arg(long, default_value = "300")]
    report_interval: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    let config = Config::load(cli.config.as_deref());
    info!(
        "Watching {} spots for up to {:?}, watchlist: {}",
        config.spots.max_spots,
        config.spots.max_age,
        config.watchlist.join(", ")
    );

    let supervisor = Supervisor::launch(config).await;

    let mut report = tokio::time::interval(Duration::from_secs(cli.report_interval.max(1)));
    report.tick().await;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Shutting down...");
                break;
            }
            _ = report.tick() => {
                let status = supervisor.status();
                info!(
                    "Status: {} via {} | cluster spots {} | simulated {} | stored {} | prefixes {}{}",
                    if status.connected { "connected" } else { "disconnected" },
                    status.current_endpoint,
                    status.cluster_spot_count,
                    status.simulated_spot_count,
                    supervisor.store().len(),
                    status.prefix_count,
                    status
                        .last_error
                        .map(|e| format!(" | last error: {}", e))
                        .unwrap_or_default()
                );
            }
        }
    }

    supervisor.shutdown().await;
    Ok(())
}
