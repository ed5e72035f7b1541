use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

#[path = "../monitor/mod.rs"]
mod monitor;
#[path = "../shared/mod.rs"]
mod shared;

#[derive(Parser)]
#[command(name = "nbpod-monitor")]
#[command(about = "nbpod Monitor - turns container events into pod lifecycle notifications")]
struct Args {
    /// Redis URL for the state cache, pub/sub and job queue
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// MySQL URL for the event log
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Directory for rolling log files
    #[arg(long, env = "NBPOD_LOG_DIR", default_value = "/app/logs")]
    log_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _guard = shared::logging::init_service_logging(&args.log_dir, "nbpod_monitor");

    let (config, config_path) = shared::config::NbpodConfig::load_default()?;
    tracing::info!("Loaded configuration from {}", config_path.display());

    let services = Arc::new(
        shared::Services::connect(config, &args.redis_url, &args.database_url).await?,
    );

    // The event stream ends when the daemon restarts; reattach after a pause
    loop {
        match monitor::run(services.clone()).await {
            Ok(()) => tracing::warn!("Event watcher returned, restarting..."),
            Err(e) => tracing::error!("Event watcher crashed with error: {}", e),
        }

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        tracing::info!("Restarting event watcher...");
    }
}
