use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

#[path = "../shared/mod.rs"]
mod shared;
#[path = "../worker/mod.rs"]
mod worker;

#[derive(Parser)]
#[command(name = "nbpod-worker")]
#[command(about = "nbpod Worker - starts pods and watches them become ready")]
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

    let _guard = shared::logging::init_service_logging(&args.log_dir, "nbpod_worker");

    let (config, config_path) = shared::config::NbpodConfig::load_default()?;
    tracing::info!("Loaded configuration from {}", config_path.display());

    let services = Arc::new(
        shared::Services::connect(config, &args.redis_url, &args.database_url).await?,
    );

    worker::run(services).await
}
