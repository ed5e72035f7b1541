use anyhow::Result;
use std::fs;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::shared::config::NbpodConfig;
use crate::shared::Services;
use crate::web::routes::create_router;
use crate::web::state::WebState;

pub struct WebOptions {
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub pid_file: String,
}

pub async fn run_web_server(config: NbpodConfig, options: WebOptions) -> Result<()> {
    // Write PID file for process management
    let pid = process::id();
    if let Err(e) = fs::write(&options.pid_file, pid.to_string()) {
        warn!("Could not write PID file: {}", e);
    }

    let pid_file_cleanup = options.pid_file.clone();
    ctrlc::set_handler(move || {
        info!("Shutting down nbpod web...");
        let _ = fs::remove_file(&pid_file_cleanup);
        std::process::exit(0);
    })?;

    info!(
        r#"
       _                     _
 _ __ | |__  _ __   ___   __| |
| '_ \| '_ \| '_ \ / _ \ / _` |
| | | | |_) | |_) | (_) | (_| |
|_| |_|_.__/| .__/ \___/ \__,_|
            |_|
Starting nbpod web service...
PID: {}
"#,
        pid
    );

    let services = match Services::connect(config, &options.redis_url, &options.database_url).await {
        Ok(services) => Arc::new(services),
        Err(e) => {
            error!("Failed to connect backing services: {:#}", e);
            error!("Please ensure Redis, MySQL and Docker are reachable");
            return Err(e);
        }
    };

    let state = Arc::new(WebState::new(services, options.jwt_secret));
    let app = create_router(state);

    let bind_addr = format!("{}:{}", options.host, options.port);
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Master channel: ws://{}/master", bind_addr);
    info!("REST API Endpoint: http://{}/api/v0", bind_addr);
    info!("Ready to accept requests...");

    let result = axum::serve(listener, app).await;

    let _ = fs::remove_file(&options.pid_file);

    result?;
    Ok(())
}
