use anyhow::Result;
use clap::{Parser, Subcommand};

#[path = "../shared/mod.rs"]
mod shared;
#[path = "../web/mod.rs"]
mod web;

#[derive(Parser)]
#[command(name = "nbpod-web")]
#[command(about = "nbpod Web - master channel, sandbox relays and REST API")]
struct Args {
    /// Address to bind
    #[arg(long, env = "NBPOD_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind
    #[arg(long, env = "NBPOD_PORT", default_value_t = 9000)]
    port: u16,

    /// Redis URL for the state cache, pub/sub and job queue
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// MySQL URL for the event log
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Secret used to verify session tokens
    #[arg(long, env = "JWT_SECRET", default_value = "development-secret-key")]
    jwt_secret: String,

    /// Directory for rolling log files
    #[arg(long, env = "NBPOD_LOG_DIR", default_value = "/app/logs")]
    log_dir: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print a session token for a user
    Token {
        /// User id the token is issued for
        uid: String,

        /// Grant access to the demo endpoints
        #[arg(long)]
        can_demo: bool,

        /// Lifetime in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::Token {
        uid,
        can_demo,
        hours,
    }) = &args.command
    {
        println!(
            "{}",
            web::auth::create_token(uid, *can_demo, &args.jwt_secret, *hours)?
        );
        return Ok(());
    }

    let _guard = shared::logging::init_service_logging(&args.log_dir, "nbpod_web");

    let (config, config_path) = shared::config::NbpodConfig::load_default()?;
    tracing::info!("Loaded configuration from {}", config_path.display());

    let database_url = args
        .database_url
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

    web::api::run_web_server(
        config,
        web::api::WebOptions {
            host: args.host,
            port: args.port,
            redis_url: args.redis_url,
            database_url,
            jwt_secret: args.jwt_secret,
            pid_file: "/tmp/nbpod-web.pid".to_string(),
        },
    )
    .await
}
