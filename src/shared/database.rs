use anyhow::{anyhow, Result};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tracing::{error, info, warn};

/// Connects to MySQL and applies the embedded migrations unless
/// `SKIP_MIGRATIONS` is set.
pub async fn init_database(database_url: &str) -> Result<MySqlPool> {
    info!("Initializing database connection");

    let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            anyhow!("Database not available: {}", e)
        })?;

    if std::env::var("SKIP_MIGRATIONS").is_ok() {
        info!("Skipping migrations (SKIP_MIGRATIONS set)");
        return Ok(pool);
    }

    match sqlx::migrate!("./db/migrations").run(&pool).await {
        Ok(_) => info!("Database migrations completed"),
        Err(e) if e.to_string().contains("applied before") => {
            warn!("Migration already applied, continuing: {}", e);
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            return Err(anyhow!("Database migration failed: {}", e));
        }
    }

    Ok(pool)
}
