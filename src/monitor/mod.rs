pub mod watcher;

use std::sync::Arc;

use anyhow::Result;

use crate::shared::Services;

pub async fn run(services: Arc<Services>) -> Result<()> {
    tracing::info!("Starting nbpod monitor...");
    watcher::watch_events(services.runtime.as_ref(), &services.handlers).await
}
