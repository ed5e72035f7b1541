use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::shared::handlers::EventHandlers;
use crate::shared::models::constants::container_name;
use crate::shared::readiness::{Readiness, ReadinessDetector};
use crate::shared::runtime::ContainerRuntime;
use crate::shared::transitions::Signal;

/// How far back the tail starts, to catch output written before the job ran.
const LOOKBACK_SECS: i64 = 5;
/// The kernel prints its banner slightly before it accepts connections.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailOutcome {
    Ready,
    /// The line that aborted the tail.
    Failed(String),
    /// Output ended without a verdict.
    Ended,
}

/// Follows a freshly started container's output until the notebook server
/// reports it is listening.
pub async fn tail_container(
    runtime: &dyn ContainerRuntime,
    handlers: &EventHandlers,
    detector: &dyn ReadinessDetector,
    uid: &str,
) -> Result<TailOutcome> {
    let name = container_name(uid);
    let since = Utc::now().timestamp() - LOOKBACK_SECS;
    info!("Tailing {} for readiness", name);

    let mut lines = runtime.logs(&name, since);
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Log stream for {} failed: {}", name, e);
                return Ok(TailOutcome::Ended);
            }
        };

        match detector.detect(&line) {
            Some(Readiness::NotebookListening) => {
                tokio::time::sleep(SETTLE_DELAY).await;
                handlers.handle(uid, Signal::NotebookStarted).await?;
                return Ok(TailOutcome::Ready);
            }
            Some(Readiness::Failed(line)) => return Ok(TailOutcome::Failed(line)),
            Some(Readiness::SimulatorListening) | None => {
                debug!("{}: {}", name, line);
            }
        }
    }

    Ok(TailOutcome::Ended)
}
