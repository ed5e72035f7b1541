pub mod tailer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::shared::jobs::Job;
use crate::shared::readiness::KernelLogDetector;
use crate::shared::Services;

use tailer::{tail_container, TailOutcome};

pub async fn run(services: Arc<Services>) -> Result<()> {
    info!("Worker started, polling for jobs...");

    loop {
        match services.jobs.dequeue().await {
            Ok(Some(job)) => {
                // Tails can run for minutes; never let one block the queue.
                let services = services.clone();
                tokio::spawn(async move {
                    if let Err(e) = process_job(&services, &job).await {
                        error!(uid = job.uid(), "Job {:?} failed: {}", job, e);
                    }
                });
            }
            Ok(None) => sleep(Duration::from_millis(250)).await,
            Err(e) => {
                error!("Error polling job queue: {}", e);
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

pub async fn process_job(services: &Services, job: &Job) -> Result<()> {
    match job {
        Job::RunPod { uid } => {
            info!("Running pod for {}", uid);
            services.pods.ensure_pod(uid).await?;
            services.pods.run_pod(uid).await?;
        }
        Job::MonitorContainer { uid } => {
            let outcome = tail_container(
                services.runtime.as_ref(),
                &services.handlers,
                &KernelLogDetector,
                uid,
            )
            .await?;
            match outcome {
                TailOutcome::Ready => info!("Notebook ready for {}", uid),
                TailOutcome::Failed(line) => {
                    warn!("Notebook for {} failed to start: {}", uid, line)
                }
                TailOutcome::Ended => warn!("Log stream for {} ended before readiness", uid),
            }
        }
    }
    Ok(())
}
