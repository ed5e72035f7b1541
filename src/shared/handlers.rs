use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::shared::cache::StateCache;
use crate::shared::event_log::EventLog;
use crate::shared::jobs::{Job, JobQueue};
use crate::shared::models::{EventCode, PodEvent};
use crate::shared::pod::PodManager;
use crate::shared::pubsub::Broadcaster;
use crate::shared::transitions::{transitions, Signal};

/// Records, broadcasts and caches lifecycle signals coming from the monitor,
/// the log tailer and the relay observer.
pub struct EventHandlers {
    cache: Arc<dyn StateCache>,
    events: Arc<dyn EventLog>,
    broadcaster: Arc<dyn Broadcaster>,
    jobs: Arc<dyn JobQueue>,
    pods: Arc<PodManager>,
}

impl EventHandlers {
    pub fn new(
        cache: Arc<dyn StateCache>,
        events: Arc<dyn EventLog>,
        broadcaster: Arc<dyn Broadcaster>,
        jobs: Arc<dyn JobQueue>,
        pods: Arc<PodManager>,
    ) -> Self {
        Self {
            cache,
            events,
            broadcaster,
            jobs,
            pods,
        }
    }

    pub async fn handle(&self, uid: &str, signal: Signal) -> Result<()> {
        info!(uid, ?signal, "Handling lifecycle signal");

        let mut undelivered = 0;
        for transition in transitions(signal) {
            // Cleared flags must never outlive the notification that clears them.
            if let Some((key, false)) = transition.flag {
                self.cache.set_flag(uid, key, false).await?;
            }

            if let Err(e) = self.events.append(uid, transition.code).await {
                warn!(uid, code = %transition.code, "Failed to append event: {}", e);
            }

            let event = self.payload(uid, transition.code).await;
            // The cache stays authoritative for clients that miss the event.
            if let Err(e) = self.broadcaster.publish(uid, &event).await {
                warn!(uid, code = %transition.code, "Failed to publish event: {}", e);
                undelivered += 1;
            }

            // A client that reads the flag must also be able to see the event.
            if let Some((key, true)) = transition.flag {
                self.cache.set_flag(uid, key, true).await?;
            }
        }

        if signal == Signal::ContainerStarted {
            self.jobs
                .enqueue(Job::MonitorContainer {
                    uid: uid.to_string(),
                })
                .await?;
        }

        if undelivered > 0 {
            bail!("{} of the {:?} notifications for {} were not delivered", undelivered, signal, uid);
        }
        Ok(())
    }

    async fn payload(&self, uid: &str, code: EventCode) -> PodEvent {
        let event = PodEvent::new(code);
        if code != EventCode::ContainerStarted {
            return event;
        }

        let update_available = match self.pods.check_update_available(uid).await {
            Ok(available) => available,
            Err(e) => {
                warn!(uid, "Update check failed: {}", e);
                false
            }
        };
        event.with("update_available", update_available)
    }
}
