use anyhow::Result;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::shared::handlers::EventHandlers;
use crate::shared::models::constants::uid_from_container_name;
use crate::shared::runtime::{ContainerRuntime, RuntimeEvent};
use crate::shared::transitions::Signal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub uid: String,
    pub signal: Signal,
}

/// Maps a runtime event to the pod signal it stands for, if any.
pub fn classify(event: &RuntimeEvent) -> Option<Classified> {
    if event.kind != "container" {
        return None;
    }

    let uid = uid_from_container_name(event.actor_name()?)?;
    let signal = match event.action.as_str() {
        "start" => Signal::ContainerStarted,
        "stop" | "die" => Signal::ContainerStopped,
        "destroy" => Signal::ContainerDestroyed,
        _ => return None,
    };

    Some(Classified {
        uid: uid.to_string(),
        signal,
    })
}

/// Consumes the runtime's event stream until it ends. Bad items and handler
/// failures are logged; they never stop the watcher.
pub async fn watch_events(runtime: &dyn ContainerRuntime, handlers: &EventHandlers) -> Result<()> {
    info!("Watching container events");
    let mut events = runtime.events();

    while let Some(item) = events.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping unreadable container event: {}", e);
                continue;
            }
        };

        let Some(Classified { uid, signal }) = classify(&event) else {
            debug!(
                "Ignoring {} {} for {:?}",
                event.kind,
                event.action,
                event.actor_name()
            );
            continue;
        };

        if let Err(e) = handlers.handle(&uid, signal).await {
            error!(uid, ?signal, "Failed to handle container event: {}", e);
        }
    }

    warn!("Container event stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::jobs::Job;
    use crate::shared::models::EventCode;
    use crate::shared::testing::Harness;
    use std::collections::HashMap;

    fn event(kind: &str, action: &str, name: &str) -> RuntimeEvent {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), name.to_string());
        RuntimeEvent {
            kind: kind.to_string(),
            action: action.to_string(),
            actor: crate::shared::runtime::EventActor { attributes },
        }
    }

    #[test]
    fn only_owned_containers_are_classified() {
        assert_eq!(
            classify(&event("container", "start", "nb-u1")),
            Some(Classified {
                uid: "u1".into(),
                signal: Signal::ContainerStarted
            })
        );
        assert_eq!(
            classify(&event("container", "die", "nb-u1")).map(|c| c.signal),
            Some(Signal::ContainerStopped)
        );
        assert_eq!(
            classify(&event("container", "destroy", "nb-u1")).map(|c| c.signal),
            Some(Signal::ContainerDestroyed)
        );
        assert_eq!(classify(&event("container", "start", "mysql")), None);
        assert_eq!(classify(&event("container", "exec_start", "nb-u1")), None);
        assert_eq!(classify(&event("network", "connect", "nb-u1")), None);
    }

    #[tokio::test]
    async fn start_event_drives_the_lifecycle() {
        let h = Harness::new();
        h.services.pods.ensure_pod("u1").await.unwrap();
        h.runtime.push_event(event("container", "start", "nb-u1"));

        watch_events(h.services.runtime.as_ref(), &h.services.handlers)
            .await
            .unwrap();

        let published = h.broadcaster.published("u1");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event, EventCode::ContainerStarted);
        assert_eq!(
            h.jobs.pending(),
            vec![Job::MonitorContainer { uid: "u1".into() }]
        );
    }

    #[tokio::test]
    async fn stream_errors_and_foreign_events_are_skipped() {
        let h = Harness::new();
        h.runtime.push_event_error("connection reset");
        h.runtime.push_event(event("container", "start", "redis"));
        h.runtime.push_event(event("container", "stop", "nb-u2"));

        watch_events(h.services.runtime.as_ref(), &h.services.handlers)
            .await
            .unwrap();

        assert!(h.broadcaster.published("redis").is_empty());
        assert_eq!(h.broadcaster.published("u2").len(), 3);
    }
}
