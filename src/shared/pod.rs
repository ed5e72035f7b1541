use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::shared::config::PodSettings;
use crate::shared::event_log::EventLog;
use crate::shared::models::constants::{container_name, volume_name};
use crate::shared::models::EventCode;
use crate::shared::runtime::{ContainerRuntime, ContainerSpec, ResourceLimits, RuntimeError};

#[derive(Debug, Error)]
pub enum PodError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// A caller skipped `ensure_pod`; not recoverable by the user.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

/// Owns the volume + container pair of each user.
pub struct PodManager {
    runtime: Arc<dyn ContainerRuntime>,
    events: Arc<dyn EventLog>,
    settings: PodSettings,
}

impl PodManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        events: Arc<dyn EventLog>,
        settings: PodSettings,
    ) -> Self {
        Self {
            runtime,
            events,
            settings,
        }
    }

    pub fn container_spec(&self, uid: &str) -> ContainerSpec {
        let name = container_name(uid);

        let mut labels = HashMap::new();
        labels.insert("nbpod.uid".to_string(), uid.to_string());
        labels.insert("nbpod.managed".to_string(), "true".to_string());

        let limits = self.settings.production.then(|| ResourceLimits {
            memory_bytes: self.settings.memory_bytes,
            nano_cpus: (self.settings.cpus * 1_000_000_000.0) as i64,
            runtime: self.settings.sandbox_runtime.clone(),
        });

        ContainerSpec {
            hostname: name.clone(),
            name,
            image: self.settings.image.clone(),
            network: self.settings.network.clone(),
            volume: volume_name(uid),
            mount_path: self.settings.mount_path.clone(),
            platform: self.settings.platform.clone(),
            labels,
            limits,
        }
    }

    /// Creates whatever part of the pod is missing. Never starts anything.
    pub async fn ensure_pod(&self, uid: &str) -> Result<(), PodError> {
        let volume = volume_name(uid);
        if !self.runtime.volume_exists(&volume).await? {
            info!("Creating volume {} for {}", volume, uid);
            let mut labels = HashMap::new();
            labels.insert("nbpod.uid".to_string(), uid.to_string());
            labels.insert(
                "nbpod.created_at".to_string(),
                chrono::Utc::now().to_rfc3339(),
            );
            self.runtime.create_volume(&volume, labels).await?;
        }

        let name = container_name(uid);
        if self.runtime.inspect_container(&name).await?.is_none() {
            info!("Creating container {} for {}", name, uid);
            self.runtime
                .create_container(&self.container_spec(uid))
                .await?;
        }

        Ok(())
    }

    /// Starts an existing pod; a missing volume or container is a
    /// precondition failure.
    pub async fn run_pod(&self, uid: &str) -> Result<(), PodError> {
        let volume = volume_name(uid);
        if !self.runtime.volume_exists(&volume).await? {
            error!("run_pod called for {} without volume {}", uid, volume);
            return Err(PodError::Precondition(format!(
                "volume {} doesn't exist for {}",
                volume, uid
            )));
        }

        let name = container_name(uid);
        let status = self.runtime.inspect_container(&name).await?.ok_or_else(|| {
            error!("run_pod called for {} without container {}", uid, name);
            PodError::Precondition(format!("container {} doesn't exist for {}", name, uid))
        })?;

        if status.running {
            info!("Container {} already running", name);
            return Ok(());
        }

        self.runtime.start_container(&name).await?;
        Ok(())
    }

    /// True when the container was created from an image other than the one
    /// the configured tag points at now.
    pub async fn check_update_available(&self, uid: &str) -> Result<bool, PodError> {
        let current = self.runtime.image_id(&self.settings.image).await?;

        let name = container_name(uid);
        let status = self
            .runtime
            .inspect_container(&name)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("container {}", name)))?;

        Ok(status.image_id != current)
    }

    /// Recreates the container from the current image, keeping the volume.
    pub async fn update_pod(&self, uid: &str) -> Result<(), PodError> {
        if let Err(e) = self.events.append(uid, EventCode::ContainerUpgrade).await {
            warn!("Failed to record upgrade event for {}: {}", uid, e);
        }

        let name = container_name(uid);
        info!("Upgrading container {}", name);

        match self.runtime.stop_container(&name).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(e) => {
                error!("Failed to stop container {}: {}", name, e);
                return Err(e.into());
            }
        }

        match self.runtime.remove_container(&name).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(e) => {
                error!("Failed to remove container {}: {}", name, e);
                return Err(e.into());
            }
        }

        // The monitor observes the new container's start and notifies clients.
        self.ensure_pod(uid).await?;
        self.run_pod(uid).await
    }
}
