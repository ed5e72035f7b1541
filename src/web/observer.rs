use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use crate::shared::cache::CacheKey;
use crate::shared::readiness::{KernelOutputDetector, Readiness, ReadinessDetector};
use crate::shared::transitions::Signal;
use crate::shared::Services;
use crate::web::mirror::FrameObserver;

/// Watches kernel output relayed to the browser for the simulator banner and
/// reports the simulator as started, once per relay session.
pub struct SimulatorReadyObserver {
    services: Arc<Services>,
    uid: String,
    host: String,
    fired: AtomicBool,
}

impl SimulatorReadyObserver {
    pub fn new(services: Arc<Services>, uid: String, host: String) -> Self {
        Self {
            services,
            uid,
            host,
            fired: AtomicBool::new(false),
        }
    }
}

impl FrameObserver for SimulatorReadyObserver {
    fn observe(&self, frame: &str) {
        if KernelOutputDetector.detect(frame) != Some(Readiness::SimulatorListening) {
            return;
        }
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }

        let services = self.services.clone();
        let uid = self.uid.clone();
        let ports = services.config.services.clone();
        let simulator_url = format!("ws://{}:{}/", self.host, ports.simulator);
        let file_server_url = format!("http://{}:{}/", self.host, ports.file_server);

        // Frames keep flowing while the signal is recorded.
        tokio::spawn(async move {
            info!("Simulator started for {}", uid);
            let result = async {
                services
                    .cache
                    .set(&uid, CacheKey::SimulatorUrl, &simulator_url)
                    .await?;
                services
                    .cache
                    .set(&uid, CacheKey::FileServerUrl, &file_server_url)
                    .await?;
                services.handlers.handle(&uid, Signal::SimulatorStarted).await
            }
            .await;
            if let Err(e) = result {
                error!("Failed to record simulator start for {}: {}", uid, e);
            }
        });
    }
}
