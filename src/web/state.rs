use std::sync::Arc;

use crate::shared::cache::CacheKey;
use crate::shared::Services;
use crate::web::error::{ApiError, ApiResult};
use crate::web::forward::HttpForwarder;
use crate::web::master::MasterRegistry;
use crate::web::mirror::MirrorRegistry;

pub struct WebState {
    pub services: Arc<Services>,
    pub jwt_secret: String,
    pub masters: MasterRegistry,
    pub mirrors: Arc<MirrorRegistry>,
    pub forwarder: HttpForwarder,
}

impl WebState {
    pub fn new(services: Arc<Services>, jwt_secret: String) -> Self {
        let forwarder = HttpForwarder::new(services.config.relay.forwarded_proto.clone());
        Self {
            services,
            jwt_secret,
            masters: MasterRegistry::default(),
            mirrors: Arc::new(MirrorRegistry::default()),
            forwarder,
        }
    }

    /// Relays stay closed until the pod's address has been recorded.
    pub async fn container_host(&self, uid: &str) -> ApiResult<String> {
        self.services
            .cache
            .get(uid, CacheKey::ContainerHost)
            .await?
            .ok_or(ApiError::NotReady)
    }
}
