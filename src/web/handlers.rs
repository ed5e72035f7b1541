use std::sync::Arc;

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::shared::cache::CacheKey;
use crate::shared::models::EventRecord;
use crate::shared::transitions::PodState;
use crate::web::error::{ApiError, ApiResult};
use crate::web::middleware::AuthContext;
use crate::web::state::WebState;

const DEFAULT_EVENT_LIMIT: u32 = 50;
const MAX_EVENT_LIMIT: u32 = 500;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct PodStatusResponse {
    pub uid: String,
    pub container_running: bool,
    pub notebook_running: bool,
    pub simulator_running: bool,
    pub container_host: Option<String>,
    pub update_available: bool,
    pub open_relays: usize,
    pub master_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<u32>,
}

pub async fn get_session(Extension(auth): Extension<AuthContext>) -> Json<SessionResponse> {
    Json(SessionResponse {
        session_id: auth.uid,
    })
}

pub async fn pod_status(
    State(state): State<Arc<WebState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<PodStatusResponse>> {
    let services = &state.services;
    let pod = PodState::from_cache(services.cache.as_ref(), &auth.uid).await?;
    let container_host = services.cache.get(&auth.uid, CacheKey::ContainerHost).await?;

    let update_available = match services.pods.check_update_available(&auth.uid).await {
        Ok(available) => available,
        Err(e) => {
            warn!("Update check for {} failed: {}", auth.uid, e);
            false
        }
    };

    Ok(Json(PodStatusResponse {
        uid: auth.uid.clone(),
        container_running: pod.container,
        notebook_running: pod.notebook,
        simulator_running: pod.simulator,
        container_host,
        update_available,
        open_relays: state.mirrors.count_for(&auth.uid),
        master_sessions: state.masters.count_for(&auth.uid),
    }))
}

pub async fn upgrade_pod(
    State(state): State<Arc<WebState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    if !auth.can_demo {
        return Err(ApiError::Forbidden("demo access required".to_string()));
    }

    info!("Upgrade requested by {}", auth.uid);
    state.services.pods.update_pod(&auth.uid).await?;
    Ok(Json(serde_json::json!({"upgraded": true})))
}

pub async fn reset_session(
    State(state): State<Arc<WebState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    info!("Clearing cached state for {}", auth.uid);
    state.services.cache.clear(&auth.uid).await?;
    state.forwarder.forget(&auth.uid);
    Ok(Json(serde_json::json!({"cleared": true})))
}

pub async fn list_events(
    State(state): State<Arc<WebState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<EventRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    if limit == 0 || limit > MAX_EVENT_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_EVENT_LIMIT
        )));
    }

    let records = state.services.events.recent(&auth.uid, limit).await?;
    Ok(Json(records))
}

pub async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api": "v0"
    }))
}
