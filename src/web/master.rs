use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, State,
    },
    response::Response,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::shared::cache::CacheKey;
use crate::shared::jobs::Job;
use crate::shared::models::constants::{container_name, NOTEBOOK_IFRAME_URL, SIMULATOR_IFRAME_URL};
use crate::shared::models::{EventCode, PodEvent};
use crate::shared::pubsub::EventStream;
use crate::shared::transitions::PodState;
use crate::web::middleware::AuthContext;
use crate::web::state::WebState;

struct MasterBinding {
    uid: String,
    token: Uuid,
}

/// Client-chosen master session ids bound to the uid that claimed them.
#[derive(Default)]
pub struct MasterRegistry {
    sessions: DashMap<String, MasterBinding>,
}

impl MasterRegistry {
    /// Claims `session_id` for `uid`. Returns `None` when another user holds it.
    pub fn bind(&self, session_id: &str, uid: &str) -> Option<Uuid> {
        let token = Uuid::new_v4();
        let binding = MasterBinding {
            uid: uid.to_string(),
            token,
        };
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().uid != uid {
                    return None;
                }
                entry.insert(binding);
            }
            Entry::Vacant(entry) => {
                entry.insert(binding);
            }
        }
        Some(token)
    }

    /// Drops the binding only if it is still the one `token` created.
    pub fn release(&self, session_id: &str, token: Uuid) -> bool {
        self.sessions
            .remove_if(session_id, |_, binding| binding.token == token)
            .is_some()
    }

    pub fn count_for(&self, uid: &str) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().uid == uid)
            .count()
    }
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    id: JsonValue,
    #[serde(default)]
    session_id: Option<String>,
}

/// The bound session of one master socket; releases the registry entry and
/// the subscription however the socket ends.
struct BoundSession {
    state: Arc<WebState>,
    session_id: String,
    token: Uuid,
    events: EventStream,
}

impl Drop for BoundSession {
    fn drop(&mut self) {
        if self.state.masters.release(&self.session_id, self.token) {
            debug!("Released master session {}", self.session_id);
        }
    }
}

/// Browser-facing frame for a lifecycle event, if the UI acts on it.
pub fn translate(event: &PodEvent) -> Option<JsonValue> {
    match event.event {
        EventCode::NotebookStarted => Some(json!({"type": "start-notebook", "url": NOTEBOOK_IFRAME_URL})),
        EventCode::NotebookStopped => Some(json!({"type": "stop-notebook"})),
        EventCode::SimulationFileServerStarted => {
            Some(json!({"type": "start-simulator", "url": SIMULATOR_IFRAME_URL}))
        }
        EventCode::SimulationFileServerStopped => Some(json!({"type": "stop-simulator"})),
        _ => None,
    }
}

fn error_frame(id: &JsonValue, error: impl std::fmt::Display) -> JsonValue {
    json!({"id": id, "type": "error", "error": error.to_string()})
}

async fn send_json(sender: &mut SplitSink<WebSocket, Message>, frame: &JsonValue) -> bool {
    sender
        .send(Message::Text(frame.to_string().into()))
        .await
        .is_ok()
}

async fn next_event(session: &mut Option<BoundSession>) -> Option<PodEvent> {
    match session {
        Some(session) => session.events.next().await,
        None => futures::future::pending().await,
    }
}

pub async fn master_socket(
    State(state): State<Arc<WebState>>,
    Extension(auth): Extension<AuthContext>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_master(state, auth, socket))
}

async fn handle_master(state: Arc<WebState>, auth: AuthContext, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    if !auth.can_demo {
        let _ = send_json(&mut sender, &error_frame(&JsonValue::Null, "demo access required")).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let mut session: Option<BoundSession> = None;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("Master socket for {} failed: {}", auth.uid, e);
                        break;
                    }
                };

                let message: ClientMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Invalid master message from {}: {}", auth.uid, e);
                        if !send_json(&mut sender, &error_frame(&JsonValue::Null, "invalid JSON")).await {
                            break;
                        }
                        continue;
                    }
                };

                let reply = match message.kind.as_str() {
                    "set-session" => match set_session(&state, &auth, &message).await {
                        Ok((bound, reply)) => {
                            // Rebinding replaces the previous subscription.
                            session = Some(bound);
                            reply
                        }
                        Err(e) => {
                            error!("set-session failed for {}: {}", auth.uid, e);
                            error_frame(&message.id, e)
                        }
                    },
                    "upgrade-pod" => {
                        upgrade_in_background(&state, &auth);
                        json!({"id": message.id, "type": "upgrade-pod"})
                    }
                    other => {
                        debug!("Ignoring master message type {:?}", other);
                        continue;
                    }
                };

                if !send_json(&mut sender, &reply).await {
                    break;
                }
            }
            event = next_event(&mut session) => {
                let Some(event) = event else {
                    warn!("Event subscription for {} ended", auth.uid);
                    break;
                };
                if let Some(frame) = translate(&event) {
                    if !send_json(&mut sender, &frame).await {
                        break;
                    }
                }
            }
        }
    }

    info!("Master socket for {} closed", auth.uid);
}

async fn set_session(
    state: &Arc<WebState>,
    auth: &AuthContext,
    message: &ClientMessage,
) -> anyhow::Result<(BoundSession, JsonValue)> {
    let session_id = message
        .session_id
        .clone()
        .ok_or_else(|| anyhow::anyhow!("session_id is required"))?;
    let services = &state.services;

    // Subscribe before provisioning so no lifecycle event slips through.
    let events = services.broadcaster.subscribe(&auth.uid).await?;
    let token = state
        .masters
        .bind(&session_id, &auth.uid)
        .ok_or_else(|| anyhow::anyhow!("session id {} is held by another user", session_id))?;
    let bound = BoundSession {
        state: state.clone(),
        session_id: session_id.clone(),
        token,
        events,
    };

    services.pods.ensure_pod(&auth.uid).await?;
    services
        .cache
        .set(&auth.uid, CacheKey::ContainerHost, &container_name(&auth.uid))
        .await?;

    let pod = PodState::from_cache(services.cache.as_ref(), &auth.uid).await?;
    if !pod.container {
        services
            .jobs
            .enqueue(Job::RunPod {
                uid: auth.uid.clone(),
            })
            .await?;
    }

    let mut reply = json!({
        "id": message.id,
        "type": "set-session",
        "session_id": session_id,
        "notebook_iframe_url": NOTEBOOK_IFRAME_URL,
        "container_running": pod.container,
        "notebook_running": pod.notebook,
        "simulator_running": pod.simulator,
    });
    if services.cache.has(&auth.uid, CacheKey::FileServerUrl).await? {
        reply["simulator_url"] = json!(SIMULATOR_IFRAME_URL);
    }

    info!("Master session {} bound to {}", session_id, auth.uid);
    Ok((bound, reply))
}

fn upgrade_in_background(state: &Arc<WebState>, auth: &AuthContext) {
    let services = state.services.clone();
    let uid = auth.uid.clone();
    tokio::spawn(async move {
        if let Err(e) = services.pods.update_pod(&uid).await {
            error!("Upgrade of pod for {} failed: {}", uid, e);
        }
    });
}
