use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Extension, Request, State,
    },
    response::{IntoResponse, Response},
};
use futures::SinkExt;
use tracing::warn;

use crate::shared::models::constants::SIMULATOR_PREFIX;
use crate::web::error::{ApiError, ApiResult};
use crate::web::forward::{strip_prefix, target_url};
use crate::web::middleware::AuthContext;
use crate::web::mirror::{mirror, FrameObserver};
use crate::web::observer::SimulatorReadyObserver;
use crate::web::state::WebState;

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Tells the browser why the socket is about to close.
async fn refuse_socket(mut socket: WebSocket, error: &str) {
    let frame = serde_json::json!({"type": "error", "error": error}).to_string();
    let _ = socket.send(Message::Text(frame.into())).await;
    let _ = socket.send(Message::Close(None)).await;
}

fn require_demo(auth: &AuthContext) -> ApiResult<()> {
    if auth.can_demo {
        Ok(())
    } else {
        Err(ApiError::Forbidden("demo access required".to_string()))
    }
}

async fn forward_http(
    state: &WebState,
    auth: &AuthContext,
    base: String,
    path: &str,
    request: Request,
) -> ApiResult<Response> {
    let (parts, body) = request.into_parts();
    let target = target_url(&base, path, parts.uri.query());
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable request body: {}", e)))?;

    state
        .forwarder
        .forward(&auth.uid, &target, parts.method, &parts.headers, body)
        .await
}

/// Relays a WebSocket upgrade, refusing it with an error frame when the
/// user may not use the demo or the pod has no address yet.
async fn relay_socket(
    state: Arc<WebState>,
    auth: AuthContext,
    ws: WebSocketUpgrade,
    port: u16,
    path: String,
    observe_kernel: bool,
) -> Response {
    let host = match state.container_host(&auth.uid).await {
        Ok(host) if auth.can_demo => Ok(host),
        Ok(_) => Err("demo access required".to_string()),
        Err(ApiError::NotReady) => Err("not ready".to_string()),
        Err(e) => {
            warn!("Could not resolve container for {}: {:?}", auth.uid, e);
            Err("internal error".to_string())
        }
    };

    ws.on_upgrade(move |socket| async move {
        let host = match host {
            Ok(host) => host,
            Err(error) => return refuse_socket(socket, &error).await,
        };

        let target = target_url(&format!("ws://{}:{}", host, port), &path, None);
        let observer: Option<Arc<dyn FrameObserver>> = observe_kernel.then(|| {
            Arc::new(SimulatorReadyObserver::new(
                state.services.clone(),
                auth.uid.clone(),
                host.clone(),
            )) as Arc<dyn FrameObserver>
        });

        mirror(
            socket,
            auth.uid.clone(),
            target,
            state.services.config.relay.clone(),
            state.mirrors.clone(),
            observer,
        )
        .await;
    })
}

/// `/notebook` and everything under it, HTTP and WebSocket. Paths are kept
/// because the notebook server is configured with the same base URL.
pub async fn notebook(
    State(state): State<Arc<WebState>>,
    Extension(auth): Extension<AuthContext>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request,
) -> ApiResult<Response> {
    let port = state.services.config.services.notebook;
    let path = request.uri().path().to_string();

    if let Ok(ws) = ws {
        let path = match request.uri().query() {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        };
        return Ok(relay_socket(state, auth, ws, port, path, true).await);
    }

    require_demo(&auth)?;
    let host = state.container_host(&auth.uid).await?;
    forward_http(&state, &auth, format!("http://{}:{}", host, port), &path, request).await
}

/// `/simulator` and everything under it, served by the file server with the
/// public prefix removed.
pub async fn simulator(
    State(state): State<Arc<WebState>>,
    Extension(auth): Extension<AuthContext>,
    request: Request,
) -> ApiResult<Response> {
    require_demo(&auth)?;
    let host = state.container_host(&auth.uid).await?;
    let port = state.services.config.services.file_server;
    let path = strip_prefix(request.uri().path(), SIMULATOR_PREFIX).to_string();
    forward_http(&state, &auth, format!("http://{}:{}", host, port), &path, request).await
}

pub async fn simulator_ws(
    State(state): State<Arc<WebState>>,
    Extension(auth): Extension<AuthContext>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let port = state.services.config.services.simulator;
    relay_socket(state, auth, ws, port, "/".to_string(), false).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::cache::{CacheKey, StateCache};
    use crate::shared::testing::Harness;
    use axum::{body::Body, http::StatusCode};

    fn web_state() -> (Harness, Arc<WebState>) {
        let h = Harness::new();
        let state = Arc::new(WebState::new(h.services.clone(), "secret".to_string()));
        (h, state)
    }

    fn auth(can_demo: bool) -> AuthContext {
        AuthContext {
            uid: "u1".to_string(),
            can_demo,
        }
    }

    fn get(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn forwarding_without_a_container_is_not_ready() {
        let (_h, state) = web_state();

        let err = simulator(State(state.clone()), Extension(auth(true)), get("/simulator/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotReady));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        // The notebook route also accepts upgrades, so exercise it over HTTP.
        let router = axum::Router::new()
            .route("/notebook/{*path}", axum::routing::any(notebook))
            .layer(Extension(auth(true)))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let response = reqwest::get(format!("http://{}/notebook/tree", addr))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn demo_access_is_required() {
        let (h, state) = web_state();
        h.cache
            .set("u1", CacheKey::ContainerHost, "nb-u1")
            .await
            .unwrap();

        let err = simulator(State(state), Extension(auth(false)), get("/simulator/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }
}
