use axum::{
    middleware,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::web::{
    handlers, logging_middleware::request_logging_middleware, master,
    middleware::auth_middleware, proxy, state::WebState,
};

pub fn create_router(state: Arc<WebState>) -> Router {
    // Public routes
    let public_api = Router::new().route("/version", get(handlers::version));

    // Protected routes
    let protected_api = Router::new()
        .route("/pod/status", get(handlers::pod_status))
        .route("/pod/upgrade", post(handlers::upgrade_pod))
        .route("/session/reset", post(handlers::reset_session))
        .route("/events", get(handlers::list_events))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Browser-facing endpoints: master channel and the sandbox relays
    let relay = Router::new()
        .route("/master", get(master::master_socket))
        .route("/get-session", get(handlers::get_session))
        .route("/notebook", any(proxy::notebook))
        .route("/notebook/", any(proxy::notebook))
        .route("/notebook/{*path}", any(proxy::notebook))
        .route("/simulator", any(proxy::simulator))
        .route("/simulator/", any(proxy::simulator))
        .route("/simulator/{*path}", any(proxy::simulator))
        .route("/simulator-ws", get(proxy::simulator_ws))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/v0", public_api.merge(protected_api))
        .merge(relay)
        .with_state(state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
}
