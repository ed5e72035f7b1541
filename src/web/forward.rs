use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    response::Response,
};
use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::web::auth::TOKEN_COOKIE;
use crate::web::error::{ApiError, ApiResult};

/// Response headers that describe the upstream connection, not the payload.
const EXCLUDED_RESPONSE_HEADERS: [HeaderName; 4] = [
    header::CONTENT_ENCODING,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// Request headers that must be recomputed for the upstream hop or that
/// carry nbpod credentials the sandbox must never see.
const EXCLUDED_REQUEST_HEADERS: [HeaderName; 6] = [
    header::HOST,
    header::AUTHORIZATION,
    header::COOKIE,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

pub fn target_url(base: &str, path: &str, query: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    match query {
        Some(q) if !q.is_empty() => format!("{}{}?{}", base, path, q),
        _ => format!("{}{}", base, path),
    }
}

/// Removes the public mount point so the backend sees its own paths.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    match path.strip_prefix(prefix) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Browser cookies minus the session token, joined into one header.
fn sandbox_cookies(headers: &HeaderMap) -> Option<HeaderValue> {
    let kept: Vec<&str> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .map(str::trim)
        .filter(|pair| {
            !pair.is_empty() && pair.split('=').next().map(str::trim) != Some(TOKEN_COOKIE)
        })
        .collect();
    if kept.is_empty() {
        return None;
    }
    HeaderValue::from_str(&kept.join("; ")).ok()
}

fn upstream_headers(headers: &HeaderMap, forwarded_proto: &str) -> HeaderMap {
    let mut upstream = headers.clone();
    for name in EXCLUDED_REQUEST_HEADERS.iter() {
        upstream.remove(name);
    }
    if let Some(cookies) = sandbox_cookies(headers) {
        upstream.insert(header::COOKIE, cookies);
    }
    if let Ok(proto) = HeaderValue::from_str(forwarded_proto) {
        upstream.insert(HeaderName::from_static("x-forwarded-proto"), proto);
    }
    upstream
}

/// Forwards HTTP requests to sandbox services. Each user gets a persistent
/// client so cookies set by the backend survive across requests.
pub struct HttpForwarder {
    clients: DashMap<String, reqwest::Client>,
    forwarded_proto: String,
}

impl HttpForwarder {
    pub fn new(forwarded_proto: String) -> Self {
        Self {
            clients: DashMap::new(),
            forwarded_proto,
        }
    }

    fn client_for(&self, uid: &str) -> ApiResult<reqwest::Client> {
        if let Some(client) = self.clients.get(uid) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ApiError::Internal(e.into()))?;
        self.clients.insert(uid.to_string(), client.clone());
        Ok(client)
    }

    pub fn forget(&self, uid: &str) {
        self.clients.remove(uid);
    }

    pub async fn forward(
        &self,
        uid: &str,
        target: &str,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> ApiResult<Response> {
        let client = self.client_for(uid)?;

        let outgoing = upstream_headers(headers, &self.forwarded_proto);

        debug!("Forwarding {} {} for {}", method, target, uid);
        let upstream = client
            .request(method, target)
            .headers(outgoing)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!("Upstream request to {} failed: {}", target, e);
                ApiError::Upstream(format!("backend unavailable: {}", e))
            })?;

        let status = upstream.status();
        let mut builder = Response::builder().status(status);
        for (name, value) in upstream.headers() {
            if !EXCLUDED_RESPONSE_HEADERS.contains(name) {
                builder = builder.header(name, value);
            }
        }

        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| ApiError::Upstream(format!("backend response failed: {}", e)))?;

        builder
            .body(Body::from(bytes))
            .map_err(|e| ApiError::Internal(e.into()))
    }
}
