use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::info;

use crate::web::auth::{decode_token, TOKEN_COOKIE};
use crate::web::error::ApiError;
use crate::web::state::WebState;

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub uid: String,
    pub can_demo: bool,
}

/// Bearer header first, then the session cookie set for browser iframes.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .find_map(|pair| {
            pair.trim()
                .strip_prefix(TOKEN_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
                .map(str::to_string)
        })
}

pub async fn auth_middleware(
    State(state): State<Arc<WebState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers()).ok_or(ApiError::Unauthorized)?;
    let claims = decode_token(&token, &state.jwt_secret).map_err(|_| ApiError::Unauthorized)?;

    info!(
        method = %request.method(),
        path = %request.uri().path(),
        uid = %claims.sub,
        "Authenticated request"
    );

    request.extensions_mut().insert(AuthContext {
        uid: claims.sub,
        can_demo: claims.can_demo,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("nbpod_token=xyz"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn token_is_found_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("_xsrf=1; nbpod_token=xyz; theme=dark"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("xyz"));

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("nbpod_tokenx=1"));
        assert_eq!(extract_token(&headers), None);
    }
}
