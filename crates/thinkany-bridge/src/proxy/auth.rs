//! Bearer-token check for the `/v1` routes

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::error::ProxyError;
use super::server::AppState;

pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    if let Some(expected) = state.auth.enforced_key() {
        check_bearer(req.headers(), expected)?;
    }
    Ok(next.run(req).await)
}

/// 401 when the header is missing or not a bearer credential, 403 on a wrong key
pub fn check_bearer(headers: &HeaderMap, expected: &str) -> Result<(), ProxyError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ProxyError::Unauthorized)?;

    let mut parts = value.split_whitespace();
    let scheme = parts.next().ok_or(ProxyError::Unauthorized)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ProxyError::Unauthorized);
    }

    let token = parts.last().ok_or(ProxyError::Unauthorized)?;
    if token != expected {
        tracing::warn!("Rejected request with invalid API key");
        return Err(ProxyError::Forbidden);
    }
    Ok(())
}
