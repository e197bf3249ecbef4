use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use headers::{authorization::Bearer, Authorization, HeaderMapExt};
use std::sync::Arc;
use tracing::warn;

use crate::api::AppState;

/// Requires `Authorization: Bearer <server.api_token>` when a token is configured.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(api_token) = &state.config.server.api_token {
        let token = req
            .headers()
            .typed_get::<Authorization<Bearer>>()
            .map(|auth| auth.token().to_string());

        if token.as_deref() != Some(api_token.as_str()) {
            warn!("Rejected unauthenticated {} {}", req.method(), req.uri().path());
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    Ok(next.run(req).await)
}
