use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::{common::errors::ProxyError, server::AppState};

/// Requires `Authorization` to equal the configured password, when one is set.
pub async fn check_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(password) = state.config.server.password.as_deref() else {
        return next.run(req).await;
    };

    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());
    let path = req.uri().path().to_string();

    match auth_header {
        Some(auth) if auth == password => next.run(req).await,
        Some(_) => {
            warn!("Authorization failed: Invalid password");
            ProxyError::unauthorized("Invalid password", path).into_response()
        }
        None => {
            warn!("Authorization failed: Missing Authorization header");
            ProxyError::unauthorized("Missing Authorization header", path).into_response()
        }
    }
}

pub async fn add_response_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response.headers_mut().insert(
        "Nicoproxy-Version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}
