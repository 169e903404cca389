use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

use crate::{
    server::AppState,
    transport::{
        middleware::{add_response_headers, check_auth},
        routes::{stats, video},
    },
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(stats::index))
        .route("/version", get(stats::get_version))
        .route("/stats", get(stats::get_stats))
        .route("/video/{video_id}", get(video::get_video_detail))
        .route("/video/{video_id}/stream", get(video::stream_video))
        .layer(middleware::from_fn_with_state(state.clone(), check_auth))
        .layer(middleware::from_fn(add_response_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
