use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{Uri, header},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;

use crate::{
    common::{errors::ProxyError, types::AUDIO_CONTENT_TYPE},
    server::AppState,
    sources::niconico::VideoDetail,
    stream::{StreamError, open_stream},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    #[serde(default = "default_audio_only")]
    pub audio_only: bool,
}

fn default_audio_only() -> bool { true }

/// GET /video/{video_id}
pub async fn get_video_detail(
    Path(video_id): Path<String>,
    uri: Uri,
    State(state): State<Arc<AppState>>,
) -> Response {
    tracing::info!("GET /video/{}", video_id);

    let client = state.nico_client();
    match client.fetch_manifest(&video_id).await {
        Ok(document) => Json(VideoDetail::from_manifest(&document)).into_response(),
        Err(e) => {
            tracing::warn!("Detail lookup for {} failed: {}", video_id, e);
            ProxyError::internal(e.to_string(), uri.path()).into_response()
        }
    }
}

/// GET /video/{video_id}/stream
pub async fn stream_video(
    Path(video_id): Path<String>,
    Query(params): Query<StreamQuery>,
    uri: Uri,
    State(state): State<Arc<AppState>>,
) -> Response {
    tracing::info!("GET /video/{}/stream audioOnly={}", video_id, params.audio_only);

    match open_stream(state.nico_client(), &video_id, params.audio_only, &state.config).await {
        Ok((session, chunks)) => {
            tracing::info!("Stream {} opened for {}", session.id(), video_id);
            state.track(session);
            (
                [(header::CONTENT_TYPE, AUDIO_CONTENT_TYPE)],
                Body::from_stream(chunks),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!("Stream for {} failed: {}", video_id, e);
            stream_error(&e, uri.path()).into_response()
        }
    }
}

fn stream_error(err: &StreamError, path: &str) -> ProxyError {
    match err {
        StreamError::NoUsableRendition { video_id } => {
            ProxyError::not_found(format!("Video {} is unavailable", video_id), path)
        }
        other => ProxyError::internal(other.to_string(), path),
    }
}
