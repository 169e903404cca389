use std::sync::Arc;

use axum::{extract::State, response::Json};
use serde::Serialize;
use serde_json::{Value, json};

use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
  pub active_streams: usize,
  /// Milliseconds since the server started.
  pub uptime: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
  pub semver: String,
  pub build_time: u64,
  pub git: GitInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitInfo {
  pub branch: String,
  pub commit: String,
  pub commit_time: u64,
}

/// GET /
pub async fn index() -> Json<Value> {
  Json(json!({ "detail": "ok" }))
}

/// GET /stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<Stats> {
  tracing::debug!("GET /stats");
  Json(Stats {
    active_streams: state.streams.len(),
    uptime: state.uptime_ms(),
  })
}

/// GET /version
pub async fn get_version() -> Json<VersionInfo> {
  tracing::debug!("GET /version");
  Json(VersionInfo {
    semver: env!("CARGO_PKG_VERSION").to_string(),
    build_time: option_env!("BUILD_TIME")
      .and_then(|s| s.parse().ok())
      .unwrap_or(0),
    git: GitInfo {
      branch: option_env!("GIT_BRANCH").unwrap_or("unknown").to_string(),
      commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
      commit_time: option_env!("GIT_COMMIT_TIME")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0),
    },
  })
}
