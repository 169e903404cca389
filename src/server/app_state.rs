use std::{sync::Arc, time::Instant};

use dashmap::DashMap;

use crate::{
  common::types::SessionId,
  configs::Config,
  sources::niconico::NicoClient,
  stream::{CloseReason, StreamingSession},
};

/// Top-level application state.
pub struct AppState {
  pub config: Config,
  /// Pooled HTTP client shared by every upstream session.
  pub http: reqwest::Client,
  /// Live streaming sessions; entries remove themselves on teardown.
  pub streams: DashMap<SessionId, Arc<StreamingSession>>,
  pub started_at: Instant,
}

impl AppState {
  pub fn new(config: Config, http: reqwest::Client) -> Self {
    Self {
      config,
      http,
      streams: DashMap::new(),
      started_at: Instant::now(),
    }
  }

  /// A client with its own, empty credential jar.
  pub fn nico_client(&self) -> NicoClient {
    NicoClient::new(self.http.clone(), &self.config.niconico)
  }

  pub fn uptime_ms(&self) -> u64 {
    self.started_at.elapsed().as_millis() as u64
  }

  /// Registers `session` until it reaches a terminal state.
  pub fn track(self: &Arc<Self>, session: Arc<StreamingSession>) {
    let id = session.id().clone();
    self.streams.insert(id.clone(), session.clone());

    let state = Arc::downgrade(self);
    tokio::spawn(async move {
      let reason = session.closed().await;
      tracing::debug!("Stream {} finished: {:?}", id, reason);
      if let Some(state) = state.upgrade() {
        state.streams.remove(&id);
      }
    });
  }

  /// Closes every live session and waits for their teardown.
  pub async fn shutdown_streams(&self) {
    let sessions: Vec<Arc<StreamingSession>> =
      self.streams.iter().map(|e| e.value().clone()).collect();
    if sessions.is_empty() {
      return;
    }

    tracing::info!("Closing {} active stream(s)", sessions.len());
    futures::future::join_all(sessions.iter().map(|s| s.close(CloseReason::Shutdown))).await;
    self.streams.clear();
  }
}
