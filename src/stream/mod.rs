//! Streaming sessions: negotiation hand-off, transcoder lifecycle and keep-alive.

pub mod error;
pub mod keepalive;
pub mod session;
pub mod transcoder;

use std::sync::Arc;

pub use error::StreamError;
pub use keepalive::{KeepAlive, KeepAlivePolicy, KeepAliveStatus, spawn_keep_alive};
pub use session::{ChunkStream, CloseReason, SessionOptions, SessionState, StreamingSession};
pub use transcoder::Transcoder;

use crate::{
    common::types::SessionId,
    configs::Config,
    sources::niconico::{NicoClient, select_renditions},
};

/// Resolves, negotiates and starts a session for `video_id`.
///
/// Fails before any subprocess exists when no rendition or grant is available.
pub async fn open_stream(
    client: NicoClient,
    video_id: &str,
    audio_only: bool,
    config: &Config,
) -> Result<(Arc<StreamingSession>, ChunkStream), StreamError> {
    let document = client.fetch_manifest(video_id).await?;

    let selection = select_renditions(&document, audio_only);
    let Some((label, ids)) = selection.first() else {
        return Err(StreamError::NoUsableRendition {
            video_id: video_id.to_string(),
        });
    };
    tracing::debug!("{}: negotiating '{}' -> {:?}", video_id, label, ids);

    let grant = client
        .negotiate(&document, vec![ids.to_vec()])
        .await?
        .ok_or_else(|| StreamError::GrantUnavailable {
            video_id: video_id.to_string(),
        })?;

    let command = Transcoder::new(&config.transcoder)
        .command(&grant.content_url, &client.credentials().cookie_header());

    StreamingSession::start(
        SessionId::generate(),
        video_id,
        command,
        Arc::new(client),
        grant,
        SessionOptions::from_config(config),
    )
}
