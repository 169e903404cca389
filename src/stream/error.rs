use thiserror::Error;

use crate::sources::niconico::NicoError;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Remote(#[from] NicoError),

    #[error("no usable audio rendition for {video_id}")]
    NoUsableRendition { video_id: String },

    #[error("content grant unavailable for {video_id}")]
    GrantUnavailable { video_id: String },

    #[error("failed to spawn transcoder: {0}")]
    SubprocessSpawnFailed(#[source] std::io::Error),
}
