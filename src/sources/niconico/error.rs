use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NicoError {
    #[error("{endpoint} responded with {status}")]
    RemoteRequestFailed { status: StatusCode, endpoint: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed watch document: {0}")]
    MalformedManifest(String),
}

impl From<serde_json::Error> for NicoError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedManifest(e.to_string())
    }
}

pub type NicoResult<T> = Result<T, NicoError>;
