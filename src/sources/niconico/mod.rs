//! niconico watch/access-rights integration.

pub mod client;
pub mod credentials;
pub mod error;
pub mod manifest;
pub mod negotiator;

pub use client::NicoClient;
pub use credentials::SessionCredentials;
pub use error::{NicoError, NicoResult};
pub use manifest::{
    AudioRendition, RenditionSelection, VideoDetail, VideoRendition, WatchDocument,
    select_renditions,
};
pub use negotiator::NegotiatedGrant;
