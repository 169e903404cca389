use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::{NicoError, NicoResult};

#[derive(Debug, Clone, Deserialize)]
struct WatchEnvelope {
    data: WatchData,
}

#[derive(Debug, Clone, Deserialize)]
struct WatchData {
    response: WatchDocument,
}

/// The `data.response` object of `watch/{id}?responseType=json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchDocument {
    pub media: Media,
    pub client: ClientInfo,
    pub video: VideoInfo,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub channel: Option<Channel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Media {
    /// Absent for videos that are not served over the domand HLS delivery.
    #[serde(default)]
    pub domand: Option<Domand>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domand {
    #[serde(default)]
    pub videos: Vec<VideoRendition>,
    #[serde(default)]
    pub audios: Vec<AudioRendition>,
    pub access_right_key: String,
    pub subject_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRendition {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub is_available: bool,
    #[serde(default)]
    pub quality_level: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRendition {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub is_available: bool,
    #[serde(default)]
    pub quality_level: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub watch_id: String,
    pub watch_track_id: String,
    /// Platform session id, also issued as the `nicosid` cookie.
    #[serde(default)]
    pub nicosid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    /// Seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub thumbnail: Option<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub ogp: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub name: Option<String>,
}

impl WatchDocument {
    pub fn from_slice(bytes: &[u8]) -> NicoResult<Self> {
        let envelope: WatchEnvelope = serde_json::from_slice(bytes)?;
        Ok(envelope.data.response)
    }

    pub fn from_value(value: serde_json::Value) -> NicoResult<Self> {
        let envelope: WatchEnvelope = serde_json::from_value(value)?;
        Ok(envelope.data.response)
    }

    /// Identifiers the access-rights endpoint needs.
    pub fn negotiation_target(&self) -> NicoResult<NegotiationTarget> {
        let domand = self.media.domand.as_ref().ok_or_else(|| {
            NicoError::MalformedManifest("media.domand is missing".to_string())
        })?;

        Ok(NegotiationTarget {
            watch_id: self.client.watch_id.clone(),
            track_id: self.client.watch_track_id.clone(),
            access_right_key: domand.access_right_key.clone(),
            subject_id: self.client.nicosid.clone().filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationTarget {
    pub watch_id: String,
    pub track_id: String,
    pub access_right_key: String,
    pub subject_id: Option<String>,
}

/// Ordered `label -> [ids]` mapping; built once per manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RenditionSelection(IndexMap<String, Vec<String>>);

impl RenditionSelection {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, label: &str) -> Option<&[String]> {
        self.0.get(label).map(Vec::as_slice)
    }

    /// The entry used for playback: the first one in manifest order.
    pub fn first(&self) -> Option<(&str, &[String])> {
        self.0
            .get_index(0)
            .map(|(label, ids)| (label.as_str(), ids.as_slice()))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Picks the best available audio and pairs it with every available video.
///
/// Ties on quality keep the first audio seen. With audio but no usable video
/// the selection holds one entry keyed by the audio id.
pub fn select_renditions(document: &WatchDocument, audio_only: bool) -> RenditionSelection {
    let mut outputs = IndexMap::new();
    let Some(domand) = document.media.domand.as_ref() else {
        return RenditionSelection(outputs);
    };

    let mut top: Option<&AudioRendition> = None;
    for audio in domand.audios.iter().filter(|a| a.is_available) {
        if top.is_none_or(|t| audio.quality_level > t.quality_level) {
            top = Some(audio);
        }
    }

    let Some(audio) = top else {
        return RenditionSelection(outputs);
    };

    for video in domand.videos.iter().filter(|v| v.is_available) {
        let ids = if audio_only {
            vec![audio.id.clone()]
        } else {
            vec![video.id.clone(), audio.id.clone()]
        };
        outputs.insert(video.label.clone(), ids);
    }

    if outputs.is_empty() {
        outputs.insert(audio.id.clone(), vec![audio.id.clone()]);
    }

    RenditionSelection(outputs)
}

/// Normalized metadata served by `GET /video/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetail {
    pub id: String,
    pub title: String,
    pub author: String,
    pub duration_ms: u64,
    pub thumbnail_url: String,
}

impl VideoDetail {
    pub fn from_manifest(document: &WatchDocument) -> Self {
        let video = &document.video;
        let author = document
            .owner
            .as_ref()
            .and_then(|o| o.nickname.clone())
            .or_else(|| document.channel.as_ref().and_then(|c| c.name.clone()))
            .unwrap_or_default();
        let thumbnail_url = video
            .thumbnail
            .as_ref()
            .and_then(|t| t.ogp.clone().or_else(|| t.url.clone()))
            .unwrap_or_default();

        Self {
            id: video.id.clone(),
            title: video.title.clone(),
            author,
            duration_ms: (video.duration.max(0.0).trunc() as u64) * 1000,
            thumbnail_url,
        }
    }
}
