//! Request shapes for the access-rights handshake and its heartbeat.

use serde::Deserialize;
use serde_json::{Value, json};
use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339, macros::offset};

use super::manifest::NegotiationTarget;

/// The platform stamps heartbeat events in JST.
const PLATFORM_OFFSET: UtcOffset = offset!(+9);

/// Lead time the browser reports between page access and loading start.
const LOADING_START_LEAD_MS: i64 = 10_000;

/// Authorization returned by a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedGrant {
    pub content_url: String,
    pub watch_id: String,
    pub track_id: String,
    /// Rendition id lists, exactly as sent in the negotiation.
    pub outputs: Vec<Vec<String>>,
    /// `nicosid` at negotiation time.
    pub subject_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccessRightsResponse {
    #[serde(default)]
    pub data: Option<AccessRightsData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccessRightsData {
    pub content_url: String,
}

pub fn access_rights_url(api_base: &str, watch_id: &str, track_id: &str, retry: bool) -> String {
    let mut url = format!(
        "{}/v1/watch/{}/access-rights/hls?actionTrackId={}",
        api_base.trim_end_matches('/'),
        watch_id,
        track_id
    );
    if retry {
        url.push_str("&__retry=0");
    }
    url
}

pub fn negotiation_url(api_base: &str, target: &NegotiationTarget) -> String {
    access_rights_url(api_base, &target.watch_id, &target.track_id, false)
}

pub fn keep_alive_url(api_base: &str, grant: &NegotiatedGrant) -> String {
    access_rights_url(api_base, &grant.watch_id, &grant.track_id, true)
}

pub fn negotiation_body(outputs: &[Vec<String>]) -> Value {
    json!({ "outputs": outputs })
}

pub fn keep_alive_body(grant: &NegotiatedGrant, now: OffsetDateTime) -> Value {
    let local = now.to_offset(PLATFORM_OFFSET);
    let occurred_at = local
        .format(&Rfc3339)
        .unwrap_or_else(|_| local.unix_timestamp().to_string());
    let now_ms = (now.unix_timestamp_nanos() / 1_000_000) as i64;

    let performance = json!({
        "watch_access_start": now_ms,
        "watch_access_finish": null,
        "video_loading_start": now_ms + LOADING_START_LEAD_MS,
        "video_loading_finish": null,
        "video_play_start": null,
        "end_context": {
            "ad_playing": false,
            "video_playing": false,
            "is_suspending": false
        }
    });

    let additional_parameters = json!({
        "___pc_v": 1,
        "os": "Windows",
        "os_version": "15.0.0",
        "nicosid": grant.subject_id,
        "referer": "",
        "query_parameters": {},
        "is_ad_block": false,
        "has_playlist": false,
        "___abw": null,
        "abw_show": false,
        "abw_closed": false,
        "abw_seen_at": null,
        "viewing_source": "",
        "viewing_source_detail": {},
        "playback_rate": "",
        "use_flip": false,
        "quality": [],
        "auto_quality": [],
        "loop_count": 0,
        "suspend_count": 0,
        "load_failed": false,
        "error_description": [],
        "end_position_milliseconds": null,
        "performance": performance
    });

    json!({
        "outputs": grant.outputs,
        "heartbeat": {
            "method": "regular",
            "params": {
                "eventType": "start",
                "eventOccurredAt": occurred_at,
                "watchMilliseconds": 0,
                "endCount": 0,
                "additionalParameters": additional_parameters
            }
        }
    })
}
