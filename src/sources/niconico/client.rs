use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, header::COOKIE};
use tracing::{debug, warn};

use super::{
    credentials::SessionCredentials,
    error::{NicoError, NicoResult},
    manifest::WatchDocument,
    negotiator::{
        AccessRightsResponse, NegotiatedGrant, keep_alive_body, keep_alive_url, negotiation_body,
        negotiation_url,
    },
};
use crate::{configs::NiconicoConfig, stream::KeepAlive};

/// Upstream client for one client-facing request.
///
/// The connection pool is shared; the credential jar is not.
#[derive(Clone)]
pub struct NicoClient {
    http: Client,
    watch_base_url: String,
    api_base_url: String,
    credentials: Arc<SessionCredentials>,
}

impl NicoClient {
    pub fn new(http: Client, config: &NiconicoConfig) -> Self {
        Self {
            http,
            watch_base_url: config.watch_base_url.trim_end_matches('/').to_string(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            credentials: Arc::new(SessionCredentials::new()),
        }
    }

    pub fn credentials(&self) -> &Arc<SessionCredentials> {
        &self.credentials
    }

    fn with_credentials(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.credentials.is_empty() {
            builder
        } else {
            builder.header(COOKIE, self.credentials.cookie_header())
        }
    }

    pub async fn fetch_manifest(&self, video_id: &str) -> NicoResult<WatchDocument> {
        let url = format!("{}/watch/{}?responseType=json", self.watch_base_url, video_id);
        debug!("Fetching watch document for {}", video_id);

        let resp = self.with_credentials(self.http.get(&url)).send().await?;
        self.credentials.absorb(&resp);

        let status = resp.status();
        if !status.is_success() {
            return Err(NicoError::RemoteRequestFailed {
                status,
                endpoint: format!("watch/{}", video_id),
            });
        }

        let body = resp.bytes().await?;
        WatchDocument::from_slice(&body)
    }

    /// Exchanges rendition ids for a content URL.
    ///
    /// Anything other than `201` with non-null `data` is `Ok(None)`.
    pub async fn negotiate(
        &self,
        document: &WatchDocument,
        outputs: Vec<Vec<String>>,
    ) -> NicoResult<Option<NegotiatedGrant>> {
        let target = document.negotiation_target()?;
        let url = negotiation_url(&self.api_base_url, &target);

        let resp = self
            .with_credentials(self.http.post(&url))
            .header("X-Access-Right-Key", &target.access_right_key)
            .json(&negotiation_body(&outputs))
            .send()
            .await?;
        self.credentials.absorb(&resp);

        let status = resp.status();
        if status != StatusCode::CREATED {
            warn!("Negotiation for {} refused with {}", target.watch_id, status);
            return Ok(None);
        }

        let body: AccessRightsResponse = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Negotiation for {} returned an unreadable body: {}", target.watch_id, e);
                return Ok(None);
            }
        };

        Ok(body.data.map(|data| NegotiatedGrant {
            content_url: data.content_url,
            watch_id: target.watch_id,
            track_id: target.track_id,
            outputs,
            subject_id: self.credentials.get("nicosid").or(target.subject_id),
        }))
    }

    pub async fn send_keep_alive(&self, grant: &NegotiatedGrant) -> bool {
        let url = keep_alive_url(&self.api_base_url, grant);
        let body = keep_alive_body(grant, time::OffsetDateTime::now_utc());

        let resp = match self
            .with_credentials(self.http.post(&url))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Keep-alive for {} failed: {}", grant.watch_id, e);
                return false;
            }
        };
        self.credentials.absorb(&resp);

        let status = resp.status();
        if status != StatusCode::OK {
            warn!("Keep-alive for {} answered {}", grant.watch_id, status);
            return false;
        }
        true
    }
}

#[async_trait]
impl KeepAlive for NicoClient {
    async fn send_keep_alive(&self, grant: &NegotiatedGrant) -> bool {
        NicoClient::send_keep_alive(self, grant).await
    }
}
