use std::time::Duration;

use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, REFERER},
};
use tracing::{debug, warn};

use crate::configs::{HttpProxyConfig, NiconicoConfig};

/// Headers the platform's frontend sends with every API call.
const PLATFORM_HEADERS: [(&str, &str); 5] = [
    ("X-Frontend-Id", "6"),
    ("X-Frontend-Version", "0"),
    ("X-Niconico-Language", "ja-jp"),
    ("X-Client-Os-Type", "others"),
    ("X-Request-With", "https://www.nicovideo.jp"),
];

pub struct HttpClient;

impl HttpClient {
    /// Builds the pooled client shared by every upstream session.
    ///
    /// No cookie store: cookies live in the per-request `SessionCredentials`.
    pub fn new(config: &NiconicoConfig) -> reqwest::Result<Client> {
        let mut headers = HeaderMap::new();
        for (name, value) in PLATFORM_HEADERS {
            headers.insert(name, HeaderValue::from_static(value));
        }
        headers.insert(REFERER, HeaderValue::from_static("https://www.nicovideo.jp/"));

        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .tcp_nodelay(true)
            .pool_idle_timeout(Duration::from_secs(70));

        if let Some(proxy) = config.proxy.as_ref().and_then(build_proxy) {
            builder = builder.proxy(proxy);
        }

        builder.build()
    }
}

fn build_proxy(proxy_config: &HttpProxyConfig) -> Option<reqwest::Proxy> {
    let url = proxy_config.url.as_ref()?;
    match reqwest::Proxy::all(url) {
        Ok(mut proxy) => {
            if let (Some(u), Some(p)) = (&proxy_config.username, &proxy_config.password) {
                proxy = proxy.basic_auth(u, p);
            }
            debug!("Configured upstream proxy: {}", url);
            Some(proxy)
        }
        Err(e) => {
            warn!("Failed to parse proxy URL '{}': {}; proxy will be ignored", url, e);
            None
        }
    }
}
