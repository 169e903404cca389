use serde::{Deserialize, Serialize};

pub const NICONICO_WATCH_URL: &str = "https://www.nicovideo.jp";
pub const NICONICO_API_URL: &str = "https://nvapi.nicovideo.jp";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NiconicoConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Base of the watch page endpoint (`{base}/watch/{id}`).
    #[serde(default = "default_watch_base_url")]
    pub watch_base_url: String,
    /// Base of the access-rights endpoint (`{base}/v1/watch/{id}/access-rights/hls`).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    pub proxy: Option<HttpProxyConfig>,
}

fn default_user_agent() -> String { "nicoproxy".to_string() }
fn default_watch_base_url() -> String { NICONICO_WATCH_URL.to_string() }
fn default_api_base_url() -> String { NICONICO_API_URL.to_string() }
fn default_request_timeout_secs() -> u64 { 10 }

impl Default for NiconicoConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            watch_base_url: default_watch_base_url(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            proxy: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HttpProxyConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}
