use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the transcoder subprocess.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TranscoderConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Size of a single stdout read, and so the upper bound of a body chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_reconnect_delay_max_secs")]
    pub reconnect_delay_max_secs: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: String,
}

fn default_binary() -> String { "ffmpeg".to_string() }
fn default_chunk_size() -> usize { 4096 }
fn default_reconnect_delay_max_secs() -> u32 { 5 }
fn default_buffer_size() -> String { "64k".to_string() }

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            chunk_size: default_chunk_size(),
            reconnect_delay_max_secs: default_reconnect_delay_max_secs(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Streaming session policy.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,
    /// Consecutive keep-alive failures tolerated before the session is torn down.
    /// `1` aborts on the first failure.
    #[serde(default = "default_max_keep_alive_failures")]
    pub max_keep_alive_failures: u32,
    /// Chunks buffered between the subprocess reader and the client.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_keep_alive_interval_secs() -> u64 { 5 }
fn default_max_keep_alive_failures() -> u32 { 1 }
fn default_channel_capacity() -> usize { 8 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_secs: default_keep_alive_interval_secs(),
            max_keep_alive_failures: default_max_keep_alive_failures(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SessionConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }
}
