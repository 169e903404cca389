use std::process::Stdio;

use tokio::process::Command;

use crate::configs::TranscoderConfig;

/// Probe and analysis limits are lifted so live HLS inputs are never cut short.
const UNBOUNDED_PROBE: &str = "2147483647";

/// Builds the ffmpeg invocation that copies the HLS audio track to ADTS on stdout.
pub struct Transcoder<'a> {
    config: &'a TranscoderConfig,
}

impl<'a> Transcoder<'a> {
    pub fn new(config: &'a TranscoderConfig) -> Self {
        Self { config }
    }

    pub fn args(&self, content_url: &str, cookie_header: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::with_capacity(24);
        args.extend(["-headers".into(), format!("cookie: {}\r\n", cookie_header)]);
        args.extend([
            "-reconnect".into(),
            "1".into(),
            "-reconnect_streamed".into(),
            "1".into(),
            "-reconnect_delay_max".into(),
            self.config.reconnect_delay_max_secs.to_string(),
        ]);
        args.extend(["-i".into(), content_url.to_string()]);
        args.extend(["-bufsize".into(), self.config.buffer_size.clone()]);
        args.extend([
            "-analyzeduration".into(),
            UNBOUNDED_PROBE.into(),
            "-probesize".into(),
            UNBOUNDED_PROBE.into(),
        ]);
        args.extend([
            "-vn".into(),
            "-acodec".into(),
            "copy".into(),
            "-f".into(),
            "adts".into(),
            "-".into(),
        ]);
        args
    }

    pub fn command(&self, content_url: &str, cookie_header: &str) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .args(self.args(content_url, cookie_header))
            .stdin(Stdio::null());
        command
    }
}
