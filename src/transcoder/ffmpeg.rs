//! ffmpeg transcoder
//!
//! Reads the resolved media URL and writes a mono MP3 stream to stdout.

use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

use super::Transcode;
use crate::config::TranscoderConfig;

pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Build ffmpeg command arguments
    fn build_args(&self, input_url: &str) -> Vec<String> {
        let c = &self.config;
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        // Ride out short upstream hiccups without dropping the client
        args.extend([
            "-reconnect".to_string(),
            "1".to_string(),
            "-reconnect_streamed".to_string(),
            "1".to_string(),
            "-reconnect_delay_max".to_string(),
            c.reconnect_delay_max_secs.to_string(),
            "-timeout".to_string(),
            c.io_timeout_secs.saturating_mul(1_000_000).to_string(),
            "-user_agent".to_string(),
            c.user_agent.clone(),
        ]);

        if c.realtime {
            args.push("-re".to_string());
        }

        args.push("-i".to_string());
        args.push(input_url.to_string());

        args.extend(["-vn".to_string(), "-ac".to_string(), c.channels.to_string()]);
        if let Some(rate) = c.sample_rate {
            args.push("-ar".to_string());
            args.push(rate.to_string());
        }
        args.extend([
            "-acodec".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            c.bitrate.clone(),
            "-f".to_string(),
            "mp3".to_string(),
            "-".to_string(),
        ]);

        args
    }
}

impl Transcode for FfmpegTranscoder {
    fn program(&self) -> &str {
        &self.config.program
    }

    fn spawn(&self, input_url: &str) -> std::io::Result<Child> {
        let args = self.build_args(input_url);
        debug!("ffmpeg args: {:?}", args);

        Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}
