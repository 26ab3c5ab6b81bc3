//! Test fixtures for integration tests
//!
//! Provides a scriptable transcoder and a ready-made application state so
//! tests can run without ffmpeg, yt-dlp or network access.

use axum::body::{Body, BodyDataStream};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};

use crate::config::{RelayConfig, ServerConfig};
use crate::resolver::Resolve;
use crate::state::AppState;
use crate::transcoder::Transcode;

/// Transcoder stand-in running shell scripts; the input URL is `$1`
///
/// The first `failures` spawns run `exit 1`, later ones run `script`.
pub struct MockTranscoder {
    script: String,
    failures: usize,
    spawns: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MockTranscoder {
    /// Prints a marker followed by the input URL, then idles like a live stream
    pub fn streaming() -> Self {
        Self::with_script("printf 'MOCKMP3:%s' \"$1\"; exec sleep 30")
    }

    pub fn with_script(script: &str) -> Self {
        Self {
            script: script.to_string(),
            failures: 0,
            spawns: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    /// Input URLs in spawn order
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

impl Transcode for MockTranscoder {
    fn program(&self) -> &str {
        "sh"
    }

    fn spawn(&self, input_url: &str) -> std::io::Result<Child> {
        self.urls.lock().push(input_url.to_string());
        let n = self.spawns.fetch_add(1, Ordering::SeqCst);
        let script = if n < self.failures {
            "exit 1"
        } else {
            self.script.as_str()
        };

        Command::new("sh")
            .arg("-c")
            .arg(script)
            .arg("sh")
            .arg(input_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Relay settings with no waiting anywhere
pub fn fast_relay_config() -> RelayConfig {
    RelayConfig {
        refresh_interval_secs: 0,
        restart_backoff_secs: 0,
        resolve_backoff_secs: 0,
        ..Default::default()
    }
}

/// Application state for `stations` with the given collaborators
pub fn test_state(
    stations: &[(&str, &str)],
    resolver: Arc<dyn Resolve>,
    transcoder: Arc<dyn Transcode>,
    relay: RelayConfig,
) -> Arc<AppState> {
    let mut config = ServerConfig::default();
    config.stations = stations
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>();
    config.relay = relay;
    config.scheduler.poll_interval_secs = 1;

    Arc::new(AppState::new(config, resolver, transcoder).expect("valid test config"))
}

/// Collect at least `len` bytes from a response body, or whatever arrives before it ends
pub async fn read_body_prefix(body: Body, len: usize) -> (Vec<u8>, BodyDataStream) {
    let mut stream = body.into_data_stream();
    let mut out = Vec::new();

    tokio::time::timeout(Duration::from_secs(10), async {
        while out.len() < len {
            match stream.next().await {
                Some(Ok(chunk)) => out.extend_from_slice(&chunk),
                _ => break,
            }
        }
    })
    .await
    .expect("body produced data in time");

    // hand the rest back so the caller controls when the client "disconnects"
    (out, stream)
}

/// Poll `cond` until it holds
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}
