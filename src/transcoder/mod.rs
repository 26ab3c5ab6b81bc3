//! Transcoding subprocesses
//!
//! A [`Transcode`] implementation knows how to start the external tool for
//! a given input URL. [`TranscoderProcess`] owns the resulting child for
//! its whole life: reading its stdout, draining its stderr into the log,
//! and killing and reaping it. Every process is accounted for in a
//! [`ProcessTracker`].

pub mod ffmpeg;

use serde::Serialize;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

pub use ffmpeg::FfmpegTranscoder;

/// Something that can start a transcoder reading `input_url`
///
/// The returned child must have its stdout piped.
pub trait Transcode: Send + Sync {
    fn program(&self) -> &str;

    fn spawn(&self, input_url: &str) -> std::io::Result<Child>;
}

/// Spawn/reap accounting shared by all sessions
#[derive(Debug, Clone, Default)]
pub struct ProcessTracker {
    counts: Arc<Counts>,
}

#[derive(Debug, Default)]
struct Counts {
    spawned: AtomicU64,
    reaped: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessCounts {
    pub spawned: u64,
    pub reaped: u64,
    pub abandoned: u64,
    pub live: u64,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> ProcessCounts {
        let spawned = self.counts.spawned.load(Ordering::SeqCst);
        let reaped = self.counts.reaped.load(Ordering::SeqCst);
        let abandoned = self.counts.abandoned.load(Ordering::SeqCst);
        ProcessCounts {
            spawned,
            reaped,
            abandoned,
            live: spawned.saturating_sub(reaped + abandoned),
        }
    }

    /// Processes spawned and not yet released
    #[cfg(test)]
    pub fn live(&self) -> u64 {
        self.counts().live
    }
}

/// One running transcoder owned by one relay session
pub struct TranscoderProcess {
    child: Child,
    stdout: ChildStdout,
    pid: Option<u32>,
    tracker: ProcessTracker,
    released: bool,
}

impl TranscoderProcess {
    /// Start the transcoder for `input_url`
    pub fn launch(
        transcoder: &dyn Transcode,
        input_url: &str,
        tracker: &ProcessTracker,
    ) -> Result<Self> {
        let mut child = transcoder
            .spawn(input_url)
            .map_err(|source| RelayError::Spawn {
                program: transcoder.program().to_string(),
                source,
            })?;
        tracker.counts.spawned.fetch_add(1, Ordering::SeqCst);

        let pid = child.id();
        let program = transcoder.program().to_string();

        if let Some(stderr) = child.stderr.take() {
            // Ends by itself once the process closes its stderr
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        warn!("{}[{}]: {}", program, pid.unwrap_or(0), line);
                    }
                }
            });
        }

        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            tracker.counts.abandoned.fetch_add(1, Ordering::SeqCst);
            return Err(RelayError::Transcode(
                "transcoder stdout is not piped".into(),
            ));
        };

        debug!("Spawned transcoder pid {:?}", pid);
        Ok(Self {
            child,
            stdout,
            pid,
            tracker: tracker.clone(),
            released: false,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Read the next chunk of output; `Ok(0)` means the process closed stdout
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf).await
    }

    /// Kill the process and wait until it has exited
    pub async fn terminate(mut self) -> std::io::Result<ExitStatus> {
        let result = self.reap(Duration::ZERO).await;
        self.released = true;
        result
    }

    /// Give the process `grace` to exit on its own, then kill it; waits for exit either way
    pub async fn finish(mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        let result = self.reap(grace).await;
        self.released = true;
        result
    }

    async fn reap(&mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        if !grace.is_zero() {
            if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
                self.tracker.counts.reaped.fetch_add(1, Ordering::SeqCst);
                return status;
            }
        }

        if let Ok(Some(status)) = self.child.try_wait() {
            self.tracker.counts.reaped.fetch_add(1, Ordering::SeqCst);
            return Ok(status);
        }

        if let Err(e) = self.child.start_kill() {
            debug!("kill of pid {:?} failed: {}", self.pid, e);
        }
        let status = self.child.wait().await;
        self.tracker.counts.reaped.fetch_add(1, Ordering::SeqCst);
        status
    }

    fn kill_now(&mut self) {
        let _ = self.child.start_kill();
        self.tracker.counts.abandoned.fetch_add(1, Ordering::SeqCst);
        self.released = true;
    }
}

impl Drop for TranscoderProcess {
    fn drop(&mut self) {
        if !self.released {
            // kill_on_drop lets the runtime reap it in the background
            warn!("Transcoder pid {:?} dropped without being reaped", self.pid);
            self.kill_now();
        }
    }
}
