//! Relay session state machine
//!
//! ```text
//! Resolving -> Streaming -> Restarting ------> Resolving
//!                        -> ExpiredRefresh --> Resolving
//!           (any state)  -> Terminated
//! ```
//!
//! The session owns at most one transcoder at a time and always reaps it
//! before spawning the next one or finishing.

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::SessionInfo;
use crate::config::RelayConfig;
use crate::refresh::Refresher;
use crate::transcoder::{ProcessTracker, Transcode, TranscoderProcess};

/// How long a transcoder that closed its stdout gets to exit on its own
const EXIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Resolving,
    Streaming,
    Restarting,
    ExpiredRefresh,
    Terminated,
}

/// Why the current transcoder was replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// Process closed its output and exited with this code
    Exited(Option<i32>),
    /// No output within the stall timeout
    Stalled,
    ReadFailed(String),
    SpawnFailed(String),
    /// Planned restart to pick up a fresh URL
    ProactiveRefresh,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::Exited(Some(code)) => write!(f, "exited with status {code}"),
            RestartReason::Exited(None) => write!(f, "exited (killed by signal)"),
            RestartReason::Stalled => write!(f, "no output within stall timeout"),
            RestartReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            RestartReason::SpawnFailed(e) => write!(f, "spawn failed: {e}"),
            RestartReason::ProactiveRefresh => write!(f, "proactive URL refresh"),
        }
    }
}

/// How a streaming phase ended
enum StreamEnd {
    ClientGone,
    Refresh,
    Failed { reason: RestartReason, produced: u64 },
}

/// How the whole session ended
enum SessionEnd {
    ClientGone,
    GaveUp(u32),
}

enum Acquire {
    Url(Arc<str>),
    ClientGone,
    GaveUp,
}

/// Removes the session from the live map when dropped
struct Registration {
    sessions: Arc<DashMap<Uuid, Arc<SessionInfo>>>,
    id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}

// Field order matters: the process is dropped (killed) before the
// registration goes away, even when unwinding.
pub(super) struct RelaySession {
    info: Arc<SessionInfo>,
    refresher: Arc<Refresher>,
    transcoder: Arc<dyn Transcode>,
    tracker: ProcessTracker,
    config: RelayConfig,
    tx: mpsc::Sender<Bytes>,
    process: Option<TranscoderProcess>,
    _registration: Registration,
}

impl RelaySession {
    pub(super) fn new(
        info: Arc<SessionInfo>,
        refresher: Arc<Refresher>,
        transcoder: Arc<dyn Transcode>,
        tracker: ProcessTracker,
        config: RelayConfig,
        tx: mpsc::Sender<Bytes>,
        sessions: Arc<DashMap<Uuid, Arc<SessionInfo>>>,
    ) -> Self {
        let registration = Registration {
            sessions,
            id: info.id,
        };
        Self {
            info,
            refresher,
            transcoder,
            tracker,
            config,
            tx,
            process: None,
            _registration: registration,
        }
    }

    pub(super) async fn run(mut self) {
        let end = self.drive().await;

        self.release_process().await;
        self.info.set_state(SessionState::Terminated);

        match end {
            SessionEnd::ClientGone => info!(
                "Session {} for {} closed by client after {} bytes",
                self.info.id,
                self.info.station,
                self.info.bytes_sent()
            ),
            SessionEnd::GaveUp(attempts) => warn!(
                "Session {} for {} gave up after {} attempts to obtain a URL",
                self.info.id, self.info.station, attempts
            ),
        }
    }

    async fn drive(&mut self) -> SessionEnd {
        let mut attempts = 0u32;
        // set when our own transcoder died without output on the cached URL
        let mut url_suspect = false;

        loop {
            self.info.set_state(SessionState::Resolving);
            let url = match self.acquire_url(&mut attempts, url_suspect).await {
                Acquire::Url(url) => url,
                Acquire::ClientGone => return SessionEnd::ClientGone,
                Acquire::GaveUp => return SessionEnd::GaveUp(attempts),
            };
            attempts = 0;
            url_suspect = false;

            self.info.set_state(SessionState::Streaming);
            match self.stream(&url).await {
                StreamEnd::ClientGone => return SessionEnd::ClientGone,
                StreamEnd::Refresh => {
                    self.info.set_state(SessionState::ExpiredRefresh);
                    debug!("Session {} refreshing URL for {}", self.info.id, self.info.station);
                    self.release_process().await;
                    self.info.record_restart(RestartReason::ProactiveRefresh);
                }
                StreamEnd::Failed { reason, produced } => {
                    self.info.set_state(SessionState::Restarting);
                    warn!(
                        "Transcoder for {} stopped ({}), restarting in {:?}",
                        self.info.station,
                        reason,
                        self.config.restart_backoff()
                    );
                    self.release_process().await;
                    if produced == 0 {
                        // dying before any output usually means the URL expired
                        self.refresher.cache().mark_stale(&self.info.station);
                        url_suspect = true;
                    }
                    self.info.record_restart(reason);

                    if !self.pause(self.config.restart_backoff()).await {
                        return SessionEnd::ClientGone;
                    }
                }
            }
        }
    }

    /// Resolving: find a usable URL, backing off while there is none
    ///
    /// A cached URL is used as is, even a stale one; keeping it fresh is the
    /// scheduler's job. The resolver runs inline only when there is no URL at
    /// all, or when `suspect` says the cached one just failed us.
    async fn acquire_url(&mut self, attempts: &mut u32, suspect: bool) -> Acquire {
        let station = self.info.station.clone();
        let mut resolve_first = suspect;

        loop {
            let missing = self.refresher.cache().get(&station).is_none();
            if self.config.on_demand_resolve && (missing || resolve_first) {
                resolve_first = false;
                tokio::select! {
                    _ = self.tx.closed() => return Acquire::ClientGone,
                    result = self.refresher.refresh(&station) => {
                        if let Err(e) = result.and_then(|r| r.into_url(&station)) {
                            warn!("On-demand resolution failed: {}", e);
                        }
                    }
                }
            }

            // a stale or failed entry still beats no URL at all
            let miss = match self.refresher.cache().require(&station) {
                Ok(url) => return Acquire::Url(url),
                Err(e) => e,
            };

            *attempts += 1;
            if let Some(max) = self.config.max_resolve_attempts() {
                if *attempts >= max {
                    return Acquire::GaveUp;
                }
            }

            warn!(
                "{} (attempt {}), retrying in {:?}",
                miss,
                attempts,
                self.config.resolve_backoff()
            );
            if !self.pause(self.config.resolve_backoff()).await {
                return Acquire::ClientGone;
            }
        }
    }

    /// Streaming: pump transcoder output to the client until something ends it
    async fn stream(&mut self, url: &str) -> StreamEnd {
        let process =
            match TranscoderProcess::launch(self.transcoder.as_ref(), url, &self.tracker) {
                Ok(p) => p,
                Err(e) => {
                    return StreamEnd::Failed {
                        reason: RestartReason::SpawnFailed(e.to_string()),
                        produced: 0,
                    }
                }
            };
        info!(
            "Session {} streaming {} from {} (pid {:?})",
            self.info.id,
            self.info.station,
            url,
            process.pid()
        );
        self.process = Some(process);

        let refresh_at = self
            .config
            .refresh_interval()
            .map(|d| tokio::time::Instant::now() + d);
        let stall = self.config.stall_timeout();
        let mut buf = vec![0u8; self.config.chunk_size];
        let mut produced = 0u64;

        loop {
            let Some(process) = self.process.as_mut() else {
                return StreamEnd::Failed {
                    reason: RestartReason::ReadFailed("transcoder missing".into()),
                    produced,
                };
            };

            let read = tokio::select! {
                biased;
                _ = self.tx.closed() => return StreamEnd::ClientGone,
                _ = deadline(refresh_at) => return StreamEnd::Refresh,
                read = tokio::time::timeout(stall, process.read_chunk(&mut buf)) => read,
            };

            match read {
                Err(_) => {
                    return StreamEnd::Failed {
                        reason: RestartReason::Stalled,
                        produced,
                    }
                }
                Ok(Err(e)) => {
                    return StreamEnd::Failed {
                        reason: RestartReason::ReadFailed(e.to_string()),
                        produced,
                    }
                }
                Ok(Ok(0)) => {
                    let code = match self.process.take() {
                        Some(p) => p.finish(EXIT_GRACE).await.ok().and_then(|s| s.code()),
                        None => None,
                    };
                    return StreamEnd::Failed {
                        reason: RestartReason::Exited(code),
                        produced,
                    };
                }
                Ok(Ok(n)) => {
                    // waits while the client is slow; errors once it is gone
                    if self.tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        return StreamEnd::ClientGone;
                    }
                    produced += n as u64;
                    self.info.add_bytes(n);
                }
            }
        }
    }

    /// Kill and reap the current transcoder, if any
    async fn release_process(&mut self) {
        if let Some(process) = self.process.take() {
            let pid = process.pid();
            match process.terminate().await {
                Ok(status) => debug!("Transcoder pid {:?} reaped: {}", pid, status),
                Err(e) => warn!("Failed to reap transcoder pid {:?}: {}", pid, e),
            }
        }
    }

    /// Sleep unless the client leaves first; returns false if it did
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.tx.closed() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

async fn deadline(at: Option<tokio::time::Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
