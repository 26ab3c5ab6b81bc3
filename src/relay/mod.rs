//! Per-client audio relay
//!
//! [`Relay::open_stream`] is the entry point used by the HTTP layer. Each
//! call starts one session task that supervises a transcoder and pushes its
//! output into a bounded channel; the returned [`AudioStream`] is the
//! receiving end. Dropping the stream (client gone) closes the channel,
//! which the session observes and answers by reaping its transcoder.

mod session;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::refresh::Refresher;
use crate::transcoder::{ProcessTracker, Transcode};

pub use session::{RestartReason, SessionState};

/// Live view of one session, shared with the debug endpoint
#[derive(Debug)]
pub struct SessionInfo {
    pub id: Uuid,
    pub station: String,
    pub started_at: DateTime<Utc>,
    bytes_sent: AtomicU64,
    restarts: AtomicU32,
    state: Mutex<SessionState>,
    last_restart: Mutex<Option<RestartReason>>,
}

impl SessionInfo {
    fn new(station: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            station: station.to_string(),
            started_at: Utc::now(),
            bytes_sent: AtomicU64::new(0),
            restarts: AtomicU32::new(0),
            state: Mutex::new(SessionState::Resolving),
            last_restart: Mutex::new(None),
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn last_restart(&self) -> Option<RestartReason> {
        self.last_restart.lock().clone()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    fn add_bytes(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn record_restart(&self, reason: RestartReason) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        *self.last_restart.lock() = Some(reason);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            station: self.station.clone(),
            started_at: self.started_at,
            state: self.state(),
            bytes_sent: self.bytes_sent(),
            restarts: self.restarts(),
            last_restart: self.last_restart().map(|r| r.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub station: String,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
    pub bytes_sent: u64,
    pub restarts: u32,
    pub last_restart: Option<String>,
}

/// Byte stream handed to the HTTP layer
///
/// Ends only when the session gives up; dropping it ends the session.
pub struct AudioStream {
    session_id: Uuid,
    inner: ReceiverStream<Bytes>,
}

impl AudioStream {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

impl Stream for AudioStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Starts and tracks relay sessions
pub struct Relay {
    refresher: Arc<Refresher>,
    transcoder: Arc<dyn Transcode>,
    tracker: ProcessTracker,
    sessions: Arc<DashMap<Uuid, Arc<SessionInfo>>>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(
        refresher: Arc<Refresher>,
        transcoder: Arc<dyn Transcode>,
        tracker: ProcessTracker,
        config: RelayConfig,
    ) -> Self {
        Self {
            refresher,
            transcoder,
            tracker,
            sessions: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Open a stream for `station`, or fail if the station is unknown
    pub fn open_stream(&self, station: &str) -> Result<AudioStream> {
        if !self.refresher.registry().contains(station) {
            return Err(RelayError::StationNotFound(station.to_string()));
        }

        let (tx, rx) = mpsc::channel(self.config.client_buffer_chunks.max(1));
        let info = Arc::new(SessionInfo::new(station));
        let session_id = info.id;
        self.sessions.insert(session_id, Arc::clone(&info));
        info!("Session {} opened for {}", session_id, station);

        let session = session::RelaySession::new(
            info,
            Arc::clone(&self.refresher),
            Arc::clone(&self.transcoder),
            self.tracker.clone(),
            self.config.clone(),
            tx,
            Arc::clone(&self.sessions),
        );
        tokio::spawn(session.run());

        Ok(AudioStream {
            session_id,
            inner: ReceiverStream::new(rx),
        })
    }

    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    #[cfg(test)]
    pub fn session(&self, id: &Uuid) -> Option<Arc<SessionInfo>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let mut out: Vec<_> = self.sessions.iter().map(|s| s.snapshot()).collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        out
    }
}
