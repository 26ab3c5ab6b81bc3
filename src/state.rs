//! Application state management
//!
//! `AppState` wires the long-lived components together:
//! - Station registry (fixed after startup)
//! - Resolution cache and the shared refresher
//! - Relay sessions and transcoder accounting
//! - Refresh scheduler status

use std::sync::Arc;

use crate::cache::ResolutionCache;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::refresh::Refresher;
use crate::registry::StationRegistry;
use crate::relay::Relay;
use crate::resolver::{Resolve, YtDlpResolver};
use crate::scheduler::{RefreshScheduler, SchedulerStatus};
use crate::transcoder::{FfmpegTranscoder, ProcessTracker, Transcode};

/// Application state shared across all handlers
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<StationRegistry>,
    pub cache: Arc<ResolutionCache>,
    pub refresher: Arc<Refresher>,
    pub relay: Relay,
    pub scheduler_status: Arc<SchedulerStatus>,
}

impl AppState {
    /// Build state around the given resolver and transcoder
    pub fn new(
        config: ServerConfig,
        resolver: Arc<dyn Resolve>,
        transcoder: Arc<dyn Transcode>,
    ) -> Result<Self> {
        let registry = Arc::new(StationRegistry::from_map(&config.stations)?);
        let cache = Arc::new(ResolutionCache::new());
        let refresher = Arc::new(Refresher::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            resolver,
            config.scheduler.staleness(),
        ));
        let relay = Relay::new(
            Arc::clone(&refresher),
            transcoder,
            ProcessTracker::new(),
            config.relay.clone(),
        );

        Ok(Self {
            config,
            registry,
            cache,
            refresher,
            relay,
            scheduler_status: Arc::new(SchedulerStatus::default()),
        })
    }

    /// Build state with yt-dlp and ffmpeg as configured
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let resolver = Arc::new(YtDlpResolver::new(&config.resolver));
        let transcoder = Arc::new(FfmpegTranscoder::new(config.transcoder.clone()));
        Self::new(config, resolver, transcoder)
    }

    /// Start the background refresh loop for this state's cache
    pub fn start_scheduler(&self) -> RefreshScheduler {
        RefreshScheduler::start(
            Arc::clone(&self.refresher),
            self.config.scheduler.poll_interval(),
            Arc::clone(&self.scheduler_status),
        )
    }
}
