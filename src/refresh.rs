//! Shared resolution path
//!
//! Both the refresh scheduler and relay sessions resolve stations through
//! the [`Refresher`], so there is a single place where resolver output is
//! written to the cache. Concurrent callers for the same station share one
//! resolver invocation.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::cache::{Freshness, ResolutionCache};
use crate::error::{RelayError, ResolveFailure, Result};
use crate::registry::StationRegistry;
use crate::resolver::{ResolutionResult, Resolve};

pub struct Refresher {
    registry: Arc<StationRegistry>,
    cache: Arc<ResolutionCache>,
    resolver: Arc<dyn Resolve>,
    staleness: Duration,
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl Refresher {
    pub fn new(
        registry: Arc<StationRegistry>,
        cache: Arc<ResolutionCache>,
        resolver: Arc<dyn Resolve>,
        staleness: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            resolver,
            staleness,
            in_flight: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<StationRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Whether a station's cached URL should be re-resolved
    pub fn needs_refresh(&self, station: &str, now: Instant) -> bool {
        let Some(entry) = self.cache.entry(station) else {
            return true;
        };
        if entry.url.is_none() || entry.freshness != Freshness::Fresh {
            return true;
        }
        entry.age(now).map_or(true, |age| age > self.staleness)
    }

    /// Resolve a station and store the outcome in the cache
    ///
    /// If another caller finished resolving this station while we waited for
    /// the station lock, its result is reused instead of invoking the tool again.
    pub async fn refresh(&self, station: &str) -> Result<ResolutionResult> {
        let locator = self
            .registry
            .locator(station)
            .ok_or_else(|| RelayError::StationNotFound(station.to_string()))?
            .to_string();

        let requested_at = Instant::now();
        let lock = self
            .in_flight
            .entry(station.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(entry) = self.cache.entry(station) {
            if entry.checked_at >= requested_at {
                return Ok(match (&entry.url, entry.freshness) {
                    (Some(url), Freshness::Fresh) => ResolutionResult::Success(url.to_string()),
                    _ => match entry.last_failure {
                        Some(ResolveFailure::Extractor(detail)) => {
                            ResolutionResult::ExtractorError(detail)
                        }
                        _ => ResolutionResult::Offline,
                    },
                });
            }
        }

        let result = self.resolver.resolve(&locator).await;
        self.cache.put(station, &result, Instant::now());

        match &result {
            ResolutionResult::Success(url) => info!("Resolved {}: {}", station, url),
            ResolutionResult::Offline => warn!("Station {} is offline", station),
            ResolutionResult::ExtractorError(detail) => {
                warn!("Failed to resolve {}: {}", station, detail)
            }
        }

        Ok(result)
    }
}
