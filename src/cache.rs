//! Resolution cache
//!
//! Holds the freshest known media URL per station. Entries are replaced as
//! a whole under the shard lock of a `DashMap`, so a reader either sees the
//! previous entry or the new one, never a mix. URLs are shared as `Arc<str>`
//! and cloned out cheaply; no lock is held once `get` returns.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{RelayError, ResolveFailure, Result};
use crate::resolver::ResolutionResult;

/// Freshness of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Last resolution succeeded
    Fresh,
    /// URL is suspected to have expired
    Stale,
    /// Last resolution failed; any URL is from an earlier success
    Failed,
}

/// Cache entry for one station
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Last known-good URL
    pub url: Option<Arc<str>>,
    /// When `url` was obtained
    pub resolved_at: Option<Instant>,
    /// When the last resolution attempt finished
    pub checked_at: Instant,
    /// Wall clock time of the last update, for reporting
    pub updated_at: DateTime<Utc>,
    pub freshness: Freshness,
    pub last_failure: Option<ResolveFailure>,
    /// Consecutive failed attempts
    pub failures: u32,
}

impl CacheEntry {
    /// Age of the URL, `None` if there never was one
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.resolved_at
            .map(|at| now.saturating_duration_since(at))
    }
}

/// Serializable view of an entry
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub station: String,
    pub freshness: Freshness,
    pub has_url: bool,
    pub age_secs: Option<u64>,
    pub updated_at: DateTime<Utc>,
    pub failures: u32,
    pub last_failure: Option<String>,
}

/// Concurrent station -> URL cache
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: DashMap<String, CacheEntry>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known-good URL for a station
    pub fn get(&self, station: &str) -> Option<Arc<str>> {
        self.entries.get(station).and_then(|e| e.url.clone())
    }

    /// Like [`get`](Self::get), but a miss is an error
    pub fn require(&self, station: &str) -> Result<Arc<str>> {
        self.get(station)
            .ok_or_else(|| RelayError::CacheMiss(station.to_string()))
    }

    /// Copy of the whole entry
    pub fn entry(&self, station: &str) -> Option<CacheEntry> {
        self.entries.get(station).map(|e| e.clone())
    }

    /// Record a resolution outcome observed at `at`
    ///
    /// A success replaces the URL and marks the entry fresh. A failure marks
    /// it failed but keeps whatever URL an earlier success left behind.
    pub fn put(&self, station: &str, result: &ResolutionResult, at: Instant) {
        let now = Utc::now();
        let mut slot = self.entries.entry(station.to_string()).or_insert_with(|| CacheEntry {
            url: None,
            resolved_at: None,
            checked_at: at,
            updated_at: now,
            freshness: Freshness::Failed,
            last_failure: None,
            failures: 0,
        });

        let previous = slot.value();
        let next = match result {
            ResolutionResult::Success(url) => CacheEntry {
                url: Some(Arc::from(url.as_str())),
                resolved_at: Some(at),
                checked_at: at,
                updated_at: now,
                freshness: Freshness::Fresh,
                last_failure: None,
                failures: 0,
            },
            failed => CacheEntry {
                url: previous.url.clone(),
                resolved_at: previous.resolved_at,
                checked_at: at,
                updated_at: now,
                freshness: Freshness::Failed,
                last_failure: failed.failure(),
                failures: previous.failures.saturating_add(1),
            },
        };

        *slot.value_mut() = next;
    }

    /// Flag a station's URL as suspect so the next lookup re-resolves it
    pub fn mark_stale(&self, station: &str) {
        if let Some(mut entry) = self.entries.get_mut(station) {
            if entry.freshness == Freshness::Fresh {
                entry.freshness = Freshness::Stale;
                entry.updated_at = Utc::now();
            }
        }
    }

    /// All entries, sorted by station name
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let now = Instant::now();
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|e| EntrySnapshot {
                station: e.key().clone(),
                freshness: e.freshness,
                has_url: e.url.is_some(),
                age_secs: e.age(now).map(|d| d.as_secs()),
                updated_at: e.updated_at,
                failures: e.failures,
                last_failure: e.last_failure.as_ref().map(|f| f.to_string()),
            })
            .collect();
        out.sort_by(|a, b| a.station.cmp(&b.station));
        out
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(url: &str) -> ResolutionResult {
        ResolutionResult::Success(url.to_string())
    }

    #[test]
    fn test_get_unknown_station() {
        let cache = ResolutionCache::new();
        assert!(cache.get("nope").is_none());
        assert!(cache.entry("nope").is_none());
        assert!(matches!(cache.require("nope"), Err(RelayError::CacheMiss(_))));
    }

    #[test]
    fn test_put_success() {
        let cache = ResolutionCache::new();
        let at = Instant::now();
        cache.put("demo", &ok("https://cdn/a"), at);

        assert_eq!(cache.get("demo").as_deref(), Some("https://cdn/a"));
        let entry = cache.entry("demo").unwrap();
        assert_eq!(entry.freshness, Freshness::Fresh);
        assert_eq!(entry.resolved_at, Some(at));
        assert_eq!(entry.failures, 0);
    }

    #[test]
    fn test_failure_keeps_last_known_good_url() {
        let cache = ResolutionCache::new();
        let first = Instant::now();
        cache.put("demo", &ok("https://cdn/a"), first);
        cache.put("demo", &ResolutionResult::Offline, first + Duration::from_secs(60));

        assert_eq!(cache.get("demo").as_deref(), Some("https://cdn/a"));
        let entry = cache.entry("demo").unwrap();
        assert_eq!(entry.freshness, Freshness::Failed);
        assert_eq!(entry.resolved_at, Some(first));
        assert_eq!(entry.last_failure, Some(ResolveFailure::Offline));
        assert_eq!(entry.failures, 1);

        cache.put(
            "demo",
            &ResolutionResult::ExtractorError("boom".into()),
            first + Duration::from_secs(120),
        );
        assert_eq!(cache.entry("demo").unwrap().failures, 2);

        cache.put("demo", &ok("https://cdn/b"), first + Duration::from_secs(180));
        let entry = cache.entry("demo").unwrap();
        assert_eq!(entry.url.as_deref(), Some("https://cdn/b"));
        assert_eq!(entry.freshness, Freshness::Fresh);
        assert_eq!(entry.failures, 0);
    }

    #[test]
    fn test_failure_without_history() {
        let cache = ResolutionCache::new();
        cache.put("cold", &ResolutionResult::Offline, Instant::now());
        assert!(cache.get("cold").is_none());
        assert_eq!(cache.entry("cold").unwrap().freshness, Freshness::Failed);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_mark_stale() {
        let cache = ResolutionCache::new();
        cache.mark_stale("missing");
        assert!(cache.is_empty());

        cache.put("demo", &ok("https://cdn/a"), Instant::now());
        cache.mark_stale("demo");
        let entry = cache.entry("demo").unwrap();
        assert_eq!(entry.freshness, Freshness::Stale);
        assert_eq!(entry.url.as_deref(), Some("https://cdn/a"));
    }

    #[test]
    fn test_snapshot_sorted() {
        let cache = ResolutionCache::new();
        cache.put("zulu", &ok("z"), Instant::now());
        cache.put("alpha", &ResolutionResult::Offline, Instant::now());

        let snap = cache.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].station, "alpha");
        assert!(!snap[0].has_url);
        assert_eq!(snap[0].last_failure.as_deref(), Some("source is offline"));
        assert_eq!(snap[1].freshness, Freshness::Fresh);
    }

    /// Readers racing one writer must only ever observe complete URLs
    #[test]
    fn test_concurrent_reads_never_torn() {
        const READERS: usize = 8;
        const WRITES: usize = 2_000;

        fn url_for(i: usize) -> String {
            // length and content both encode i, so a torn value cannot validate
            format!("https://cdn.example/{i}/{}", "x".repeat(i % 97))
        }

        fn is_whole(url: &str) -> bool {
            let rest = match url.strip_prefix("https://cdn.example/") {
                Some(r) => r,
                None => return false,
            };
            let (num, tail) = match rest.split_once('/') {
                Some(parts) => parts,
                None => return false,
            };
            match num.parse::<usize>() {
                Ok(i) => tail.len() == i % 97 && tail.bytes().all(|b| b == b'x'),
                Err(_) => false,
            }
        }

        let cache = Arc::new(ResolutionCache::new());
        cache.put("demo", &ok(&url_for(0)), Instant::now());

        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 1..=WRITES {
                    if rand::random::<u8>() % 5 == 0 {
                        cache.put("demo", &ResolutionResult::Offline, Instant::now());
                    } else {
                        cache.put("demo", &ok(&url_for(i)), Instant::now());
                    }
                    for _ in 0..(rand::random::<u8>() % 4) {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let mut seen = 0usize;
                    for _ in 0..WRITES {
                        let url = cache.get("demo").expect("url never disappears");
                        assert!(is_whole(&url), "torn read: {url}");
                        seen += 1;
                        if rand::random::<bool>() {
                            std::thread::yield_now();
                        }
                    }
                    seen
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            assert_eq!(r.join().unwrap(), WRITES);
        }
    }
}
