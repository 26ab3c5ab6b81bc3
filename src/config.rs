//! Server configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Resolution tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Path to the resolution tool (yt-dlp)
    pub program: String,

    /// Format selector passed with `-f`
    pub format: String,

    /// Cookie file handed to the tool when it exists on this host
    pub cookie_file: Option<PathBuf>,

    /// Extra arguments placed before the locator
    pub extra_args: Vec<String>,

    /// Hard limit on a single invocation in seconds
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            format: "bestaudio/91".to_string(),
            cookie_file: Some(PathBuf::from("/mnt/data/cookies.txt")),
            extra_args: Vec::new(),
            timeout_secs: 60,
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Refresh scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum age of a resolved URL before it is re-resolved, in seconds
    pub staleness_secs: u64,

    /// Pause between two passes over the registry, in seconds
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 1800, // upstream URLs stay valid for a few hours
            poll_interval_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Per-client relay session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Restart the transcoder after this many seconds of streaming (0 disables)
    pub refresh_interval_secs: u64,

    /// Wait after a transcoder failure before restarting, in seconds
    pub restart_backoff_secs: u64,

    /// Wait between attempts to obtain a URL, in seconds
    pub resolve_backoff_secs: u64,

    /// Give up after this many failed attempts to obtain a URL (0 = never)
    pub max_resolve_attempts: u32,

    /// Resolve synchronously when the cache has nothing usable
    pub on_demand_resolve: bool,

    /// Size of a single read from the transcoder
    pub chunk_size: usize,

    /// Restart when the transcoder produces nothing for this long, in seconds
    pub stall_timeout_secs: u64,

    /// Chunks buffered between the transcoder and a slow client
    pub client_buffer_chunks: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            restart_backoff_secs: 5,
            resolve_backoff_secs: 30,
            max_resolve_attempts: 0,
            on_demand_resolve: true,
            chunk_size: 4096,
            stall_timeout_secs: 30,
            client_buffer_chunks: 16,
        }
    }
}

impl RelayConfig {
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }

    pub fn resolve_backoff(&self) -> Duration {
        Duration::from_secs(self.resolve_backoff_secs)
    }

    pub fn max_resolve_attempts(&self) -> Option<u32> {
        (self.max_resolve_attempts > 0).then_some(self.max_resolve_attempts)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
}

/// Transcoder (ffmpeg) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Path to ffmpeg
    pub program: String,

    /// Output audio bitrate, ffmpeg notation
    pub bitrate: String,

    /// Output channel count
    pub channels: u16,

    /// Output sample rate; the source rate is kept when unset
    pub sample_rate: Option<u32>,

    /// Upper bound for ffmpeg's reconnect delay, in seconds
    pub reconnect_delay_max_secs: u64,

    /// Network read timeout, in seconds
    pub io_timeout_secs: u64,

    /// User agent presented to the upstream
    pub user_agent: String,

    /// Read the input at its native rate (`-re`)
    pub realtime: bool,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            bitrate: "40k".to_string(),
            channels: 1,
            sample_rate: None,
            reconnect_delay_max_secs: 10,
            io_timeout_secs: 5,
            user_agent: "Mozilla/5.0".to_string(),
            realtime: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,

    pub resolver: ResolverConfig,

    pub scheduler: SchedulerConfig,

    pub relay: RelayConfig,

    pub transcoder: TranscoderConfig,

    pub logging: LoggingConfig,

    /// Station name -> source locator
    pub stations: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_enabled: true,
            resolver: ResolverConfig::default(),
            scheduler: SchedulerConfig::default(),
            relay: RelayConfig::default(),
            transcoder: TranscoderConfig::default(),
            logging: LoggingConfig::default(),
            stations: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.relay.chunk_size == 0 {
            return Err(RelayError::Config("relay.chunk_size must be positive".into()));
        }
        if self.relay.client_buffer_chunks == 0 {
            return Err(RelayError::Config(
                "relay.client_buffer_chunks must be positive".into(),
            ));
        }
        if self.relay.stall_timeout_secs == 0 {
            return Err(RelayError::Config(
                "relay.stall_timeout_secs must be positive".into(),
            ));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(RelayError::Config(
                "scheduler.poll_interval_secs must be positive".into(),
            ));
        }
        if self.resolver.program.trim().is_empty() {
            return Err(RelayError::Config("resolver.program is empty".into()));
        }
        if self.transcoder.program.trim().is_empty() {
            return Err(RelayError::Config("transcoder.program is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.scheduler.staleness(), Duration::from_secs(1800));
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.relay.chunk_size, 4096);
        assert_eq!(config.relay.restart_backoff(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_means_disabled() {
        let relay = RelayConfig {
            refresh_interval_secs: 0,
            max_resolve_attempts: 0,
            ..Default::default()
        };
        assert_eq!(relay.refresh_interval(), None);
        assert_eq!(relay.max_resolve_attempts(), None);

        let relay = RelayConfig {
            max_resolve_attempts: 3,
            ..Default::default()
        };
        assert_eq!(relay.max_resolve_attempts(), Some(3));
        assert_eq!(relay.refresh_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut config = ServerConfig::default();
        config.relay.chunk_size = 0;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_stall_timeout() {
        let mut config = ServerConfig::default();
        config.relay.stall_timeout_secs = 0;
        match config.validate() {
            Err(RelayError::Config(msg)) => assert!(msg.contains("stall_timeout_secs")),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
