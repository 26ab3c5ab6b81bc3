//! Configuration file support
//!
//! Loads relay configuration from TOML files. Only `[server]` is required;
//! every other section and field falls back to the built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{
    LoggingConfig, RelayConfig, ResolverConfig, SchedulerConfig, ServerConfig, TranscoderConfig,
};

/// Environment variable naming the config file when no argument is given
pub const CONFIG_ENV: &str = "RELAY_CONFIG";

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Resolution tool settings
    pub resolver: Option<ResolverSettings>,
    /// Refresh scheduler settings
    pub scheduler: Option<SchedulerSettings>,
    /// Relay session settings
    pub relay: Option<RelaySettings>,
    /// Transcoder settings
    pub transcoder: Option<TranscoderSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
    /// Station name -> source locator
    #[serde(default)]
    pub stations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverSettings {
    pub program: Option<String>,
    pub format: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub extra_args: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub staleness_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelaySettings {
    pub refresh_interval_secs: Option<u64>,
    pub restart_backoff_secs: Option<u64>,
    pub resolve_backoff_secs: Option<u64>,
    pub max_resolve_attempts: Option<u32>,
    pub on_demand_resolve: Option<bool>,
    pub chunk_size: Option<usize>,
    pub stall_timeout_secs: Option<u64>,
    pub client_buffer_chunks: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscoderSettings {
    pub program: Option<String>,
    pub bitrate: Option<String>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub reconnect_delay_max_secs: Option<u64>,
    pub io_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub realtime: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let defaults = ServerConfig::default();
        let mut stations = BTreeMap::new();
        stations.insert(
            "aljazeera_english".to_string(),
            "https://www.youtube.com/@AlJazeeraEnglish/live".to_string(),
        );
        stations.insert(
            "aljazeera_arabic".to_string(),
            "https://www.youtube.com/@aljazeera/live".to_string(),
        );

        Self {
            server: ServerSettings {
                host: defaults.host,
                port: defaults.port,
                cors_enabled: Some(defaults.cors_enabled),
            },
            resolver: Some(ResolverSettings {
                program: Some(defaults.resolver.program),
                format: Some(defaults.resolver.format),
                cookie_file: defaults.resolver.cookie_file,
                extra_args: Some(defaults.resolver.extra_args),
                timeout_secs: Some(defaults.resolver.timeout_secs),
            }),
            scheduler: Some(SchedulerSettings {
                staleness_secs: Some(defaults.scheduler.staleness_secs),
                poll_interval_secs: Some(defaults.scheduler.poll_interval_secs),
            }),
            relay: Some(RelaySettings {
                refresh_interval_secs: Some(defaults.relay.refresh_interval_secs),
                restart_backoff_secs: Some(defaults.relay.restart_backoff_secs),
                resolve_backoff_secs: Some(defaults.relay.resolve_backoff_secs),
                max_resolve_attempts: Some(defaults.relay.max_resolve_attempts),
                on_demand_resolve: Some(defaults.relay.on_demand_resolve),
                chunk_size: Some(defaults.relay.chunk_size),
                stall_timeout_secs: Some(defaults.relay.stall_timeout_secs),
                client_buffer_chunks: Some(defaults.relay.client_buffer_chunks),
            }),
            transcoder: Some(TranscoderSettings {
                program: Some(defaults.transcoder.program),
                bitrate: Some(defaults.transcoder.bitrate),
                channels: Some(defaults.transcoder.channels),
                sample_rate: defaults.transcoder.sample_rate,
                reconnect_delay_max_secs: Some(defaults.transcoder.reconnect_delay_max_secs),
                io_timeout_secs: Some(defaults.transcoder.io_timeout_secs),
                user_agent: Some(defaults.transcoder.user_agent),
                realtime: Some(defaults.transcoder.realtime),
            }),
            logging: Some(LoggingSettings {
                level: defaults.logging.level,
                format: Some(defaults.logging.format),
            }),
            stations,
        }
    }

    /// Convert to ServerConfig
    pub fn into_server_config(self) -> ServerConfig {
        let resolver = {
            let d = ResolverConfig::default();
            let s = self.resolver.unwrap_or_default();
            ResolverConfig {
                program: s.program.unwrap_or(d.program),
                format: s.format.unwrap_or(d.format),
                cookie_file: s.cookie_file.or(d.cookie_file),
                extra_args: s.extra_args.unwrap_or(d.extra_args),
                timeout_secs: s.timeout_secs.unwrap_or(d.timeout_secs),
            }
        };

        let scheduler = {
            let d = SchedulerConfig::default();
            let s = self.scheduler.unwrap_or_default();
            SchedulerConfig {
                staleness_secs: s.staleness_secs.unwrap_or(d.staleness_secs),
                poll_interval_secs: s.poll_interval_secs.unwrap_or(d.poll_interval_secs),
            }
        };

        let relay = {
            let d = RelayConfig::default();
            let s = self.relay.unwrap_or_default();
            RelayConfig {
                refresh_interval_secs: s.refresh_interval_secs.unwrap_or(d.refresh_interval_secs),
                restart_backoff_secs: s.restart_backoff_secs.unwrap_or(d.restart_backoff_secs),
                resolve_backoff_secs: s.resolve_backoff_secs.unwrap_or(d.resolve_backoff_secs),
                max_resolve_attempts: s.max_resolve_attempts.unwrap_or(d.max_resolve_attempts),
                on_demand_resolve: s.on_demand_resolve.unwrap_or(d.on_demand_resolve),
                chunk_size: s.chunk_size.unwrap_or(d.chunk_size),
                stall_timeout_secs: s.stall_timeout_secs.unwrap_or(d.stall_timeout_secs),
                client_buffer_chunks: s.client_buffer_chunks.unwrap_or(d.client_buffer_chunks),
            }
        };

        let transcoder = {
            let d = TranscoderConfig::default();
            let s = self.transcoder.unwrap_or_default();
            TranscoderConfig {
                program: s.program.unwrap_or(d.program),
                bitrate: s.bitrate.unwrap_or(d.bitrate),
                channels: s.channels.unwrap_or(d.channels),
                sample_rate: s.sample_rate.or(d.sample_rate),
                reconnect_delay_max_secs: s
                    .reconnect_delay_max_secs
                    .unwrap_or(d.reconnect_delay_max_secs),
                io_timeout_secs: s.io_timeout_secs.unwrap_or(d.io_timeout_secs),
                user_agent: s.user_agent.unwrap_or(d.user_agent),
                realtime: s.realtime.unwrap_or(d.realtime),
            }
        };

        let logging = match self.logging {
            Some(l) => LoggingConfig {
                level: l.level,
                format: l.format.unwrap_or_else(|| LoggingConfig::default().format),
            },
            None => LoggingConfig::default(),
        };

        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            cors_enabled: self.server.cors_enabled.unwrap_or(true),
            resolver,
            scheduler,
            relay,
            transcoder,
            logging,
            stations: self.stations,
        }
    }
}

/// Pick the config path: first CLI argument, then `RELAY_CONFIG`, then `config.toml`
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}
