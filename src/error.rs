use thiserror::Error;

/// Why a resolution attempt produced no URL
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveFailure {
    #[error("source is offline")]
    Offline,

    #[error("extractor error: {0}")]
    Extractor(String),
}

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Station not found: {0}")]
    StationNotFound(String),

    #[error("Invalid station name {name:?}: {reason}")]
    InvalidStation { name: String, reason: String },

    #[error("No resolved URL available for station: {0}")]
    CacheMiss(String),

    #[error("Resolution failed for {station}: {failure}")]
    Resolution {
        station: String,
        failure: ResolveFailure,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcoder error: {0}")]
    Transcode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RelayError>;
