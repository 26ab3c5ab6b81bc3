//! Source locator resolution
//!
//! A resolver turns a stable source locator (a channel's `/live` page, a
//! video page) into the short-lived direct media URL that the transcoder
//! can read. Implementations never retry and never fail: every outcome,
//! including a crashed tool, is folded into a [`ResolutionResult`].

pub mod ytdlp;

use async_trait::async_trait;

use crate::error::{RelayError, ResolveFailure, Result};

pub use ytdlp::YtDlpResolver;

/// Outcome of one resolver invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionResult {
    Success(String),
    Offline,
    ExtractorError(String),
}

impl ResolutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ResolutionResult::Success(_))
    }

    pub fn failure(&self) -> Option<ResolveFailure> {
        match self {
            ResolutionResult::Success(_) => None,
            ResolutionResult::Offline => Some(ResolveFailure::Offline),
            ResolutionResult::ExtractorError(detail) => {
                Some(ResolveFailure::Extractor(detail.clone()))
            }
        }
    }

    /// The URL, or the failure as an error attributed to `station`
    pub fn into_url(self, station: &str) -> Result<String> {
        match self {
            ResolutionResult::Success(url) => Ok(url),
            ResolutionResult::Offline => Err(RelayError::Resolution {
                station: station.to_string(),
                failure: ResolveFailure::Offline,
            }),
            ResolutionResult::ExtractorError(detail) => Err(RelayError::Resolution {
                station: station.to_string(),
                failure: ResolveFailure::Extractor(detail),
            }),
        }
    }
}

/// Something that can resolve a source locator
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, locator: &str) -> ResolutionResult;
}
