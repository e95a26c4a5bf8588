use thiserror::Error;

use crate::provider::Platform;

/// Errors produced while resolving a query across platforms.
///
/// A single upstream failure never fails the whole request: adapters report
/// `ProviderUnavailable` and the resolver degrades to partial results. Only
/// `AllProvidersFailed` (every adapter failed or timed out) reaches the
/// client as an error status.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The incoming query was empty or otherwise unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The track or playlist does not exist on its source platform.
    #[error("not found on {0}")]
    NotFound(Platform),

    /// One upstream platform failed or timed out for this request.
    #[error("{platform} unavailable: {reason}")]
    ProviderUnavailable { platform: Platform, reason: String },

    /// Every configured platform failed or timed out.
    #[error("all providers failed or timed out")]
    AllProvidersFailed,

    /// Cache faults are pass-through; the resolver falls back to providers.
    #[error("cache error: {0}")]
    Cache(String),
}

impl ResolveError {
    pub fn unavailable(platform: Platform, reason: impl Into<String>) -> Self {
        ResolveError::ProviderUnavailable {
            platform,
            reason: reason.into(),
        }
    }
}
