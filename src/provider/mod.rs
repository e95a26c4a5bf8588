pub mod deezer;
pub mod spotify;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::normalize::TrackQuery;

/// Identifies which streaming platform a resource comes from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Deezer,
    Spotify,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Deezer => write!(f, "deezer"),
            Platform::Spotify => write!(f, "spotify"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deezer" => Ok(Platform::Deezer),
            "spotify" => Ok(Platform::Spotify),
            _ => Err(anyhow::anyhow!("Unknown platform: {}", s)),
        }
    }
}

/// A single track hit as reported by one platform, already mapped into the
/// common schema. Transient: owned by the adapter call that produced it and
/// discarded after scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTrack {
    pub platform: Platform,
    /// Platform-native ID (string to cover both numeric Deezer IDs and
    /// base62 Spotify IDs)
    pub id: String,
    pub title: String,
    pub artistes: Vec<String>,
    pub duration_ms: u64,
    pub explicit: bool,
    pub cover: String,
    pub preview: String,
    pub release_date: String,
    pub album: String,
    /// Canonical public URL for this track on the platform
    pub url: String,
}

/// Playlist metadata plus its tracklist, as fetched from one platform.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderPlaylist {
    pub platform: Platform,
    pub id: String,
    pub title: String,
    pub description: String,
    pub owner: String,
    pub cover: String,
    pub url: String,
    pub track_count: usize,
    #[serde(skip)]
    pub tracks: Vec<ProviderTrack>,
}

/// Retry policy for upstream rate limiting: capped exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry (1-indexed attempt that just failed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms << (attempt - 1).min(8))
    }
}

/// The provider adapter abstraction.
///
/// An adapter that receives a native ID for its own platform performs a
/// direct lookup; otherwise it falls back to a text search using the query's
/// title/artist guess. "Nothing found" is an empty hit list; errors are
/// reserved for upstream faults, which the resolver downgrades to partial
/// results.
#[async_trait]
pub trait Provider: Send + Sync {
    fn platform(&self) -> Platform;

    /// Upper bound the resolver applies to a single call to this adapter.
    fn call_timeout(&self) -> Duration;

    /// Resolve a query into candidate tracks on this platform.
    async fn resolve(&self, query: &TrackQuery) -> Result<Vec<ProviderTrack>, ResolveError>;

    /// Fetch a playlist with its tracks by native ID.
    async fn playlist(&self, id: &str) -> Result<ProviderPlaylist, ResolveError>;
}

/// Drop a trailing "(feat …" section from a title before searching other
/// platforms; feature credits rarely survive across catalogs verbatim.
pub(crate) fn strip_feat_suffix(title: &str) -> &str {
    match title.to_ascii_lowercase().find("(feat") {
        Some(index) => title[..index].trim_end(),
        None => title,
    }
}

// Re-export the adapter implementations
pub use deezer::DeezerClient;
pub use spotify::SpotifyClient;
