//! Response cache: capacity-bounded LRU with TTL expiry, keyed by the
//! normalized track identity. Consulted before provider fan-out; any cache
//! fault is swallowed so the request falls through to the providers.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::matcher::{normalize_name, normalize_title, NormalizedTrack};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before least-recently-used eviction
    pub capacity: usize,
    /// Seconds an entry stays valid; upstream catalogs change
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

struct CacheEntry {
    tracks: Vec<NormalizedTrack>,
    cached_at: Instant,
}

pub struct TrackCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl TrackCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<NormalizedTrack>> {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("track cache unavailable, bypassing: {}", e);
                return None;
            }
        };

        match entries.get(key) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.tracks.clone()),
            Some(_) => {
                // Expired
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, tracks: Vec<NormalizedTrack>) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("track cache unavailable, dropping write: {}", e);
                return;
            }
        };

        entries.put(
            key,
            CacheEntry {
                tracks,
                cached_at: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// Deterministic identity key: normalized title + primary artist + duration
/// rounded to the nearest second (absorbs sub-second differences between
/// provider catalogs).
pub fn identity_key(title: &str, primary_artist: &str, duration_ms: u64) -> String {
    let duration_secs = (duration_ms + 500) / 1000;
    format!(
        "{}::{}::{}",
        normalize_title(title),
        normalize_name(primary_artist),
        duration_secs
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Platform;
    use std::collections::BTreeMap;

    fn sample_track() -> NormalizedTrack {
        NormalizedTrack {
            title: "Blinding Lights".to_string(),
            artistes: vec!["The Weeknd".to_string()],
            duration_ms: 200_000,
            explicit: false,
            cover: String::new(),
            preview: String::new(),
            release_date: String::new(),
            album: String::new(),
            source: Platform::Deezer,
            ids: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    fn cache(capacity: usize, ttl_secs: u64) -> TrackCache {
        TrackCache::new(&CacheConfig { capacity, ttl_secs })
    }

    #[test]
    fn test_round_trip_within_ttl() {
        let cache = cache(8, 60);
        let track = sample_track();
        cache.put("k".to_string(), vec![track.clone()]);

        assert_eq!(cache.get("k"), Some(vec![track]));
    }

    #[test]
    fn test_expired_entry_is_absent() {
        // Zero TTL: every entry is already expired on read
        let cache = cache(8, 0);
        cache.put("k".to_string(), vec![sample_track()]);

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = cache(2, 60);
        cache.put("a".to_string(), vec![sample_track()]);
        cache.put("b".to_string(), vec![sample_track()]);

        // Touch "a" so "b" becomes the eviction candidate
        assert!(cache.get("a").is_some());
        cache.put("c".to_string(), vec![sample_track()]);

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_identity_key_buckets_duration() {
        // 200040ms and 200000ms round to the same second
        assert_eq!(
            identity_key("Blinding Lights", "The Weeknd", 200_040),
            identity_key("Blinding Lights", "The Weeknd", 200_000)
        );
        // Title normalization folds case and feature credits
        assert_eq!(
            identity_key("Blinding Lights (feat. X)", "The Weeknd", 200_000),
            identity_key("blinding lights", "the weeknd", 200_000)
        );
        assert_ne!(
            identity_key("Blinding Lights", "The Weeknd", 200_000),
            identity_key("Blinding Lights", "The Weeknd", 201_000)
        );
    }
}
