//! Request orchestration: cache consultation, concurrent provider fan-out
//! with per-provider timeouts and a global deadline, single-flight
//! coalescing of duplicate concurrent resolutions, and aggregation.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::cache::{identity_key, TrackCache};
use crate::error::ResolveError;
use crate::matcher::{Matcher, NormalizedTrack};
use crate::normalize::{QueryKind, TrackQuery};
use crate::provider::{Platform, Provider, ProviderPlaylist, ProviderTrack};

/// Concurrent per-track resolutions while converting a playlist.
const PLAYLIST_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Global request deadline: aggregation proceeds with whatever has
    /// completed once this elapses
    pub request_deadline_ms: u64,
    /// Upper bound on playlist tracks fanned out per conversion
    pub max_playlist_tracks: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            request_deadline_ms: 8000,
            max_playlist_tracks: 100,
        }
    }
}

/// A converted playlist: source metadata plus, for each source track, the
/// normalized matches found across platforms (aligned by index).
#[derive(Debug)]
pub struct ResolvedPlaylist {
    pub playlist: ProviderPlaylist,
    pub matches: Vec<Vec<NormalizedTrack>>,
}

type InFlightMap = Mutex<HashMap<String, broadcast::Sender<Vec<NormalizedTrack>>>>;

pub struct Resolver {
    providers: Vec<Arc<dyn Provider>>,
    matcher: Matcher,
    cache: TrackCache,
    deadline: Duration,
    max_playlist_tracks: usize,
    in_flight: InFlightMap,
}

impl Resolver {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        matcher: Matcher,
        cache: TrackCache,
        config: &ResolverConfig,
    ) -> Self {
        Self {
            providers,
            matcher,
            cache,
            deadline: Duration::from_millis(config.request_deadline_ms),
            max_playlist_tracks: config.max_playlist_tracks,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.providers.iter().map(|p| p.platform()).collect()
    }

    fn provider_for(&self, platform: Platform) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.platform() == platform)
    }

    /// Resolve a track query into normalized tracks carrying every matched
    /// platform's URL. Partial success (some providers down) returns whatever
    /// matched; only total provider failure is an error.
    pub async fn resolve(&self, query: &TrackQuery) -> Result<Vec<NormalizedTrack>, ResolveError> {
        if query.kind == QueryKind::Playlist {
            return Err(ResolveError::InvalidInput(
                "playlist link; use the playlist endpoint".to_string(),
            ));
        }

        match (query.source, query.native_id.clone()) {
            (Some(source), Some(id)) => self.resolve_track_url(source, id, query).await,
            _ => self.resolve_free_text(query).await,
        }
    }

    /// URL query: look the track up on its source platform, then search the
    /// remaining platforms with the reference metadata.
    async fn resolve_track_url(
        &self,
        source: Platform,
        id: String,
        query: &TrackQuery,
    ) -> Result<Vec<NormalizedTrack>, ResolveError> {
        let alias_key = format!("{}::{}", source, id);
        if let Some(hit) = self.cache.get(&alias_key) {
            tracing::debug!("cache hit for {}", alias_key);
            return Ok(hit);
        }

        let work = async {
            let provider = self.provider_for(source).ok_or_else(|| {
                ResolveError::InvalidInput(format!("no adapter configured for {}", source))
            })?;

            let source_batch =
                match timeout(provider.call_timeout(), provider.resolve(query)).await {
                    Ok(Ok(batch)) => batch,
                    Ok(Err(ResolveError::NotFound(platform))) => {
                        return Err(ResolveError::NotFound(platform));
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("source lookup on {} failed: {}", source, e);
                        return Err(ResolveError::AllProvidersFailed);
                    }
                    Err(_) => {
                        tracing::warn!("source lookup on {} timed out", source);
                        return Err(ResolveError::AllProvidersFailed);
                    }
                };

            let Some(reference) = source_batch.first().cloned() else {
                return Err(ResolveError::NotFound(source));
            };

            let identity = identity_key(
                &reference.title,
                reference.artistes.first().map(String::as_str).unwrap_or(""),
                reference.duration_ms,
            );
            if let Some(hit) = self.cache.get(&identity) {
                self.cache.put(alias_key.clone(), hit.clone());
                return Ok(hit);
            }

            let search_query = query.with_search_guess(
                &reference.title,
                reference.artistes.first().map(String::as_str),
            );
            let (mut batches, _successes) = self.fan_out(&search_query, Some(source)).await;
            batches.insert(0, source_batch);

            let merged = self.matcher.aggregate(&search_query, batches);
            if !merged.is_empty() {
                self.cache.put(identity, merged.clone());
                self.cache.put(alias_key.clone(), merged.clone());
            }
            Ok(merged)
        };

        self.coalesced(alias_key.clone(), work).await
    }

    /// Free-text query: every provider searches with the same guess.
    async fn resolve_free_text(
        &self,
        query: &TrackQuery,
    ) -> Result<Vec<NormalizedTrack>, ResolveError> {
        let identity = identity_key(
            &query.title_guess,
            query.artist_guess.as_deref().unwrap_or(""),
            0,
        );
        if let Some(hit) = self.cache.get(&identity) {
            tracing::debug!("cache hit for free-text query");
            return Ok(hit);
        }

        let key = identity.clone();
        let work = async {
            let (batches, successes) = self.fan_out(query, None).await;
            if successes == 0 {
                return Err(ResolveError::AllProvidersFailed);
            }

            let merged = self.matcher.aggregate(query, batches);
            if !merged.is_empty() {
                self.cache.put(identity, merged.clone());
            }
            Ok(merged)
        };

        self.coalesced(key, work).await
    }

    /// Fan a query out to all providers (minus `skip`) concurrently. Each
    /// call is bounded by its adapter's timeout; the whole collection is
    /// bounded by the request deadline, after which stragglers are aborted
    /// and whatever completed is aggregated. Returns the successful batches
    /// and how many providers succeeded.
    async fn fan_out(
        &self,
        query: &TrackQuery,
        skip: Option<Platform>,
    ) -> (Vec<Vec<ProviderTrack>>, usize) {
        let mut set = JoinSet::new();
        let mut participants = 0;
        for provider in &self.providers {
            if Some(provider.platform()) == skip {
                continue;
            }
            participants += 1;
            let provider = Arc::clone(provider);
            let query = query.clone();
            set.spawn(async move {
                let platform = provider.platform();
                match timeout(provider.call_timeout(), provider.resolve(&query)).await {
                    Ok(result) => (platform, result),
                    Err(_) => (
                        platform,
                        Err(ResolveError::unavailable(platform, "timed out")),
                    ),
                }
            });
        }

        let mut batches = Vec::new();
        let mut successes = 0;
        let collect = async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((_, Ok(batch))) => {
                        successes += 1;
                        batches.push(batch);
                    }
                    Ok((platform, Err(e))) => {
                        tracing::warn!("search on {} failed: {}", platform, e);
                    }
                    Err(e) => {
                        tracing::warn!("adapter task failed: {}", e);
                    }
                }
            }
        };
        if timeout(self.deadline, collect).await.is_err() {
            tracing::warn!(
                "request deadline reached, aggregating {}/{} providers",
                successes,
                participants
            );
        }

        (batches, successes)
    }

    /// Convert a playlist: fetch it from its source platform, then resolve
    /// each track across the other platforms with bounded concurrency. Tracks
    /// that fail to resolve simply have no matches.
    pub async fn resolve_playlist(
        self: Arc<Self>,
        query: &TrackQuery,
    ) -> Result<ResolvedPlaylist, ResolveError> {
        if query.kind != QueryKind::Playlist {
            return Err(ResolveError::InvalidInput("not a playlist link".to_string()));
        }
        let (Some(source), Some(id)) = (query.source, query.native_id.clone()) else {
            return Err(ResolveError::InvalidInput(
                "playlist conversion requires a platform link".to_string(),
            ));
        };

        let provider = self.provider_for(source).ok_or_else(|| {
            ResolveError::InvalidInput(format!("no adapter configured for {}", source))
        })?;
        let mut playlist = match timeout(provider.call_timeout(), provider.playlist(&id)).await {
            Ok(Ok(playlist)) => playlist,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ResolveError::unavailable(source, "playlist fetch timed out"));
            }
        };

        if playlist.tracks.len() > self.max_playlist_tracks {
            tracing::debug!(
                "truncating playlist from {} to {} tracks",
                playlist.tracks.len(),
                self.max_playlist_tracks
            );
            playlist.tracks.truncate(self.max_playlist_tracks);
        }

        let semaphore = Arc::new(Semaphore::new(PLAYLIST_CONCURRENCY));
        let mut set = JoinSet::new();
        for (index, track) in playlist.tracks.iter().enumerate() {
            let resolver = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let search = TrackQuery::from_metadata(
                &track.title,
                track.artistes.first().map(String::as_str),
            );
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let matches = resolver.resolve(&search).await.unwrap_or_default();
                (index, matches)
            });
        }

        let mut matches = vec![Vec::new(); playlist.tracks.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, merged)) => matches[index] = merged,
                Err(e) => tracing::warn!("playlist track task failed: {}", e),
            }
        }

        Ok(ResolvedPlaylist { playlist, matches })
    }

    /// Coalesce concurrent resolutions of the same key: the first caller does
    /// the work and broadcasts its result; concurrent callers await that
    /// broadcast. A failed or cancelled leader closes the channel and the
    /// waiters fall back to resolving on their own.
    async fn coalesced<F>(&self, key: String, work: F) -> Result<Vec<NormalizedTrack>, ResolveError>
    where
        F: std::future::Future<Output = Result<Vec<NormalizedTrack>, ResolveError>>,
    {
        let waiter = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => Some(entry.get().subscribe()),
                Entry::Vacant(entry) => {
                    let (sender, _) = broadcast::channel(1);
                    entry.insert(sender);
                    None
                }
            }
        };

        if let Some(mut receiver) = waiter {
            if let Ok(tracks) = receiver.recv().await {
                return Ok(tracks);
            }
            return work.await;
        }

        let guard = FlightGuard {
            in_flight: &self.in_flight,
            key,
        };
        let result = work.await;
        if let Ok(tracks) = &result {
            guard.publish(tracks.clone());
        }
        result
    }
}

/// Removes the in-flight entry on drop so a cancelled leader never wedges
/// later requests for the same key.
struct FlightGuard<'a> {
    in_flight: &'a InFlightMap,
    key: String,
}

impl FlightGuard<'_> {
    fn publish(&self, tracks: Vec<NormalizedTrack>) {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = in_flight.get(&self.key) {
            let _ = sender.send(tracks);
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::matcher::MatcherConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test adapter returning a fixed hit list after an optional delay.
    struct StaticProvider {
        platform: Platform,
        tracks: Vec<ProviderTrack>,
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        fn new(platform: Platform, tracks: Vec<ProviderTrack>) -> Self {
            Self {
                platform,
                tracks,
                delay: Duration::ZERO,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl Provider for StaticProvider {
        fn platform(&self) -> Platform {
            self.platform
        }

        fn call_timeout(&self) -> Duration {
            Duration::from_millis(100)
        }

        async fn resolve(&self, _query: &TrackQuery) -> Result<Vec<ProviderTrack>, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(ResolveError::unavailable(self.platform, "boom"));
            }
            Ok(self.tracks.clone())
        }

        async fn playlist(&self, id: &str) -> Result<ProviderPlaylist, ResolveError> {
            if self.fail {
                return Err(ResolveError::unavailable(self.platform, "boom"));
            }
            Ok(ProviderPlaylist {
                platform: self.platform,
                id: id.to_string(),
                title: "Test Playlist".to_string(),
                description: String::new(),
                owner: "tester".to_string(),
                cover: String::new(),
                url: String::new(),
                track_count: self.tracks.len(),
                tracks: self.tracks.clone(),
            })
        }
    }

    fn hit(platform: Platform, id: &str, title: &str, duration_ms: u64) -> ProviderTrack {
        ProviderTrack {
            platform,
            id: id.to_string(),
            title: title.to_string(),
            artistes: vec!["The Weeknd".to_string()],
            duration_ms,
            explicit: false,
            cover: String::new(),
            preview: String::new(),
            release_date: String::new(),
            album: String::new(),
            url: format!("https://{}/{}", platform, id),
        }
    }

    fn resolver(providers: Vec<Arc<dyn Provider>>) -> Arc<Resolver> {
        Arc::new(Resolver::new(
            providers,
            Matcher::new(MatcherConfig::default()),
            TrackCache::new(&CacheConfig {
                capacity: 64,
                ttl_secs: 60,
            }),
            &ResolverConfig {
                request_deadline_ms: 500,
                max_playlist_tracks: 10,
            },
        ))
    }

    #[tokio::test]
    async fn test_url_query_merges_both_platforms() {
        let deezer = StaticProvider::new(
            Platform::Deezer,
            vec![hit(Platform::Deezer, "1109731", "Blinding Lights", 200_000)],
        );
        let spotify = StaticProvider::new(
            Platform::Spotify,
            vec![hit(Platform::Spotify, "0VjIjW", "Blinding Lights", 200_040)],
        );
        let resolver = resolver(vec![Arc::new(deezer), Arc::new(spotify)]);

        let query = TrackQuery::parse("https://www.deezer.com/track/1109731").unwrap();
        let tracks = resolver.resolve(&query).await.unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].duration_ms, 200_000);
        assert_eq!(tracks[0].links.len(), 2);
    }

    #[tokio::test]
    async fn test_second_lookup_hits_cache() {
        let deezer = Arc::new(StaticProvider::new(
            Platform::Deezer,
            vec![hit(Platform::Deezer, "1", "Song", 180_000)],
        ));
        let resolver = resolver(vec![deezer.clone()]);

        let query = TrackQuery::parse("https://www.deezer.com/track/1").unwrap();
        resolver.resolve(&query).await.unwrap();
        let calls_after_first = deezer.calls.load(Ordering::SeqCst);
        resolver.resolve(&query).await.unwrap();

        assert_eq!(deezer.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_degrades_to_partial_result() {
        let deezer = StaticProvider::new(
            Platform::Deezer,
            vec![hit(Platform::Deezer, "1", "Blinding Lights", 200_000)],
        );
        // Exceeds the 100ms per-call timeout
        let spotify = StaticProvider::new(
            Platform::Spotify,
            vec![hit(Platform::Spotify, "s", "Blinding Lights", 200_000)],
        )
        .with_delay(Duration::from_secs(5));
        let resolver = resolver(vec![Arc::new(deezer), Arc::new(spotify)]);

        let query = TrackQuery::parse("https://www.deezer.com/track/1").unwrap();
        let tracks = resolver.resolve(&query).await.unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].links.len(), 1);
        assert!(tracks[0].links.contains_key(&Platform::Deezer));
    }

    #[tokio::test]
    async fn test_all_providers_failing_is_an_error() {
        let deezer = StaticProvider::new(Platform::Deezer, vec![]).failing();
        let spotify = StaticProvider::new(Platform::Spotify, vec![]).failing();
        let resolver = resolver(vec![Arc::new(deezer), Arc::new(spotify)]);

        let query = TrackQuery::parse("Blinding Lights").unwrap();
        let result = resolver.resolve(&query).await;

        assert!(matches!(result, Err(ResolveError::AllProvidersFailed)));
    }

    #[tokio::test]
    async fn test_missing_source_track_is_not_found() {
        let deezer = StaticProvider::new(Platform::Deezer, vec![]);
        let resolver = resolver(vec![Arc::new(deezer)]);

        let query = TrackQuery::parse("https://www.deezer.com/track/404404").unwrap();
        let result = resolver.resolve(&query).await;

        assert!(matches!(
            result,
            Err(ResolveError::NotFound(Platform::Deezer))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_identical_queries_coalesce() {
        let deezer = Arc::new(
            StaticProvider::new(
                Platform::Deezer,
                vec![hit(Platform::Deezer, "1", "Blinding Lights", 200_000)],
            )
            .with_delay(Duration::from_millis(20)),
        );
        let resolver = resolver(vec![deezer.clone()]);

        let query = TrackQuery::parse("Blinding Lights").unwrap();
        let (a, b) = tokio::join!(resolver.resolve(&query), resolver.resolve(&query));

        assert_eq!(a.unwrap(), b.unwrap());
        // Leader fanned out once; the follower rode along
        assert_eq!(deezer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_playlist_conversion_matches_tracks() {
        let song = hit(Platform::Deezer, "d1", "Blinding Lights", 200_000);
        let deezer = StaticProvider::new(Platform::Deezer, vec![song]);
        let spotify = StaticProvider::new(
            Platform::Spotify,
            vec![hit(Platform::Spotify, "s1", "Blinding Lights", 200_040)],
        );
        let resolver = resolver(vec![Arc::new(deezer), Arc::new(spotify)]);

        let query = TrackQuery::parse("https://www.deezer.com/playlist/99").unwrap();
        let converted = resolver.clone().resolve_playlist(&query).await.unwrap();

        assert_eq!(converted.playlist.title, "Test Playlist");
        assert_eq!(converted.matches.len(), 1);
        assert!(converted.matches[0][0]
            .links
            .contains_key(&Platform::Spotify));
    }

    #[tokio::test]
    async fn test_track_query_rejected_by_playlist_path() {
        let deezer = StaticProvider::new(Platform::Deezer, vec![]);
        let resolver = resolver(vec![Arc::new(deezer)]);

        let query = TrackQuery::parse("https://www.deezer.com/track/1").unwrap();
        let result = resolver.clone().resolve_playlist(&query).await;

        assert!(matches!(result, Err(ResolveError::InvalidInput(_))));
    }
}
