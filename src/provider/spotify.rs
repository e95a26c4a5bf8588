//! Spotify adapter: client-credentials OAuth plus REST lookups and searches.
//!
//! The app token comes from the client-credentials grant and never carries
//! user scopes; credentials stay server-side (config or environment).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{strip_feat_suffix, Platform, Provider, ProviderPlaylist, ProviderTrack, RetryConfig};
use crate::config::SpotifyConfig;
use crate::error::ResolveError;
use crate::normalize::TrackQuery;

/// Refresh slack so a token is never used right at its expiry edge.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

pub struct SpotifyClient {
    http: reqwest::Client,
    api_base: String,
    auth_base: String,
    client_id: String,
    client_secret: String,
    timeout: Duration,
    retry: RetryConfig,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl SpotifyClient {
    pub fn new(config: &SpotifyConfig) -> anyhow::Result<Self> {
        if config.client_id.is_empty() || config.client_secret.is_empty() {
            anyhow::bail!("spotify client credentials are not configured");
        }

        let timeout = Duration::from_millis(config.timeout_ms);
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            auth_base: config.auth_base.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            timeout,
            retry: config.retry.clone(),
            token: Mutex::new(None),
        })
    }

    /// Return a live app token, fetching a fresh one when the cached token
    /// is missing or about to expire.
    async fn access_token(&self) -> Result<String, ResolveError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            if token.is_valid() {
                return Ok(token.access_token.clone());
            }
        }

        let bearer = general_purpose::STANDARD
            .encode(format!("{}:{}", self.client_id, self.client_secret));

        let response = self
            .http
            .post(format!("{}/api/token", self.auth_base))
            .header("Authorization", format!("Basic {}", bearer))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ResolveError::unavailable(Platform::Spotify, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ResolveError::unavailable(
                Platform::Spotify,
                format!("token request returned {}", response.status()),
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::unavailable(Platform::Spotify, e.to_string()))?;

        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in.max(60)),
        };
        *slot = Some(cached);

        Ok(token.access_token)
    }

    /// GET a Spotify endpoint with bearer auth. 429 responses back off and
    /// retry per the configured policy; a 401 drops the cached token so the
    /// next attempt re-authenticates.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ResolveError> {
        let mut attempt = 1;
        loop {
            let token = self.access_token().await?;
            let response = self
                .http
                .get(url)
                .header("Authorization", format!("Bearer {}", token))
                .send()
                .await
                .map_err(|e| ResolveError::unavailable(Platform::Spotify, e.to_string()))?;

            match response.status().as_u16() {
                429 if attempt < self.retry.max_attempts => {
                    let header_delay = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs);
                    let delay = header_delay.unwrap_or_else(|| self.retry.delay_for(attempt));
                    tracing::warn!("spotify rate limited, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                429 => {
                    return Err(ResolveError::unavailable(
                        Platform::Spotify,
                        "rate limited after retries",
                    ));
                }
                401 if attempt < self.retry.max_attempts => {
                    *self.token.lock().await = None;
                    attempt += 1;
                }
                401 => {
                    return Err(ResolveError::unavailable(Platform::Spotify, "unauthorized"));
                }
                404 => return Err(ResolveError::NotFound(Platform::Spotify)),
                status if status >= 500 => {
                    return Err(ResolveError::unavailable(
                        Platform::Spotify,
                        format!("spotify returned {}", status),
                    ));
                }
                _ => {
                    return response.json().await.map_err(|e| {
                        ResolveError::unavailable(
                            Platform::Spotify,
                            format!("unexpected response shape: {}", e),
                        )
                    });
                }
            }
        }
    }

    async fn lookup_track(&self, id: &str) -> Result<Vec<ProviderTrack>, ResolveError> {
        let url = format!("{}/v1/tracks/{}", self.api_base, id);
        let track: SpotifyTrack = self.get_json(&url).await?;
        Ok(vec![track.into_provider_track()])
    }

    async fn search_track(
        &self,
        title: &str,
        artist: Option<&str>,
    ) -> Result<Vec<ProviderTrack>, ResolveError> {
        let title = strip_feat_suffix(title);
        let payload = match artist {
            Some(artist) => format!("track:{} artist:{}", title, artist),
            None => title.to_string(),
        };
        let url = format!(
            "{}/v1/search?q={}&type=track&limit=5",
            self.api_base,
            urlencoding::encode(&payload)
        );

        let results: SpotifySearchResponse = self.get_json(&url).await?;
        Ok(results
            .tracks
            .items
            .into_iter()
            .map(SpotifyTrack::into_provider_track)
            .collect())
    }
}

#[async_trait]
impl Provider for SpotifyClient {
    fn platform(&self) -> Platform {
        Platform::Spotify
    }

    fn call_timeout(&self) -> Duration {
        self.timeout
    }

    async fn resolve(&self, query: &TrackQuery) -> Result<Vec<ProviderTrack>, ResolveError> {
        match (&query.source, &query.native_id) {
            (Some(Platform::Spotify), Some(id)) => self.lookup_track(id).await,
            _ => {
                if query.title_guess.is_empty() {
                    return Ok(Vec::new());
                }
                self.search_track(&query.title_guess, query.artist_guess.as_deref())
                    .await
            }
        }
    }

    async fn playlist(&self, id: &str) -> Result<ProviderPlaylist, ResolveError> {
        let url = format!("{}/v1/playlists/{}", self.api_base, id);
        let playlist: SpotifyPlaylist = self.get_json(&url).await?;
        Ok(playlist.into_provider_playlist())
    }
}

// API response models

#[derive(Debug, Deserialize)]
struct SpotifySearchResponse {
    #[serde(default)]
    tracks: SpotifyTrackPage,
}

#[derive(Debug, Default, Deserialize)]
struct SpotifyTrackPage {
    #[serde(default)]
    items: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: String,
    name: String,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    explicit: bool,
    preview_url: Option<String>,
    #[serde(default)]
    external_urls: SpotifyExternalUrls,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
}

#[derive(Debug, Default, Deserialize)]
struct SpotifyExternalUrls {
    #[serde(default)]
    spotify: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    #[serde(default)]
    name: String,
    #[serde(default)]
    images: Vec<SpotifyImage>,
    #[serde(default)]
    release_date: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyPlaylist {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    external_urls: SpotifyExternalUrls,
    #[serde(default)]
    images: Vec<SpotifyImage>,
    owner: Option<SpotifyOwner>,
    #[serde(default)]
    tracks: SpotifyPlaylistPage,
}

#[derive(Debug, Deserialize)]
struct SpotifyOwner {
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct SpotifyPlaylistPage {
    #[serde(default)]
    items: Vec<SpotifyPlaylistItem>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct SpotifyPlaylistItem {
    track: Option<SpotifyTrack>,
}

impl SpotifyTrack {
    fn into_provider_track(self) -> ProviderTrack {
        let url = if self.external_urls.spotify.is_empty() {
            format!("https://open.spotify.com/track/{}", self.id)
        } else {
            self.external_urls.spotify
        };

        let (album_title, cover, release_date) = match self.album {
            Some(album) => {
                let cover = album.images.first().map(|i| i.url.clone()).unwrap_or_default();
                (album.name, cover, album.release_date)
            }
            None => (String::new(), String::new(), String::new()),
        };

        ProviderTrack {
            platform: Platform::Spotify,
            id: self.id,
            title: self.name,
            artistes: self.artists.into_iter().map(|a| a.name).collect(),
            duration_ms: self.duration_ms,
            explicit: self.explicit,
            cover,
            preview: self.preview_url.unwrap_or_default(),
            release_date,
            album: album_title,
            url,
        }
    }
}

impl SpotifyPlaylist {
    fn into_provider_playlist(self) -> ProviderPlaylist {
        let url = if self.external_urls.spotify.is_empty() {
            format!("https://open.spotify.com/playlist/{}", self.id)
        } else {
            self.external_urls.spotify.clone()
        };

        ProviderPlaylist {
            platform: Platform::Spotify,
            id: self.id,
            title: self.name,
            description: self.description,
            owner: self.owner.map(|o| o.display_name).unwrap_or_default(),
            cover: self.images.first().map(|i| i.url.clone()).unwrap_or_default(),
            url,
            track_count: self.tracks.total,
            tracks: self
                .tracks
                .items
                .into_iter()
                .filter_map(|item| item.track)
                .map(SpotifyTrack::into_provider_track)
                .collect(),
        }
    }
}
