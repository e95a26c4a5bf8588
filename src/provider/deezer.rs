//! Deezer adapter: unauthenticated REST lookups and searches against the
//! public Deezer API.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::{strip_feat_suffix, Platform, Provider, ProviderPlaylist, ProviderTrack, RetryConfig};
use crate::config::DeezerConfig;
use crate::error::ResolveError;
use crate::normalize::TrackQuery;

// Deezer in-body error codes (the API answers 200 with an error object)
const CODE_QUOTA_EXCEEDED: i64 = 4;
const CODE_NO_DATA: i64 = 800;

pub struct DeezerClient {
    http: reqwest::Client,
    api_base: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl DeezerClient {
    pub fn new(config: &DeezerConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            timeout,
            retry: config.retry.clone(),
        })
    }

    /// GET a Deezer endpoint and deserialize the response.
    ///
    /// Deezer signals quota exhaustion and missing resources inside a 200
    /// body, so errors are sniffed from the payload before deserializing.
    /// Quota responses are retried with exponential backoff.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ResolveError> {
        let mut attempt = 1;
        loop {
            match self.get_json_once(url).await {
                Err(FetchError::RateLimited) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!("deezer rate limited, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(FetchError::RateLimited) => {
                    return Err(ResolveError::unavailable(
                        Platform::Deezer,
                        "rate limited after retries",
                    ));
                }
                Err(FetchError::NotFound) => return Err(ResolveError::NotFound(Platform::Deezer)),
                Err(FetchError::Upstream(reason)) => {
                    return Err(ResolveError::unavailable(Platform::Deezer, reason));
                }
                Ok(value) => {
                    return serde_json::from_value(value).map_err(|e| {
                        ResolveError::unavailable(
                            Platform::Deezer,
                            format!("unexpected response shape: {}", e),
                        )
                    });
                }
            }
        }
    }

    async fn get_json_once(&self, url: &str) -> Result<Value, FetchError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Upstream(e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        if response.status().is_server_error() {
            return Err(FetchError::Upstream(format!(
                "deezer returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Upstream(e.to_string()))?;

        if let Some(error) = body.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            return match code {
                CODE_QUOTA_EXCEEDED => Err(FetchError::RateLimited),
                CODE_NO_DATA => Err(FetchError::NotFound),
                _ => Err(FetchError::Upstream(format!("deezer error code {}", code))),
            };
        }

        Ok(body)
    }

    async fn lookup_track(&self, id: &str) -> Result<Vec<ProviderTrack>, ResolveError> {
        let url = format!("{}/track/{}", self.api_base, id);
        let track: DeezerTrack = self.get_json(&url).await?;
        Ok(vec![track.into_provider_track()])
    }

    async fn search_track(
        &self,
        title: &str,
        artist: Option<&str>,
    ) -> Result<Vec<ProviderTrack>, ResolveError> {
        let title = strip_feat_suffix(title);
        let payload = match artist {
            Some(artist) => format!("track:\"{}\" artist:\"{}\"", title, artist),
            None => title.to_string(),
        };
        let url = format!(
            "{}/search?q={}",
            self.api_base,
            urlencoding::encode(&payload)
        );

        let results: DeezerSearchResponse = self.get_json(&url).await?;
        Ok(results
            .data
            .into_iter()
            .take(5)
            .map(DeezerTrack::into_provider_track)
            .collect())
    }
}

#[async_trait]
impl Provider for DeezerClient {
    fn platform(&self) -> Platform {
        Platform::Deezer
    }

    fn call_timeout(&self) -> Duration {
        self.timeout
    }

    async fn resolve(&self, query: &TrackQuery) -> Result<Vec<ProviderTrack>, ResolveError> {
        match (&query.source, &query.native_id) {
            (Some(Platform::Deezer), Some(id)) => self.lookup_track(id).await,
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
        let url = format!("{}/playlist/{}", self.api_base, id);
        let playlist: DeezerPlaylist = self.get_json(&url).await?;
        Ok(playlist.into_provider_playlist())
    }
}

enum FetchError {
    RateLimited,
    NotFound,
    Upstream(String),
}

// API response models

#[derive(Debug, Deserialize)]
struct DeezerSearchResponse {
    #[serde(default)]
    data: Vec<DeezerTrack>,
}

#[derive(Debug, Deserialize)]
struct DeezerTrack {
    id: u64,
    title: String,
    #[serde(default)]
    link: String,
    /// Seconds, unlike the wire contract which is milliseconds
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    explicit_lyrics: bool,
    #[serde(default)]
    preview: String,
    #[serde(default)]
    release_date: String,
    artist: Option<DeezerArtist>,
    #[serde(default)]
    contributors: Vec<DeezerArtist>,
    album: Option<DeezerAlbum>,
}

#[derive(Debug, Deserialize)]
struct DeezerArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DeezerAlbum {
    #[serde(default)]
    title: String,
    #[serde(default)]
    cover: String,
    cover_medium: Option<String>,
    #[serde(default)]
    release_date: String,
}

#[derive(Debug, Deserialize)]
struct DeezerPlaylist {
    id: u64,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    picture: String,
    picture_medium: Option<String>,
    #[serde(default)]
    nb_tracks: usize,
    creator: Option<DeezerArtist>,
    tracks: Option<DeezerSearchResponse>,
}

impl DeezerTrack {
    fn into_provider_track(self) -> ProviderTrack {
        let mut artistes: Vec<String> =
            self.contributors.into_iter().map(|c| c.name).collect();
        if artistes.is_empty() {
            if let Some(artist) = self.artist {
                artistes.push(artist.name);
            }
        }

        let link = if self.link.is_empty() {
            format!("https://www.deezer.com/track/{}", self.id)
        } else {
            self.link
        };

        let (album_title, cover, album_release) = match self.album {
            Some(album) => {
                let cover = album.cover_medium.unwrap_or(album.cover);
                (album.title, cover, album.release_date)
            }
            None => (String::new(), String::new(), String::new()),
        };
        let release_date = if self.release_date.is_empty() {
            album_release
        } else {
            self.release_date
        };

        ProviderTrack {
            platform: Platform::Deezer,
            id: self.id.to_string(),
            title: self.title,
            artistes,
            duration_ms: self.duration * 1000,
            explicit: self.explicit_lyrics,
            cover,
            preview: self.preview,
            release_date,
            album: album_title,
            url: link,
        }
    }
}

impl DeezerPlaylist {
    fn into_provider_playlist(self) -> ProviderPlaylist {
        let url = if self.link.is_empty() {
            format!("https://www.deezer.com/playlist/{}", self.id)
        } else {
            self.link
        };

        ProviderPlaylist {
            platform: Platform::Deezer,
            id: self.id.to_string(),
            title: self.title,
            description: self.description,
            owner: self.creator.map(|c| c.name).unwrap_or_default(),
            cover: self.picture_medium.unwrap_or(self.picture),
            url,
            track_count: self.nb_tracks,
            tracks: self
                .tracks
                .map(|t| {
                    t.data
                        .into_iter()
                        .map(DeezerTrack::into_provider_track)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}
