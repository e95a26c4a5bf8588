//! tracklink — cross-platform music-link resolution service.
//!
//! Given a track URL or free-text query pointing at one streaming platform,
//! resolves the equivalent track on the other supported platforms and returns
//! normalized metadata (title, artists, cover, duration, explicit flag and a
//! canonical URL per platform) over a small HTTP API.

use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod matcher;
pub mod normalize;
pub mod provider;
pub mod resolver;

use cache::TrackCache;
use config::Config;
use matcher::Matcher;
use provider::{DeezerClient, Provider, SpotifyClient};
use resolver::Resolver;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
}

impl AppState {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }

    /// Build the provider set and resolver from configuration. Providers
    /// that cannot initialize (missing Spotify credentials) are skipped with
    /// a warning; at least one provider must come up.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

        match DeezerClient::new(&config.providers.deezer) {
            Ok(client) => providers.push(Arc::new(client)),
            Err(e) => tracing::warn!("deezer adapter disabled: {}", e),
        }
        match SpotifyClient::new(&config.providers.spotify) {
            Ok(client) => providers.push(Arc::new(client)),
            Err(e) => tracing::warn!("spotify adapter disabled: {}", e),
        }

        if providers.is_empty() {
            anyhow::bail!("no provider adapters could be initialized");
        }

        let resolver = Resolver::new(
            providers,
            Matcher::new(config.matcher.clone()),
            TrackCache::new(&config.cache),
            &config.resolver,
        );

        Ok(Self::new(resolver))
    }
}

/// Build the application router: the search and playlist endpoints, the
/// health route, request tracing and a permissive CORS layer (the web client
/// calls this API cross-origin).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/search", get(api::search_track))
        .route("/api/v1/playlist", get(api::convert_playlist))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
