//! HTTP API handlers and the response envelope shared by all of them.

pub mod health;
pub mod playlist;
pub mod search;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::ResolveError;
use crate::matcher::NormalizedTrack;
use crate::provider::Platform;

pub use health::health_routes;
pub use playlist::convert_playlist;
pub use search::search_track;

/// One element of the `data` array: a resolved track as seen on one
/// platform, plus the full cross-platform link map.
#[derive(Debug, Serialize)]
pub struct TrackPayload {
    pub id: String,
    pub title: String,
    pub artistes: Vec<String>,
    /// Milliseconds
    pub duration: u64,
    pub explicit: bool,
    pub cover: String,
    pub preview: String,
    pub release_date: String,
    pub album: String,
    pub platform: Platform,
    pub url: String,
    pub links: BTreeMap<Platform, String>,
}

/// Expand merged tracks into one payload per matched platform, the shape the
/// client renders (one card per platform icon).
pub(crate) fn track_payloads(tracks: &[NormalizedTrack]) -> Vec<TrackPayload> {
    let mut payloads = Vec::new();
    for track in tracks {
        for (platform, url) in &track.links {
            payloads.push(TrackPayload {
                id: track.ids.get(platform).cloned().unwrap_or_default(),
                title: track.title.clone(),
                artistes: track.artistes.clone(),
                duration: track.duration_ms,
                explicit: track.explicit,
                cover: track.cover.clone(),
                preview: track.preview.clone(),
                release_date: track.release_date.clone(),
                album: track.album.clone(),
                platform: *platform,
                url: url.clone(),
                links: track.links.clone(),
            });
        }
    }
    payloads
}

/// 200 envelope wrapping a payload.
pub(crate) fn request_ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({
        "data": data,
        "message": "Resource found",
        "error": null,
        "status": 200,
    }))
}

/// API-level error: a terminal `ResolveError` mapped onto an HTTP status and
/// the JSON envelope.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    UpstreamFailed(String),
    Internal(String),
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidInput(reason) => ApiError::BadRequest(reason),
            ResolveError::NotFound(platform) => {
                ApiError::NotFound(format!("not found on {}", platform))
            }
            ResolveError::AllProvidersFailed => {
                ApiError::UpstreamFailed("all providers failed or timed out".to_string())
            }
            // Only reaches this level when the whole request depended on the
            // one provider (playlist fetch from its source platform)
            ResolveError::ProviderUnavailable { platform, reason } => {
                ApiError::UpstreamFailed(format!("{} unavailable: {}", platform, reason))
            }
            ResolveError::Cache(reason) => ApiError::Internal(reason),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error) = match self {
            ApiError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "The request you sent is bad",
                reason,
            ),
            ApiError::NotFound(reason) => {
                (StatusCode::NOT_FOUND, "The resource does not exist", reason)
            }
            ApiError::UpstreamFailed(reason) => {
                (StatusCode::BAD_GATEWAY, "Upstream providers failed", reason)
            }
            ApiError::Internal(reason) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
                reason,
            ),
        };

        // Failed searches still carry an empty data array, never a missing
        // field, so clients can always index into `data`
        let body = Json(json!({
            "data": [],
            "message": message,
            "error": error,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
