//! Track search: the endpoint the web client drives.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use super::{request_ok, track_payloads, ApiError};
use crate::normalize::{QueryKind, TrackQuery};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Platform track URL or free-text query
    #[serde(default)]
    pub track: String,
}

/// GET /api/v1/search?track=<url-or-query>
///
/// Resolves the given track across all configured platforms. Partial
/// provider outages still return 200 with whatever matched; an empty match
/// set is `{"data": []}`, not an error.
pub async fn search_track(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let query = TrackQuery::parse(&params.track)?;
    if query.kind == QueryKind::Playlist {
        return Err(ApiError::BadRequest(
            "playlist link; use /api/v1/playlist".to_string(),
        ));
    }

    let tracks = state.resolver.resolve(&query).await?;
    tracing::info!(
        "resolved {:?} into {} platform link(s)",
        params.track,
        tracks.first().map(|t| t.links.len()).unwrap_or(0)
    );

    Ok(request_ok(track_payloads(&tracks)))
}
