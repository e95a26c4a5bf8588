//! Playlist conversion: fetch a playlist from its source platform and find
//! each track's counterpart on the other platforms.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{request_ok, track_payloads, ApiError, TrackPayload};
use crate::matcher::NormalizedTrack;
use crate::normalize::{QueryKind, TrackQuery};
use crate::provider::Platform;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PlaylistParams {
    /// Platform playlist URL
    #[serde(default)]
    pub link: String,
}

/// GET /api/v1/playlist?link=<url>
///
/// Returns the playlist metadata plus one track array per platform: the
/// source platform's own tracklist and, for every other platform, the
/// counterparts that matched. Tracks without a counterpart are simply absent
/// from the other platforms' arrays.
pub async fn convert_playlist(
    State(state): State<AppState>,
    Query(params): Query<PlaylistParams>,
) -> Result<Json<Value>, ApiError> {
    let query = TrackQuery::parse(&params.link)?;
    if query.kind != QueryKind::Playlist {
        return Err(ApiError::BadRequest(
            "not a playlist link; use /api/v1/search for tracks".to_string(),
        ));
    }

    let resolved = state.resolver.clone().resolve_playlist(&query).await?;
    let source = resolved.playlist.platform;

    let mut platforms: BTreeMap<Platform, Vec<TrackPayload>> = BTreeMap::new();
    for platform in state.resolver.platforms() {
        platforms.insert(platform, Vec::new());
    }

    for (index, track) in resolved.playlist.tracks.iter().enumerate() {
        let matches = resolved.matches.get(index).map(Vec::as_slice).unwrap_or(&[]);
        for payload in track_payloads(matches) {
            if let Some(bucket) = platforms.get_mut(&payload.platform) {
                bucket.push(payload);
            }
        }

        // The source tracklist is authoritative: if matching put nothing in
        // the source bucket for this track, fall back to the raw entry
        let covered = matches.iter().any(|m| m.links.contains_key(&source));
        if !covered {
            if let Some(bucket) = platforms.get_mut(&source) {
                bucket.push(source_payload(track));
            }
        }
    }

    tracing::info!(
        "converted playlist {:?}: {} tracks across {} platforms",
        resolved.playlist.title,
        resolved.playlist.tracks.len(),
        platforms.len()
    );

    Ok(request_ok(json!({
        "playlist": {
            "title": resolved.playlist.title,
            "description": resolved.playlist.description,
            "owner": resolved.playlist.owner,
            "cover": resolved.playlist.cover,
            "url": resolved.playlist.url,
            "platform": resolved.playlist.platform,
            "tracks_number": resolved.playlist.track_count,
        },
        "platforms": platforms,
    })))
}

/// Payload for a source-platform track that matched nowhere else.
fn source_payload(track: &crate::provider::ProviderTrack) -> TrackPayload {
    let single = NormalizedTrack {
        title: track.title.clone(),
        artistes: track.artistes.clone(),
        duration_ms: track.duration_ms,
        explicit: track.explicit,
        cover: track.cover.clone(),
        preview: track.preview.clone(),
        release_date: track.release_date.clone(),
        album: track.album.clone(),
        source: track.platform,
        ids: BTreeMap::from([(track.platform, track.id.clone())]),
        links: BTreeMap::from([(track.platform, track.url.clone())]),
    };
    track_payloads(&[single]).remove(0)
}
