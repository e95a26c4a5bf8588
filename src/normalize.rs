//! Request normalization: turns an arbitrary input string (platform URL or
//! free text) into a structured query the resolver can act on.

use crate::error::ResolveError;
use crate::provider::Platform;

/// What kind of resource a query points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Track,
    Playlist,
}

/// A parsed incoming query. Immutable once constructed; the resolver derives
/// enriched search copies via [`TrackQuery::with_search_guess`].
#[derive(Debug, Clone)]
pub struct TrackQuery {
    /// The input exactly as received
    pub raw: String,
    pub kind: QueryKind,
    /// Source platform, when the input was a recognized platform URL
    pub source: Option<Platform>,
    /// Platform-native ID extracted from the URL
    pub native_id: Option<String>,
    /// Title guess used for text search on platforms without a native ID
    pub title_guess: String,
    /// Artist guess, when one could be split out of the input
    pub artist_guess: Option<String>,
}

impl TrackQuery {
    /// Parse an input string. URLs of supported platforms yield a source
    /// platform + native ID; anything else is treated as free text, split
    /// on `" - "` into artist and title when that separator is present.
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ResolveError::InvalidInput("empty query".to_string()));
        }

        if let Some((platform, kind, id)) = parse_platform_url(trimmed) {
            return Ok(Self {
                raw: raw.to_string(),
                kind,
                source: Some(platform),
                native_id: Some(id),
                title_guess: String::new(),
                artist_guess: None,
            });
        }

        // Free text. "Artist - Title" is the common paste format.
        let (artist_guess, title_guess) = match trimmed.split_once(" - ") {
            Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => {
                (Some(artist.trim().to_string()), title.trim().to_string())
            }
            _ => (None, trimmed.to_string()),
        };

        Ok(Self {
            raw: raw.to_string(),
            kind: QueryKind::Track,
            source: None,
            native_id: None,
            title_guess,
            artist_guess,
        })
    }

    /// Build a free-text query directly from known metadata, used when
    /// fanning out the tracks of a playlist.
    pub fn from_metadata(title: &str, artist: Option<&str>) -> Self {
        Self {
            raw: title.to_string(),
            kind: QueryKind::Track,
            source: None,
            native_id: None,
            title_guess: title.to_string(),
            artist_guess: artist.map(str::to_string),
        }
    }

    /// Copy of this query carrying a concrete title/artist guess, used to
    /// search the platforms that did not originate it.
    pub fn with_search_guess(&self, title: &str, artist: Option<&str>) -> Self {
        Self {
            raw: self.raw.clone(),
            kind: self.kind,
            source: self.source,
            native_id: self.native_id.clone(),
            title_guess: title.to_string(),
            artist_guess: artist.map(|a| a.to_string()),
        }
    }
}

/// Recognize supported platform URL shapes and extract the native ID.
///
/// Handles locale path segments (`deezer.com/en/track/123`) and trailing
/// query strings / fragments, which the share links of both platforms carry.
fn parse_platform_url(input: &str) -> Option<(Platform, QueryKind, String)> {
    let platform = if input.contains("deezer.com/") {
        Platform::Deezer
    } else if input.contains("open.spotify.com/") {
        Platform::Spotify
    } else {
        return None;
    };

    let path = input
        .split(['?', '#'])
        .next()
        .unwrap_or(input);

    for (marker, kind) in [("/track/", QueryKind::Track), ("/playlist/", QueryKind::Playlist)] {
        if let Some(position) = path.find(marker) {
            let id: String = path[position + marker.len()..]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            if !id.is_empty() {
                return Some((platform, kind, id));
            }
        }
    }

    None
}
