//! Candidate scoring and aggregation: decides which per-platform hits are
//! the same song and merges them into one normalized track.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::normalize::TrackQuery;
use crate::provider::{strip_feat_suffix, Platform, ProviderTrack};

/// Similarity weights. Title carries the most signal; duration is a hard
/// gate on top of its weighted contribution.
const TITLE_WEIGHT: f64 = 0.5;
const ARTIST_WEIGHT: f64 = 0.3;
const DURATION_WEIGHT: f64 = 0.2;

/// Contribution used when one side lacks the information to compare.
const NEUTRAL: f64 = 0.5;

/// The platform-agnostic representation of a song: one entry per resolved
/// identity, carrying every matched platform's URL and native ID. Frozen
/// before caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTrack {
    pub title: String,
    pub artistes: Vec<String>,
    /// Milliseconds, taken from the originating platform
    pub duration_ms: u64,
    pub explicit: bool,
    pub cover: String,
    pub preview: String,
    pub release_date: String,
    pub album: String,
    /// Platform the reference metadata came from
    pub source: Platform,
    pub ids: BTreeMap<Platform, String>,
    pub links: BTreeMap<Platform, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum similarity score for a candidate to be merged
    pub similarity_threshold: f64,
    /// Maximum duration delta still treated as the same recording
    /// (inclusive: a delta of exactly this many ms matches)
    pub duration_tolerance_ms: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            duration_tolerance_ms: 2000,
        }
    }
}

pub struct Matcher {
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Merge per-provider candidate batches into normalized tracks.
    ///
    /// The reference identity is the source platform's own hit when the
    /// query carried a native ID, otherwise the candidate that best matches
    /// the free-text guess. Candidates scoring at or above the threshold
    /// against the reference contribute their platform URL; everything else
    /// is discarded. Two same-platform candidates above threshold tie-break
    /// on the higher score.
    pub fn aggregate(
        &self,
        query: &TrackQuery,
        batches: Vec<Vec<ProviderTrack>>,
    ) -> Vec<NormalizedTrack> {
        let candidates: Vec<ProviderTrack> = batches.into_iter().flatten().collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let Some(reference) = self.pick_reference(query, &candidates) else {
            return Vec::new();
        };

        let mut chosen: BTreeMap<Platform, (ProviderTrack, f64)> = BTreeMap::new();
        for candidate in candidates {
            let score = if candidate.platform == reference.platform
                && candidate.id == reference.id
            {
                1.0
            } else {
                self.similarity(&candidate, &reference)
            };
            if score < self.config.similarity_threshold {
                continue;
            }

            match chosen.get(&candidate.platform) {
                Some((_, best)) if *best >= score => {}
                _ => {
                    chosen.insert(candidate.platform, (candidate, score));
                }
            }
        }

        vec![merge(reference, chosen)]
    }

    /// Score a candidate against the reference hit.
    ///
    /// Known durations further apart than the tolerance reject the candidate
    /// outright, whatever the text similarity says: beyond ±2s it is a
    /// different recording (radio edit, extended mix).
    pub fn similarity(&self, candidate: &ProviderTrack, reference: &ProviderTrack) -> f64 {
        let duration = match (candidate.duration_ms, reference.duration_ms) {
            (0, _) | (_, 0) => NEUTRAL,
            (a, b) if a.abs_diff(b) <= self.config.duration_tolerance_ms => 1.0,
            _ => return 0.0,
        };

        let title = strsim::normalized_levenshtein(
            &normalize_title(&candidate.title),
            &normalize_title(&reference.title),
        );
        let artists = artist_overlap(&candidate.artistes, &reference.artistes);

        TITLE_WEIGHT * title + ARTIST_WEIGHT * artists + DURATION_WEIGHT * duration
    }

    /// Score a candidate against a free-text guess (no duration available).
    fn score_against_guess(&self, candidate: &ProviderTrack, query: &TrackQuery) -> f64 {
        let title = strsim::normalized_levenshtein(
            &normalize_title(&candidate.title),
            &normalize_title(&query.title_guess),
        );

        let artists = match &query.artist_guess {
            Some(guess) => {
                let guess = normalize_name(guess);
                candidate
                    .artistes
                    .iter()
                    .map(|a| strsim::normalized_levenshtein(&normalize_name(a), &guess))
                    .fold(0.0, f64::max)
            }
            None => NEUTRAL,
        };

        TITLE_WEIGHT * title + ARTIST_WEIGHT * artists + DURATION_WEIGHT * NEUTRAL
    }

    fn pick_reference(
        &self,
        query: &TrackQuery,
        candidates: &[ProviderTrack],
    ) -> Option<ProviderTrack> {
        if let (Some(source), Some(id)) = (query.source, &query.native_id) {
            if let Some(hit) = candidates
                .iter()
                .find(|c| c.platform == source && &c.id == id)
            {
                return Some(hit.clone());
            }
            // Source batch may hold search hits rather than a direct lookup
            if let Some(hit) = candidates.iter().find(|c| c.platform == source) {
                return Some(hit.clone());
            }
        }

        candidates
            .iter()
            .map(|c| (c, self.score_against_guess(c, query)))
            .filter(|(_, score)| *score >= self.config.similarity_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, _)| c.clone())
    }
}

fn merge(
    reference: ProviderTrack,
    chosen: BTreeMap<Platform, (ProviderTrack, f64)>,
) -> NormalizedTrack {
    let mut track = NormalizedTrack {
        title: reference.title.clone(),
        artistes: reference.artistes.clone(),
        duration_ms: reference.duration_ms,
        explicit: reference.explicit,
        cover: reference.cover.clone(),
        preview: reference.preview.clone(),
        release_date: reference.release_date.clone(),
        album: reference.album.clone(),
        source: reference.platform,
        ids: BTreeMap::new(),
        links: BTreeMap::new(),
    };

    for (platform, (candidate, _)) in chosen {
        // Backfill fields the originating platform left empty (Deezer search
        // hits carry no release date, Spotify always does)
        if track.release_date.is_empty() && !candidate.release_date.is_empty() {
            track.release_date = candidate.release_date.clone();
        }
        if track.cover.is_empty() && !candidate.cover.is_empty() {
            track.cover = candidate.cover.clone();
        }
        track.ids.insert(platform, candidate.id);
        track.links.insert(platform, candidate.url);
    }

    track
}

/// Lowercase, strip feature credits and punctuation, collapse whitespace.
pub(crate) fn normalize_title(title: &str) -> String {
    let stripped = strip_feat_suffix(title).to_lowercase();
    stripped
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Jaccard overlap of normalized artist names; neutral when either side is
/// unknown.
fn artist_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return NEUTRAL;
    }
    let set_a: HashSet<String> = a.iter().map(|n| normalize_name(n)).collect();
    let set_b: HashSet<String> = b.iter().map(|n| normalize_name(n)).collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::TrackQuery;

    fn track(platform: Platform, id: &str, title: &str, artist: &str, duration_ms: u64) -> ProviderTrack {
        ProviderTrack {
            platform,
            id: id.to_string(),
            title: title.to_string(),
            artistes: vec![artist.to_string()],
            duration_ms,
            explicit: false,
            cover: String::new(),
            preview: String::new(),
            release_date: String::new(),
            album: String::new(),
            url: format!("https://{}/{}", platform, id),
        }
    }

    fn matcher() -> Matcher {
        Matcher::new(MatcherConfig::default())
    }

    #[test]
    fn test_merges_equivalent_hits_into_one_track() {
        let query = TrackQuery::parse("https://www.deezer.com/track/1109731").unwrap();
        let deezer = track(Platform::Deezer, "1109731", "Blinding Lights", "The Weeknd", 200_000);
        let spotify = track(
            Platform::Spotify,
            "0VjIjW4GlUZAMYd2vXMi3b",
            "Blinding Lights",
            "The Weeknd",
            200_040,
        );

        let merged = matcher().aggregate(&query, vec![vec![deezer], vec![spotify]]);

        assert_eq!(merged.len(), 1);
        let result = &merged[0];
        assert_eq!(result.source, Platform::Deezer);
        // Duration comes from the originating platform
        assert_eq!(result.duration_ms, 200_000);
        assert_eq!(result.links.len(), 2);
        assert!(result.links.contains_key(&Platform::Deezer));
        assert!(result.links.contains_key(&Platform::Spotify));
        assert_eq!(
            result.ids.get(&Platform::Spotify).map(String::as_str),
            Some("0VjIjW4GlUZAMYd2vXMi3b")
        );
    }

    #[test]
    fn test_below_threshold_candidate_is_discarded() {
        let query = TrackQuery::parse("https://www.deezer.com/track/1").unwrap();
        let deezer = track(Platform::Deezer, "1", "Blinding Lights", "The Weeknd", 200_000);
        let unrelated = track(Platform::Spotify, "x", "Something Else Entirely", "Nobody", 200_000);

        let merged = matcher().aggregate(&query, vec![vec![deezer], vec![unrelated]]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].links.len(), 1);
        assert!(!merged[0].links.contains_key(&Platform::Spotify));
    }

    #[test]
    fn test_duration_delta_boundary_is_inclusive() {
        let m = matcher();
        let reference = track(Platform::Deezer, "1", "Song", "Artist", 200_000);

        let at_tolerance = track(Platform::Spotify, "a", "Song", "Artist", 202_000);
        assert!(m.similarity(&at_tolerance, &reference) >= 0.7);

        let past_tolerance = track(Platform::Spotify, "b", "Song", "Artist", 202_001);
        assert_eq!(m.similarity(&past_tolerance, &reference), 0.0);
    }

    #[test]
    fn test_same_platform_tie_break_keeps_higher_score() {
        let query = TrackQuery::parse("https://www.deezer.com/track/1").unwrap();
        let deezer = track(Platform::Deezer, "1", "One More Time", "Daft Punk", 320_000);
        // Both above threshold; the exact-title hit must win
        let close = track(Platform::Spotify, "close", "One More Time - Live", "Daft Punk", 320_500);
        let exact = track(Platform::Spotify, "exact", "One More Time", "Daft Punk", 320_100);

        let merged = matcher().aggregate(&query, vec![vec![deezer], vec![close, exact]]);

        assert_eq!(
            merged[0].ids.get(&Platform::Spotify).map(String::as_str),
            Some("exact")
        );
    }

    #[test]
    fn test_free_text_query_picks_best_reference() {
        let query = TrackQuery::parse("The Weeknd - Blinding Lights").unwrap();
        let spotify = track(Platform::Spotify, "s", "Blinding Lights", "The Weeknd", 200_040);
        let noise = track(Platform::Deezer, "d", "Blinding Lights (Cover)", "Karaoke Band", 195_000);

        let merged = matcher().aggregate(&query, vec![vec![noise], vec![spotify]]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, Platform::Spotify);
    }

    #[test]
    fn test_no_usable_candidates_yields_empty() {
        let query = TrackQuery::parse("obscure noise nobody indexed").unwrap();
        let merged = matcher().aggregate(&query, vec![vec![], vec![]]);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_release_date_backfilled_from_other_platform() {
        let query = TrackQuery::parse("https://www.deezer.com/track/1").unwrap();
        let deezer = track(Platform::Deezer, "1", "Song", "Artist", 180_000);
        let mut spotify = track(Platform::Spotify, "s", "Song", "Artist", 180_000);
        spotify.release_date = "2020-03-20".to_string();

        let merged = matcher().aggregate(&query, vec![vec![deezer], vec![spotify]]);
        assert_eq!(merged[0].release_date, "2020-03-20");
    }

    #[test]
    fn test_title_normalization() {
        assert_eq!(
            normalize_title("Blinding Lights (feat. Someone)"),
            "blinding lights"
        );
        assert_eq!(normalize_title("  One   More Time!! "), "one more time");
    }
}
