//! Delta selection and cross-playlist merge
//!
//! Pure functions over already-fetched tracks; no I/O.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::model::{Provenance, Track};

/// Trailing window used when a user has no watermark yet
pub const WINDOW_DAYS: i64 = 7;

/// Result of applying the watermark rule to one playlist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaSelection {
    /// Tracks added after the watermark (or inside the first-run window)
    pub included: Vec<Track>,
    /// Tracks excluded because their `added_at` did not parse
    pub dropped: Vec<Track>,
}

/// Select the tracks a run should publish
///
/// - No watermark: `added_at >= started_at - WINDOW_DAYS`
/// - Watermark `w`: `added_at > w`
///
/// A track without a parsed `added_at` is never included.
pub fn select_delta(
    tracks: Vec<Track>,
    watermark: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
) -> DeltaSelection {
    let window_start = started_at - Duration::days(WINDOW_DAYS);
    let mut selection = DeltaSelection::default();

    for track in tracks {
        let Some(added_at) = track.added_at else {
            selection.dropped.push(track);
            continue;
        };

        let include = match watermark {
            Some(w) => added_at > w,
            None => added_at >= window_start,
        };
        if include {
            selection.included.push(track);
        }
    }

    selection
}

/// A track that was seen again after its first occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub track_id: String,
    pub kept_from: Provenance,
    pub dropped_from: Provenance,
}

/// A user's deduplicated delta
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Merged {
    /// First occurrence of each track id, in first-seen order
    pub tracks: Vec<Track>,
    pub duplicates: Vec<Duplicate>,
}

/// Merge per-playlist selections, keeping the first occurrence of each track id
///
/// Input order is significant: playlists in load order, tracks in playlist order.
pub fn merge_tracks(collected: Vec<(Provenance, Vec<Track>)>) -> Merged {
    let mut seen: HashMap<String, Provenance> = HashMap::new();
    let mut merged = Merged::default();

    for (provenance, tracks) in collected {
        for track in tracks {
            if let Some(kept_from) = seen.get(&track.track_id) {
                merged.duplicates.push(Duplicate {
                    track_id: track.track_id,
                    kept_from: kept_from.clone(),
                    dropped_from: provenance.clone(),
                });
                continue;
            }
            seen.insert(track.track_id.clone(), provenance.clone());
            merged.tracks.push(track);
        }
    }

    merged
}
