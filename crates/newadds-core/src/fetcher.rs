//! Paginated playlist reads
//!
//! [`PlaylistFetcher::fetch_all_tracks`] follows the provider's `next`
//! cursor until it runs out and normalizes each entry into a [`Track`].
//! Any page failure turns the whole playlist into "skip this cycle"
//! (`Ok(None)`), which is distinct from an empty playlist (`Ok(Some(vec![]))`).

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::auth::TokenManager;
use crate::config::FetchConfig;
use crate::error::Result;
use crate::model::{PlaylistEntry, Track};
use crate::traits::{MusicProvider, PageError};

/// Reads every entry of a playlist on a user's behalf
pub struct PlaylistFetcher {
    provider: Arc<dyn MusicProvider>,
    tokens: Arc<TokenManager>,
    max_pages: usize,
}

impl PlaylistFetcher {
    /// Create a fetcher
    pub fn new(
        provider: Arc<dyn MusicProvider>,
        tokens: Arc<TokenManager>,
        config: &FetchConfig,
    ) -> Self {
        Self {
            provider,
            tokens,
            max_pages: config.max_pages,
        }
    }

    /// Fetch all tracks of `playlist_id`, in playlist order
    ///
    /// # Returns
    ///
    /// - `Ok(Some(tracks))`: every page was read
    /// - `Ok(None)`: the playlist is missing, forbidden, rate-limited or any
    ///   page failed; skip it this cycle
    /// - `Err(Error::Refresh)`: no access token could be obtained for the user
    #[instrument(skip(self), fields(user_id = %user_id, playlist_id = %playlist_id))]
    pub async fn fetch_all_tracks(
        &self,
        user_id: &str,
        playlist_id: &str,
    ) -> Result<Option<Vec<Track>>> {
        let access_token = self.tokens.get_valid_access_token(user_id).await?;

        let mut tracks = Vec::new();
        let mut cursor: Option<String> = None;
        let mut skipped = 0usize;

        for page_number in 0.. {
            if page_number >= self.max_pages {
                warn!(
                    max_pages = self.max_pages,
                    "Page limit reached, skipping playlist this cycle"
                );
                return Ok(None);
            }

            let page = match self
                .provider
                .fetch_playlist_page(&access_token, playlist_id, cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    self.report_page_error(user_id, &e);
                    return Ok(None);
                }
            };

            for entry in page.entries {
                match normalize_entry(entry) {
                    Some(track) => tracks.push(track),
                    None => skipped += 1,
                }
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if skipped > 0 {
            debug!(skipped, "Skipped entries without a resolvable track");
        }
        debug!(tracks = tracks.len(), "Playlist fetched");
        Ok(Some(tracks))
    }

    fn report_page_error(&self, user_id: &str, error: &PageError) {
        match error {
            PageError::NotFound | PageError::Forbidden => {
                warn!(reason = %error, "Playlist not found or not accessible, skipping");
            }
            PageError::RateLimited { retry_after } => {
                warn!(
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    "Rate limited, skipping playlist until next run"
                );
            }
            PageError::Unauthorized => {
                info!("Access token rejected, evicting cached token");
                self.tokens.clear_cache(user_id);
            }
            PageError::Status(_) | PageError::Transport(_) | PageError::Malformed(_) => {
                warn!(reason = %error, "Failed to fetch playlist page, skipping");
            }
        }
    }
}

/// Turn a raw page entry into a [`Track`]
///
/// Returns `None` for entries with no underlying track or no catalogue
/// identity. An `added_at` that does not parse is kept as `None`; the sync
/// engine decides what to do with it.
pub fn normalize_entry(entry: PlaylistEntry) -> Option<Track> {
    let track = entry.track?;
    let track_id = track.id.filter(|id| !id.is_empty())?;

    let added_at = DateTime::parse_from_rfc3339(&entry.added_at)
        .map(|t| t.with_timezone(&Utc))
        .ok();

    Some(Track {
        track_id,
        name: track.name,
        artist_names: track.artists,
        added_at,
        added_at_raw: entry.added_at,
    })
}
