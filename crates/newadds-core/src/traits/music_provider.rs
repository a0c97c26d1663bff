// # Music Provider Trait
//
// Defines the interface for talking to the streaming service on a user's
// behalf: token endpoint, playlist reads, and the writes used by the
// target-playlist rewrite.
//
// ## Implementations
//
// - Spotify: `newadds-provider-spotify` crate
//
// ## Usage
//
// ```rust,ignore
// use newadds_core::MusicProvider;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let provider = /* MusicProvider implementation */;
//
//     let grant = provider.refresh_access_token(&refresh_token).await?;
//     let page = provider
//         .fetch_playlist_page(&grant.access_token, "37i9dQZF1DX", None)
//         .await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::time::Duration;

use crate::model::{PlaylistInfo, TokenGrant, TrackPage, UserProfile};

/// Why a playlist page could not be read
///
/// Every variant means "skip this playlist this cycle"; the distinction only
/// matters for logging and for evicting a rejected access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// 404
    NotFound,
    /// 403
    Forbidden,
    /// 429, with the provider's Retry-After hint if present
    RateLimited {
        retry_after: Option<Duration>,
    },
    /// 401: the access token was rejected before its stated expiry
    Unauthorized,
    /// Any other non-success status
    Status(u16),
    /// The request never produced a response
    Transport(String),
    /// The response body did not have the expected shape
    Malformed(String),
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageError::NotFound => write!(f, "playlist not found"),
            PageError::Forbidden => write!(f, "playlist not accessible"),
            PageError::RateLimited { retry_after: Some(d) } => {
                write!(f, "rate limited (retry after {}s)", d.as_secs())
            }
            PageError::RateLimited { retry_after: None } => write!(f, "rate limited"),
            PageError::Unauthorized => write!(f, "access token rejected"),
            PageError::Status(code) => write!(f, "unexpected status {}", code),
            PageError::Transport(msg) => write!(f, "request failed: {}", msg),
            PageError::Malformed(msg) => write!(f, "malformed page: {}", msg),
        }
    }
}

/// Trait for streaming-service provider implementations
///
/// Providers are stateless API adapters. Each method performs a single
/// request and reports the outcome; they do not retry, back off, cache
/// tokens, or touch the stores. Scheduling and retry across cycles belong to
/// the external scheduler, token caching belongs to
/// [`TokenManager`](crate::auth::TokenManager).
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
#[async_trait]
pub trait MusicProvider: Send + Sync {
    /// Exchange a refresh token for a new access token
    ///
    /// # Returns
    ///
    /// - `Ok(TokenGrant)`: `refresh_token` is `Some` only if the provider rotated it
    /// - `Err(Error)`: the token was rejected or the call failed
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, crate::Error>;

    /// Exchange an authorization code for the initial token pair
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, crate::Error>;

    /// Fetch the profile of the user owning `access_token`
    async fn current_user_profile(&self, access_token: &str) -> Result<UserProfile, crate::Error>;

    /// Fetch one page of playlist entries
    ///
    /// # Parameters
    ///
    /// - `cursor`: `None` for the first page, otherwise the `next` value of
    ///   the previous page, used verbatim
    async fn fetch_playlist_page(
        &self,
        access_token: &str,
        playlist_id: &str,
        cursor: Option<&str>,
    ) -> Result<TrackPage, PageError>;

    /// Look up a playlist's metadata
    async fn get_playlist(
        &self,
        access_token: &str,
        playlist_id: &str,
    ) -> Result<PlaylistInfo, crate::Error>;

    /// Create a playlist owned by `user_id`
    async fn create_playlist(
        &self,
        access_token: &str,
        user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<PlaylistInfo, crate::Error>;

    /// Remove every entry from a playlist
    async fn clear_playlist(&self, access_token: &str, playlist_id: &str)
    -> Result<(), crate::Error>;

    /// Append tracks to a playlist
    ///
    /// `track_ids` never exceeds [`max_tracks_per_request`](Self::max_tracks_per_request).
    async fn add_tracks(
        &self,
        access_token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), crate::Error>;

    /// Update a playlist's display name and description
    async fn update_details(
        &self,
        access_token: &str,
        playlist_id: &str,
        name: &str,
        description: &str,
    ) -> Result<(), crate::Error>;

    /// Largest number of tracks accepted by one `add_tracks` call
    fn max_tracks_per_request(&self) -> usize {
        100
    }

    /// Whether writes are only logged, not performed
    ///
    /// The sync engine does not advance watermarks for a dry-run provider.
    fn dry_run(&self) -> bool {
        false
    }

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}
