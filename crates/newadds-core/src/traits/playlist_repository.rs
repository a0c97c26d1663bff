// # Playlist Repository Trait
//
// Defines the persistence interface for monitored playlists and the
// per-user target playlist mapping, including the run watermark.
//
// ## Watermark Rules
//
// The watermark is only written after a target playlist rewrite has fully
// committed provider-side. Implementations must make the write monotonic:
// a value older than (or equal to) the stored one is ignored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{MonitoredPlaylist, TargetPlaylist};

/// Trait for playlist repository implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait PlaylistRepository: Send + Sync {
    /// List every active monitored playlist across all users
    ///
    /// Failure here is the one condition that aborts a sync run.
    async fn list_active_monitored(&self) -> Result<Vec<MonitoredPlaylist>, crate::Error>;

    /// Insert or re-activate a monitored playlist
    ///
    /// Upserted by `(user, playlist)`; the display name is refreshed and the
    /// row is marked active.
    async fn upsert_monitored(&self, playlist: &MonitoredPlaylist) -> Result<(), crate::Error>;

    /// Toggle the activation flag of a monitored playlist
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: the row existed and was updated
    /// - `Ok(false)`: no such monitored playlist
    async fn set_monitored_active(
        &self,
        provider_user_id: &str,
        provider_playlist_id: &str,
        is_active: bool,
    ) -> Result<bool, crate::Error>;

    /// Get the target playlist mapping for a user
    async fn get_target(
        &self,
        provider_user_id: &str,
    ) -> Result<Option<TargetPlaylist>, crate::Error>;

    /// Persist a newly created target playlist mapping
    ///
    /// Upserted by `(user, playlist)`.
    async fn insert_target(&self, target: &TargetPlaylist) -> Result<(), crate::Error>;

    /// Advance the watermark of a user's target playlist
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: the watermark moved forward
    /// - `Ok(false)`: the stored watermark was already at or past `watermark`,
    ///   or the mapping does not exist
    async fn advance_watermark(
        &self,
        provider_user_id: &str,
        provider_playlist_id: &str,
        watermark: DateTime<Utc>,
    ) -> Result<bool, crate::Error>;
}
