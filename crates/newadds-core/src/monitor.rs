//! Management of users and their monitored playlists
//!
//! These operations back the out-of-band management surface: authorizing a
//! user and choosing which playlists the sync engine watches for them.

use std::sync::Arc;
use tracing::info;

use crate::auth::TokenManager;
use crate::error::{Error, Result};
use crate::model::{MonitoredPlaylist, UserCredential};
use crate::traits::{MusicProvider, PlaylistRepository};

/// Adds, enables and disables monitored playlists
pub struct MonitorService {
    provider: Arc<dyn MusicProvider>,
    tokens: Arc<TokenManager>,
    playlists: Arc<dyn PlaylistRepository>,
}

impl MonitorService {
    pub fn new(
        provider: Arc<dyn MusicProvider>,
        tokens: Arc<TokenManager>,
        playlists: Arc<dyn PlaylistRepository>,
    ) -> Self {
        Self {
            provider,
            tokens,
            playlists,
        }
    }

    /// Complete an authorization-code flow and store the user's credential
    ///
    /// Exchanges `code`, looks up the profile the tokens belong to, then
    /// hands both to [`TokenManager::authorize`].
    pub async fn authorize_user(&self, code: &str) -> Result<UserCredential> {
        let grant = self.provider.exchange_code(code).await?;
        let profile = self
            .provider
            .current_user_profile(&grant.access_token)
            .await?;
        self.tokens.authorize(&grant, &profile).await
    }

    /// Start monitoring a playlist for a user
    ///
    /// The playlist must exist provider-side; its current name is stored as
    /// the display name. Re-adding a deactivated playlist reactivates it.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound`: the user has no stored credential
    /// - `Error::Refresh`: no access token could be obtained
    /// - provider errors when the playlist lookup fails
    pub async fn add_monitored_playlist(
        &self,
        user_id: &str,
        playlist_id: &str,
    ) -> Result<MonitoredPlaylist> {
        if self
            .tokens
            .credentials()
            .find_by_user_id(user_id)
            .await?
            .is_none()
        {
            return Err(Error::not_found(format!(
                "no stored credential for user {}",
                user_id
            )));
        }

        let access_token = self.tokens.get_valid_access_token(user_id).await?;
        let info = self.provider.get_playlist(&access_token, playlist_id).await?;

        let monitored = MonitoredPlaylist {
            provider_user_id: user_id.to_string(),
            provider_playlist_id: info.id,
            display_name: info.name,
            is_active: true,
        };
        self.playlists.upsert_monitored(&monitored).await?;

        info!(
            user_id = %user_id,
            playlist_id = %monitored.provider_playlist_id,
            name = %monitored.display_name,
            "Playlist is now monitored"
        );
        Ok(monitored)
    }

    /// Enable or disable a monitored playlist
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when the user does not monitor this playlist.
    pub async fn set_active(&self, user_id: &str, playlist_id: &str, active: bool) -> Result<()> {
        let updated = self
            .playlists
            .set_monitored_active(user_id, playlist_id, active)
            .await?;
        if !updated {
            return Err(Error::not_found(format!(
                "playlist {} is not monitored for user {}",
                playlist_id, user_id
            )));
        }

        info!(user_id = %user_id, playlist_id = %playlist_id, active, "Monitored playlist updated");
        Ok(())
    }
}
