// # Memory Repositories
//
// In-memory implementations of CredentialRepository and PlaylistRepository.
//
// ## Purpose
//
// Simple, fast stores that don't persist across restarts. Used by the
// contract tests and by embedders that bring their own persistence.
//
// ## Crash Behavior
//
// - All state is lost on restart/crash
// - First run after a crash has no watermark and falls back to the trailing
//   window, so nothing older than the window is republished

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{CredentialUpsert, MonitoredPlaylist, StoredCredential, TargetPlaylist};
use crate::traits::{CredentialRepository, PlaylistRepository};

/// In-memory credential repository
///
/// Rows are keyed by provider user identity. Internal identifiers are
/// assigned from a counter on first insert.
///
/// # Example
///
/// ```rust,no_run
/// use newadds_core::state::MemoryCredentialRepository;
/// use newadds_core::traits::CredentialRepository;
/// use newadds_core::model::CredentialUpsert;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let repo = MemoryCredentialRepository::new();
///
///     repo.upsert_credential(&CredentialUpsert {
///         provider_user_id: "alice".to_string(),
///         email: "alice@example.com".to_string(),
///         encrypted_refresh_token: "blob".to_string(),
///         access_token: None,
///         access_token_expiry: None,
///     })
///     .await?;
///
///     assert!(repo.find_credential("alice").await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCredentialRepository {
    inner: Arc<RwLock<HashMap<String, StoredCredential>>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryCredentialRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Get the number of stored credentials
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the repository is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl Default for MemoryCredentialRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn upsert_credential(
        &self,
        credential: &CredentialUpsert,
    ) -> Result<StoredCredential, Error> {
        let mut guard = self.inner.write().await;

        let internal_id = match guard.get(&credential.provider_user_id) {
            Some(existing) => existing.internal_id,
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };

        let row = StoredCredential {
            provider_user_id: credential.provider_user_id.clone(),
            internal_id,
            email: credential.email.clone(),
            encrypted_refresh_token: credential.encrypted_refresh_token.clone(),
            last_known_access_token: credential.access_token.clone(),
            access_token_expiry: credential.access_token_expiry,
        };
        guard.insert(credential.provider_user_id.clone(), row.clone());
        Ok(row)
    }

    async fn find_credential(
        &self,
        provider_user_id: &str,
    ) -> Result<Option<StoredCredential>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(provider_user_id).cloned())
    }

    async fn update_expiry(
        &self,
        provider_user_id: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        if let Some(row) = guard.get_mut(provider_user_id) {
            row.access_token_expiry = Some(expiry);
        }
        Ok(())
    }
}

/// In-memory playlist repository
///
/// Monitored playlists are kept in insertion order, which is the order
/// `list_active_monitored` returns them in. One target playlist per user.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlaylistRepository {
    monitored: Arc<RwLock<Vec<MonitoredPlaylist>>>,
    targets: Arc<RwLock<HashMap<String, TargetPlaylist>>>,
}

impl MemoryPlaylistRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Current target mapping for a user, for inspection in tests
    pub async fn target(&self, provider_user_id: &str) -> Option<TargetPlaylist> {
        self.targets.read().await.get(provider_user_id).cloned()
    }

    /// All monitored playlists regardless of activation
    pub async fn all_monitored(&self) -> Vec<MonitoredPlaylist> {
        self.monitored.read().await.clone()
    }
}

#[async_trait]
impl PlaylistRepository for MemoryPlaylistRepository {
    async fn list_active_monitored(&self) -> Result<Vec<MonitoredPlaylist>, Error> {
        let guard = self.monitored.read().await;
        Ok(guard.iter().filter(|p| p.is_active).cloned().collect())
    }

    async fn upsert_monitored(&self, playlist: &MonitoredPlaylist) -> Result<(), Error> {
        let mut guard = self.monitored.write().await;
        let existing = guard.iter_mut().find(|p| {
            p.provider_user_id == playlist.provider_user_id
                && p.provider_playlist_id == playlist.provider_playlist_id
        });

        match existing {
            Some(row) => {
                row.display_name = playlist.display_name.clone();
                row.is_active = true;
            }
            None => guard.push(MonitoredPlaylist {
                is_active: true,
                ..playlist.clone()
            }),
        }
        Ok(())
    }

    async fn set_monitored_active(
        &self,
        provider_user_id: &str,
        provider_playlist_id: &str,
        is_active: bool,
    ) -> Result<bool, Error> {
        let mut guard = self.monitored.write().await;
        match guard.iter_mut().find(|p| {
            p.provider_user_id == provider_user_id && p.provider_playlist_id == provider_playlist_id
        }) {
            Some(row) => {
                row.is_active = is_active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_target(&self, provider_user_id: &str) -> Result<Option<TargetPlaylist>, Error> {
        Ok(self.target(provider_user_id).await)
    }

    async fn insert_target(&self, target: &TargetPlaylist) -> Result<(), Error> {
        let mut guard = self.targets.write().await;
        guard.insert(target.provider_user_id.clone(), target.clone());
        Ok(())
    }

    async fn advance_watermark(
        &self,
        provider_user_id: &str,
        provider_playlist_id: &str,
        watermark: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut guard = self.targets.write().await;
        let Some(target) = guard
            .get_mut(provider_user_id)
            .filter(|t| t.provider_playlist_id == provider_playlist_id)
        else {
            return Ok(false);
        };

        match target.last_successful_run {
            Some(current) if current >= watermark => Ok(false),
            _ => {
                target.last_successful_run = Some(watermark);
                Ok(true)
            }
        }
    }
}
