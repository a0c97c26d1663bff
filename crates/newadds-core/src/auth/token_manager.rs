//! Per-user access-token cache with single-flight refresh
//!
//! ## State per user
//!
//! ```text
//! Cold ──▶ Refreshing ──▶ Valid ──(expiry - skew)──▶ Expired ──▶ Refreshing
//!              │                                                    │
//!              └──────────────▶ Failed (cache cleared) ◀────────────┘
//! ```
//!
//! Each user owns a [`TokenSlot`]. The map of slots is locked only long
//! enough to look a slot up, so unrelated users never wait on each other.
//! Inside a slot, an async mutex serialises refreshes. A caller that queued
//! behind an in-flight refresh shares that attempt's outcome instead of
//! calling the provider again, even when the granted token already sits
//! inside the refresh skew.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::CredentialStore;
use crate::config::TokenConfig;
use crate::error::{Error, Result};
use crate::model::{TokenGrant, UserCredential, UserProfile};
use crate::traits::MusicProvider;

#[derive(Clone)]
struct CachedAccessToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Default)]
struct RefreshState {
    /// Access token or failure message of the most recent attempt
    last_outcome: Option<std::result::Result<String, String>>,
}

#[derive(Default)]
struct TokenSlot {
    cached: Mutex<Option<CachedAccessToken>>,
    refresh: tokio::sync::Mutex<RefreshState>,
    /// Completed refresh attempts, successful or not
    attempts: AtomicU64,
}

impl TokenSlot {
    fn valid_token(&self, skew: Duration) -> Option<String> {
        let cached = self.cached.lock();
        cached
            .as_ref()
            .filter(|c| Instant::now() + skew < c.expires_at)
            .map(|c| c.access_token.clone())
    }

    fn store(&self, access_token: &str, expires_in: Duration) {
        *self.cached.lock() = Some(CachedAccessToken {
            access_token: access_token.to_string(),
            expires_at: Instant::now() + expires_in,
        });
    }

    fn evict(&self) -> bool {
        self.cached.lock().take().is_some()
    }
}

/// Access-token lifecycle manager
///
/// Owns the in-memory token cache. One instance is shared (via `Arc`) by the
/// fetcher, the sync engine and the monitor service.
pub struct TokenManager {
    provider: Arc<dyn MusicProvider>,
    credentials: CredentialStore,
    refresh_skew: Duration,
    slots: Mutex<HashMap<String, Arc<TokenSlot>>>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("provider", &self.provider.provider_name())
            .field("refresh_skew", &self.refresh_skew)
            .field("cached_users", &self.slots.lock().len())
            .finish()
    }
}

impl TokenManager {
    /// Create a token manager
    ///
    /// # Parameters
    ///
    /// - `provider`: token endpoint used for refreshes
    /// - `credentials`: where refresh tokens are read from and rotated into
    /// - `config`: cache settings (refresh skew)
    pub fn new(
        provider: Arc<dyn MusicProvider>,
        credentials: CredentialStore,
        config: &TokenConfig,
    ) -> Self {
        Self {
            provider,
            credentials,
            refresh_skew: config.refresh_skew(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The credential store refresh tokens are read from
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Get an access token for `user_id`, refreshing if needed
    ///
    /// Concurrent calls for the same user while a refresh is in flight wait
    /// for it and share its outcome; at most one provider call is made.
    ///
    /// # Errors
    ///
    /// `Error::Refresh` when there is no stored credential, the stored
    /// refresh token cannot be decrypted, or the provider rejected the
    /// refresh. The cache entry is cleared in every failure case.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_valid_access_token(&self, user_id: &str) -> Result<String> {
        let slot = self.slot(user_id);

        if let Some(token) = slot.valid_token(self.refresh_skew) {
            return Ok(token);
        }

        let observed = slot.attempts.load(Ordering::Acquire);
        let mut state = slot.refresh.lock().await;

        // Someone else may have refreshed while we waited for the lock
        if let Some(token) = slot.valid_token(self.refresh_skew) {
            debug!("Token refreshed by a concurrent caller");
            return Ok(token);
        }
        if slot.attempts.load(Ordering::Acquire) != observed
            && let Some(outcome) = &state.last_outcome
        {
            debug!("Sharing outcome of concurrent refresh");
            return outcome
                .clone()
                .map_err(|message| Error::refresh(user_id, message));
        }

        let outcome = self.refresh(user_id).await;
        state.last_outcome = Some(match &outcome {
            Ok(grant) => {
                slot.store(&grant.access_token, grant.expires_in);
                Ok(grant.access_token.clone())
            }
            Err(e) => {
                slot.evict();
                Err(match e {
                    Error::Refresh { message, .. } => message.clone(),
                    other => other.to_string(),
                })
            }
        });
        slot.attempts.fetch_add(1, Ordering::Release);

        outcome.map(|grant| grant.access_token)
    }

    /// Force-evict a user's cached access token regardless of expiry
    pub fn clear_cache(&self, user_id: &str) {
        let slot = self.slots.lock().get(user_id).cloned();
        if slot.is_some_and(|s| s.evict()) {
            debug!(user_id = %user_id, "Cached access token evicted");
        }
    }

    /// Evict every cached access token
    pub fn clear_all(&self) {
        let slots: Vec<Arc<TokenSlot>> = self.slots.lock().values().cloned().collect();
        for slot in slots {
            slot.evict();
        }
    }

    /// Users that currently hold a cached access token (expired or not)
    pub fn cached_users(&self) -> Vec<String> {
        let slots = self.slots.lock();
        let mut users: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.cached.lock().is_some())
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Store the tokens of a completed authorization-code exchange
    ///
    /// Upserts the user's credential and seeds the cache with the fresh
    /// access token.
    ///
    /// # Errors
    ///
    /// `Error::Refresh` when the grant carries no refresh token; storage
    /// errors are propagated.
    pub async fn authorize(
        &self,
        grant: &TokenGrant,
        profile: &UserProfile,
    ) -> Result<UserCredential> {
        let refresh_token = grant.refresh_token.as_deref().ok_or_else(|| {
            Error::refresh(&profile.id, "authorization grant carried no refresh token")
        })?;

        let credential = self
            .credentials
            .upsert(
                &profile.id,
                profile.email.as_deref().unwrap_or_default(),
                refresh_token,
                Some(&grant.access_token),
                Some(wall_clock_expiry(grant.expires_in)),
            )
            .await?;

        self.slot(&profile.id)
            .store(&grant.access_token, grant.expires_in);
        info!(user_id = %profile.id, "User authorized");

        Ok(credential)
    }

    fn slot(&self, user_id: &str) -> Arc<TokenSlot> {
        let mut slots = self.slots.lock();
        slots.entry(user_id.to_string()).or_default().clone()
    }

    /// Call the provider and persist what it returned
    ///
    /// Persistence failures after a successful refresh are logged, not
    /// returned: the access token is valid either way.
    async fn refresh(&self, user_id: &str) -> Result<TokenGrant> {
        let credential = match self.credentials.find_by_user_id(user_id).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                warn!("No stored credential");
                return Err(Error::refresh(user_id, "no stored credential"));
            }
            Err(e) => {
                error!(error = %e, "Stored credential unreadable");
                return Err(Error::refresh(
                    user_id,
                    format!("stored credential unreadable: {}", e),
                ));
            }
        };

        info!("Refreshing access token");
        let grant = self
            .provider
            .refresh_access_token(&credential.refresh_token)
            .await
            .map_err(|e| {
                error!(error = %e, "Token refresh failed");
                match e {
                    Error::Refresh { .. } => e,
                    other => Error::refresh(user_id, other.to_string()),
                }
            })?;

        let expiry = wall_clock_expiry(grant.expires_in);
        let persisted = match grant.refresh_token.as_deref() {
            Some(rotated) if rotated != credential.refresh_token => {
                debug!("Provider rotated the refresh token");
                self.credentials
                    .upsert(
                        user_id,
                        &credential.email,
                        rotated,
                        Some(&grant.access_token),
                        Some(expiry),
                    )
                    .await
                    .map(|_| ())
            }
            _ => self.credentials.update_expiry(user_id, expiry).await,
        };
        if let Err(e) = persisted {
            error!(error = %e, "Failed to persist refreshed credential");
        }

        Ok(grant)
    }
}

fn wall_clock_expiry(expires_in: Duration) -> chrono::DateTime<Utc> {
    let delta = chrono::Duration::from_std(expires_in).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + delta
}
