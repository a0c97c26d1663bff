use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::crypto::TokenCodec;
use crate::error::Result;
use crate::model::{CredentialUpsert, StoredCredential, UserCredential};
use crate::traits::CredentialRepository;

/// Credential persistence with refresh tokens encrypted at rest
///
/// The plaintext refresh token only exists in memory: it is sealed with the
/// [`TokenCodec`] before reaching the repository and opened again on lookup.
#[derive(Clone)]
pub struct CredentialStore {
    codec: TokenCodec,
    repository: Arc<dyn CredentialRepository>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Create a credential store over a repository
    pub fn new(codec: TokenCodec, repository: Arc<dyn CredentialRepository>) -> Self {
        Self { codec, repository }
    }

    /// Insert or update a user's credential
    ///
    /// # Parameters
    ///
    /// - `refresh_token`: plaintext; only its encrypted form is persisted
    /// - `access_token` / `expiry`: optional hints for the last issued access token
    ///
    /// # Returns
    ///
    /// The credential as stored, with the refresh token in plaintext.
    pub async fn upsert(
        &self,
        provider_user_id: &str,
        email: &str,
        refresh_token: &str,
        access_token: Option<&str>,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<UserCredential> {
        let encrypted_refresh_token = self.codec.encrypt(refresh_token)?;

        let stored = self
            .repository
            .upsert_credential(&CredentialUpsert {
                provider_user_id: provider_user_id.to_string(),
                email: email.to_string(),
                encrypted_refresh_token,
                access_token: access_token.map(str::to_string),
                access_token_expiry: expiry,
            })
            .await?;

        debug!(user_id = %provider_user_id, internal_id = stored.internal_id, "Credential stored");
        Ok(Self::open(stored, refresh_token.to_string()))
    }

    /// Look up a user's credential, decrypting the refresh token
    ///
    /// # Returns
    ///
    /// - `Ok(Some(UserCredential))`: the credential
    /// - `Ok(None)`: no credential for this user
    /// - `Err(Error::Decryption)`: the stored blob is corrupted or was sealed
    ///   under a different secret
    pub async fn find_by_user_id(&self, provider_user_id: &str) -> Result<Option<UserCredential>> {
        let Some(stored) = self.repository.find_credential(provider_user_id).await? else {
            return Ok(None);
        };

        let refresh_token = self.codec.decrypt(&stored.encrypted_refresh_token)?;
        Ok(Some(Self::open(stored, refresh_token)))
    }

    /// Record a new access-token expiry hint
    pub async fn update_expiry(&self, provider_user_id: &str, expiry: DateTime<Utc>) -> Result<()> {
        self.repository.update_expiry(provider_user_id, expiry).await
    }

    fn open(stored: StoredCredential, refresh_token: String) -> UserCredential {
        UserCredential {
            provider_user_id: stored.provider_user_id,
            internal_id: stored.internal_id,
            email: stored.email,
            refresh_token,
            last_known_access_token: stored.last_known_access_token,
            access_token_expiry: stored.access_token_expiry,
        }
    }
}
