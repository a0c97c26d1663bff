// # Credential Repository Trait
//
// Defines the persistence interface for per-user provider credentials.
//
// ## Purpose
//
// The repository stores rows keyed by provider user identity. It only ever
// sees the *encrypted* refresh token; encryption and decryption happen in
// `CredentialStore`, which wraps a repository with the codec.
//
// ## Implementations
//
// - In-memory: `MemoryCredentialRepository` (tests, embedding)
// - SQLite: `newadds-store-sqlite` crate

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{CredentialUpsert, StoredCredential};

/// Trait for credential repository implementations
///
/// Each method is a single round trip. No method spans more than one call,
/// and no transaction is expected across calls.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert or update a credential by provider user identity
    ///
    /// On conflict the email, refresh token, access token and expiry are
    /// overwritten. The internal identifier is assigned on first insert and
    /// never changes.
    ///
    /// # Returns
    ///
    /// - `Ok(StoredCredential)`: the row as stored
    /// - `Err(Error)`: storage error
    async fn upsert_credential(
        &self,
        credential: &CredentialUpsert,
    ) -> Result<StoredCredential, crate::Error>;

    /// Look up a credential by provider user identity
    ///
    /// # Returns
    ///
    /// - `Ok(Some(StoredCredential))`: the row
    /// - `Ok(None)`: no such user
    /// - `Err(Error)`: storage error
    async fn find_credential(
        &self,
        provider_user_id: &str,
    ) -> Result<Option<StoredCredential>, crate::Error>;

    /// Record a new access-token expiry hint
    ///
    /// Updating an unknown user is not an error.
    async fn update_expiry(
        &self,
        provider_user_id: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), crate::Error>;
}
