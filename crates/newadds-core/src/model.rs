//! Domain types shared by the stores, the token manager and the sync engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stored credential with its refresh token already decrypted
///
/// Returned by [`CredentialStore::find_by_user_id`](crate::auth::CredentialStore::find_by_user_id).
#[derive(Clone, PartialEq, Eq)]
pub struct UserCredential {
    /// Provider-side user identity (the lookup key)
    pub provider_user_id: String,
    /// Repository-assigned identifier, stable across upserts
    pub internal_id: i64,
    /// Account email
    pub email: String,
    /// Decrypted refresh token
    pub refresh_token: String,
    /// Last access token the provider issued, if persisted
    pub last_known_access_token: Option<String>,
    /// Wall-clock expiry hint for the last access token
    pub access_token_expiry: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredential")
            .field("provider_user_id", &self.provider_user_id)
            .field("internal_id", &self.internal_id)
            .field("email", &self.email)
            .field("refresh_token", &"<REDACTED>")
            .field("access_token_expiry", &self.access_token_expiry)
            .finish()
    }
}

/// A credential row as the repository sees it: refresh token still encrypted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub provider_user_id: String,
    pub internal_id: i64,
    pub email: String,
    /// Codec blob, never the plaintext token
    pub encrypted_refresh_token: String,
    pub last_known_access_token: Option<String>,
    pub access_token_expiry: Option<DateTime<Utc>>,
}

/// Fields written by a credential upsert
///
/// The internal identifier is deliberately absent: it is assigned once by the
/// repository and never overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialUpsert {
    pub provider_user_id: String,
    pub email: String,
    pub encrypted_refresh_token: String,
    pub access_token: Option<String>,
    pub access_token_expiry: Option<DateTime<Utc>>,
}

/// A source playlist whose new entries are collected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredPlaylist {
    pub provider_user_id: String,
    pub provider_playlist_id: String,
    pub display_name: String,
    pub is_active: bool,
}

/// The aggregate playlist this system manages for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPlaylist {
    pub provider_user_id: String,
    pub provider_playlist_id: String,
    pub display_name: String,
    /// Start time of the last run whose rewrite fully committed
    pub last_successful_run: Option<DateTime<Utc>>,
}

/// A normalized playlist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub track_id: String,
    pub name: String,
    /// Display only, in provider order
    pub artist_names: Vec<String>,
    /// `None` when the provider timestamp did not parse
    pub added_at: Option<DateTime<Utc>>,
    /// The provider timestamp as received, for diagnostics
    pub added_at_raw: String,
}

impl Track {
    /// Artists joined the way they are shown in logs
    pub fn artists_display(&self) -> String {
        self.artist_names.join(", ")
    }
}

/// Which source playlist contributed a track (diagnostics only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub playlist_id: String,
    pub playlist_name: String,
}

/// Tokens issued by the provider's token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present only when the provider rotated (or first issued) the refresh token
    pub refresh_token: Option<String>,
    pub expires_in: Duration,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<REDACTED>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<REDACTED>"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// The authenticated user's provider profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Track object inside a raw playlist page entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTrack {
    /// `None` for items with no catalogue identity (e.g. local files)
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
}

/// One raw entry of a playlist page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    /// `None` when the underlying item was removed or is unavailable
    pub track: Option<EntryTrack>,
    #[serde(default)]
    pub added_at: String,
}

/// One page of a cursor-paginated playlist listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackPage {
    pub entries: Vec<PlaylistEntry>,
    /// Opaque cursor for the next page, followed verbatim
    pub next: Option<String>,
}

/// Provider-side playlist metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub name: String,
}
