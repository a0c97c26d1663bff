//! Configuration types for the newadds system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::crypto::{MIN_SECRET_LEN, secret_len};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewaddsConfig {
    /// Streaming provider configuration
    pub provider: ProviderConfig,

    /// Credential and playlist store configuration
    pub store: StoreConfig,

    /// Refresh-token encryption configuration
    pub crypto: CryptoConfig,

    /// Sync engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Access-token cache settings
    #[serde(default)]
    pub token: TokenConfig,

    /// Playlist fetch settings
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl NewaddsConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.provider.validate()?;
        self.store.validate()?;
        self.crypto.validate()?;
        self.engine.validate()?;
        self.token.validate()?;
        self.fetch.validate()?;
        Ok(())
    }
}

/// Streaming provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Spotify Web API
    Spotify {
        /// OAuth client ID
        client_id: String,
        /// OAuth client secret
        client_secret: String,
        /// Redirect URI registered for the authorization-code flow
        #[serde(default)]
        redirect_uri: Option<String>,
        /// Log write calls instead of performing them
        #[serde(default)]
        dry_run: bool,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Spotify {
                client_id,
                client_secret,
                redirect_uri,
                ..
            } => {
                if client_id.is_empty() {
                    return Err(crate::Error::config("Spotify client ID cannot be empty"));
                }
                if client_secret.is_empty() {
                    return Err(crate::Error::config(
                        "Spotify client secret cannot be empty",
                    ));
                }
                if let Some(uri) = redirect_uri
                    && !uri.starts_with("http://")
                    && !uri.starts_with("https://")
                {
                    return Err(crate::Error::config(format!(
                        "Spotify redirect URI must be an HTTP(S) URL. Got: {}",
                        uri
                    )));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Spotify { .. } => "spotify",
        }
    }
}

// Custom Debug implementation that hides the client secret
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::Spotify {
                client_id,
                redirect_uri,
                dry_run,
                ..
            } => f
                .debug_struct("Spotify")
                .field("client_id", client_id)
                .field("client_secret", &"<REDACTED>")
                .field("redirect_uri", redirect_uri)
                .field("dry_run", dry_run)
                .finish(),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// SQLite database
    Sqlite {
        /// sqlx connection URL, e.g. `sqlite:///var/lib/newadds/newadds.db`
        url: String,
    },
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::Sqlite { url } => {
                if !url.starts_with("sqlite:") {
                    return Err(crate::Error::config(format!(
                        "Database URL must start with 'sqlite:'. Got: {}",
                        url
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Refresh-token encryption configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Long-lived secret the per-blob keys are derived from
    pub encryption_key: String,
}

impl CryptoConfig {
    /// Validate the encryption configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if secret_len(&self.encryption_key) < MIN_SECRET_LEN {
            return Err(crate::Error::config(format!(
                "Encryption key must be set and be at least {} characters long",
                MIN_SECRET_LEN
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("encryption_key", &"<REDACTED>")
            .finish()
    }
}

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Display name of the managed target playlist
    #[serde(default = "default_target_playlist_name")]
    pub target_playlist_name: String,

    /// Whether newly created target playlists are public
    #[serde(default = "default_target_playlist_public")]
    pub target_playlist_public: bool,

    /// How many users are synchronized concurrently
    #[serde(default = "default_max_concurrent_users")]
    pub max_concurrent_users: usize,

    /// Capacity of the engine event channel
    ///
    /// When full, events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.target_playlist_name.trim().is_empty() {
            return Err(crate::Error::config("Target playlist name cannot be empty"));
        }
        if self.max_concurrent_users == 0 {
            return Err(crate::Error::config("max_concurrent_users must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_playlist_name: default_target_playlist_name(),
            target_playlist_public: default_target_playlist_public(),
            max_concurrent_users: default_max_concurrent_users(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Access-token cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Seconds before the provider-stated expiry at which a cached token is
    /// treated as expired
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
}

impl TokenConfig {
    /// Validate the token configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.refresh_skew_secs > 600 {
            return Err(crate::Error::config(format!(
                "refresh_skew_secs must be at most 600. Got: {}",
                self.refresh_skew_secs
            )));
        }
        Ok(())
    }

    /// The skew as a duration
    pub fn refresh_skew(&self) -> Duration {
        Duration::from_secs(self.refresh_skew_secs)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_skew_secs: default_refresh_skew_secs(),
        }
    }
}

/// Playlist fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Upper bound on pages followed for one playlist
    ///
    /// Guards against a provider returning a cursor that never ends.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl FetchConfig {
    /// Validate the fetch configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_pages == 0 {
            return Err(crate::Error::config("max_pages must be > 0"));
        }
        Ok(())
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
        }
    }
}

fn default_target_playlist_name() -> String {
    "New Adds".to_string()
}

fn default_target_playlist_public() -> bool {
    true
}

fn default_max_concurrent_users() -> usize {
    4
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_refresh_skew_secs() -> u64 {
    60
}

fn default_max_pages() -> usize {
    10_000
}
