//! Error types for the newadds system
//!
//! This module defines all error types used throughout the crate.
//!
//! The taxonomy separates per-entity failures (a user or a playlist that
//! cannot be processed this cycle) from the single fatal condition that
//! aborts a run: being unable to enumerate the monitored playlists.

use thiserror::Error;

/// Result type alias for newadds operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the newadds system
#[derive(Error, Debug)]
pub enum Error {
    /// Input that the codec cannot handle (non-text plaintext)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Encrypted blob is truncated, corrupted or has been tampered with
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Refresh token rejected or refresh call failed for a user
    #[error("Token refresh failed for user {user_id}: {message}")]
    Refresh {
        /// Provider user ID
        user_id: String,
        /// Error message
        message: String,
    },

    /// Playlist inaccessible or rate-limited
    #[error("Fetch failed for playlist {playlist_id}: {message}")]
    Fetch {
        /// Provider playlist ID
        playlist_id: String,
        /// Error message
        message: String,
    },

    /// A provider write during the destination rewrite failed
    #[error("Rewrite of target playlist failed at {step} for user {user_id}: {message}")]
    Rewrite {
        /// Provider user ID
        user_id: String,
        /// Which rewrite sub-step failed (clear, add, rename)
        step: &'static str,
        /// Error message
        message: String,
    },

    /// The run cannot proceed at all
    #[error("Fatal: {0}")]
    Fatal(String),

    /// Credential or playlist repository errors
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a decryption error
    pub fn decryption(msg: impl Into<String>) -> Self {
        Self::Decryption(msg.into())
    }

    /// Create a token refresh error
    pub fn refresh(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Refresh {
            user_id: user_id.into(),
            message: message.into(),
        }
    }

    /// Create a playlist fetch error
    pub fn fetch(playlist_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            playlist_id: playlist_id.into(),
            message: message.into(),
        }
    }

    /// Create a rewrite error for the given sub-step
    pub fn rewrite(
        user_id: impl Into<String>,
        step: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Rewrite {
            user_id: user_id.into(),
            step,
            message: message.into(),
        }
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_is_fatal() {
        assert!(Error::fatal("monitored playlists unreadable").is_fatal());
        assert!(!Error::refresh("alice", "invalid_grant").is_fatal());
        assert!(!Error::rewrite("alice", "add", "502").is_fatal());
        assert!(!Error::store("locked").is_fatal());
    }

    #[test]
    fn rewrite_error_names_the_step() {
        let err = Error::rewrite("alice", "clear", "HTTP 500");
        assert_eq!(
            err.to_string(),
            "Rewrite of target playlist failed at clear for user alice: HTTP 500"
        );
    }
}
