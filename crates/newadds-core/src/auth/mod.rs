//! Credential persistence and access-token lifecycle
//!
//! - [`CredentialStore`]: encrypts refresh tokens on the way into a
//!   [`CredentialRepository`](crate::traits::CredentialRepository) and
//!   decrypts them on the way out
//! - [`TokenManager`]: per-user access-token cache with single-flight refresh

mod credential_store;
mod token_manager;

pub use credential_store::CredentialStore;
pub use token_manager::TokenManager;
