//! Core traits for the newadds system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`MusicProvider`]: Token endpoint, playlist reads and writes on the streaming service
//! - [`CredentialRepository`]: Persistence of encrypted per-user credentials
//! - [`PlaylistRepository`]: Monitored playlists, target mapping and watermark

pub mod credential_repository;
pub mod music_provider;
pub mod playlist_repository;

pub use credential_repository::CredentialRepository;
pub use music_provider::{MusicProvider, PageError};
pub use playlist_repository::PlaylistRepository;
