// # newadds-core
//
// Core library for the "new adds" playlist aggregator.
//
// ## Architecture Overview
//
// A scheduled run collects the entries added to each user's monitored
// playlists since the last successful run and publishes them into one
// managed target playlist per user:
// - **TokenCodec**: Authenticated encryption of refresh tokens at rest
// - **CredentialStore**: Encrypted credential persistence over a `CredentialRepository`
// - **TokenManager**: Per-user access-token cache with single-flight refresh
// - **PlaylistFetcher**: Cursor-following playlist reads with skip-on-failure
// - **SyncEngine**: Watermark delta, cross-playlist dedup, idempotent rewrite
// - **MonitorService**: Management of the monitored playlist set
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Provider and store adapters live in their own crates
// 2. **Failure Isolation**: A user or playlist failure never aborts the run
// 3. **Library-First**: All core functionality can be used as a library
// 4. **Idempotency**: Watermarks advance only after a fully committed rewrite

pub mod auth;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod monitor;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use auth::{CredentialStore, TokenManager};
pub use config::{
    CryptoConfig, EngineConfig, FetchConfig, NewaddsConfig, ProviderConfig, StoreConfig,
    TokenConfig,
};
pub use crypto::TokenCodec;
pub use engine::{RunReport, SyncEngine, SyncEvent};
pub use error::{Error, Result};
pub use fetcher::PlaylistFetcher;
pub use model::{MonitoredPlaylist, TargetPlaylist, Track, UserCredential};
pub use monitor::MonitorService;
pub use state::{MemoryCredentialRepository, MemoryPlaylistRepository};
pub use traits::{CredentialRepository, MusicProvider, PageError, PlaylistRepository};
