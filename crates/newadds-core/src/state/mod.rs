// # Store Implementations
//
// In-memory implementations of the repository traits. The persistent
// implementation lives in the `newadds-store-sqlite` crate.

pub mod memory;

pub use memory::{MemoryCredentialRepository, MemoryPlaylistRepository};
