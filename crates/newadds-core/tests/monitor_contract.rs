//! Contract Test: Monitored Playlist Management
//!
//! Constraints verified:
//! - Authorization stores an encrypted credential usable by the token manager
//! - Adding a playlist requires a credential and a provider-side playlist
//! - Toggling an unknown monitored playlist is NotFound

mod common;

use common::*;
use newadds_core::Error;
use newadds_core::traits::{CredentialRepository, PlaylistRepository};

#[tokio::test]
async fn authorize_user_stores_encrypted_credential() {
    let h = Harness::new();
    let service = h.monitor_service();

    let credential = service.authorize_user("carol").await.expect("authorized");
    assert_eq!(credential.provider_user_id, "carol");
    assert_eq!(credential.email, "carol@example.com");
    assert_eq!(credential.refresh_token, "refresh:carol");

    let raw = h.credentials.find_credential("carol").await.unwrap().unwrap();
    assert_ne!(raw.encrypted_refresh_token, "refresh:carol");

    // Cache was seeded by the exchange, no refresh needed
    let token = h.tokens.get_valid_access_token("carol").await.unwrap();
    assert_eq!(token, "access:carol");
    assert_eq!(h.provider.refresh_calls(), 0);
}

#[tokio::test]
async fn add_monitored_playlist_uses_provider_name() {
    let h = Harness::new();
    h.add_user("alice").await;
    h.provider.set_playlist("p1", vec![]);

    let monitored = h
        .monitor_service()
        .add_monitored_playlist("alice", "p1")
        .await
        .expect("playlist added");

    assert_eq!(monitored.display_name, "Playlist p1");
    assert!(monitored.is_active);

    let active = h.playlists.list_active_monitored().await.unwrap();
    assert_eq!(active, vec![monitored]);
}

#[tokio::test]
async fn add_requires_a_stored_credential() {
    let h = Harness::new();
    h.provider.set_playlist("p1", vec![]);

    let result = h
        .monitor_service()
        .add_monitored_playlist("stranger", "p1")
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(h.playlists.all_monitored().await.is_empty());
}

#[tokio::test]
async fn add_rejects_unknown_playlist() {
    let h = Harness::new();
    h.add_user("alice").await;

    let result = h
        .monitor_service()
        .add_monitored_playlist("alice", "missing")
        .await;
    assert!(result.is_err());
    assert!(h.playlists.all_monitored().await.is_empty());
}

#[tokio::test]
async fn set_active_round_trip() {
    let h = Harness::new();
    h.add_user("alice").await;
    h.provider.set_playlist("p1", vec![]);
    let service = h.monitor_service();
    service.add_monitored_playlist("alice", "p1").await.unwrap();

    service.set_active("alice", "p1", false).await.unwrap();
    assert!(h.playlists.list_active_monitored().await.unwrap().is_empty());

    service.set_active("alice", "p1", true).await.unwrap();
    assert_eq!(h.playlists.list_active_monitored().await.unwrap().len(), 1);

    let missing = service.set_active("alice", "p9", true).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}
