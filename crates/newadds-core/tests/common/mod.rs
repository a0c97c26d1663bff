//! Test doubles and common utilities for contract tests
//!
//! This module provides a scripted provider and a harness that wires the
//! in-memory repositories, the token manager and the sync engine together.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newadds_core::auth::{CredentialStore, TokenManager};
use newadds_core::config::{EngineConfig, FetchConfig, TokenConfig};
use newadds_core::engine::{SyncEngine, SyncEvent};
use newadds_core::error::{Error, Result};
use newadds_core::model::{
    EntryTrack, MonitoredPlaylist, PlaylistEntry, PlaylistInfo, TokenGrant, TrackPage, UserProfile,
};
use newadds_core::monitor::MonitorService;
use newadds_core::state::{MemoryCredentialRepository, MemoryPlaylistRepository};
use newadds_core::traits::{MusicProvider, PageError, PlaylistRepository};
use newadds_core::TokenCodec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const SECRET: &str = "contract-test-encryption-secret-0123456789";

/// A provider-side write, in the order it was performed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Create { user_id: String, name: String },
    Clear { playlist_id: String },
    Add { playlist_id: String, track_ids: Vec<String> },
    Details { playlist_id: String, name: String, description: String },
}

/// A MusicProvider whose responses are scripted by the test
///
/// - Playlists are lists of pages; cursors are `"{playlist}#{page}"`
/// - Access tokens are `"access:{refresh_token}"`
/// - Writes are recorded and can be made to fail per target playlist and step
pub struct ScriptedProvider {
    pages: Mutex<HashMap<String, Vec<Vec<PlaylistEntry>>>>,
    page_failures: Mutex<HashMap<(String, usize), PageError>>,
    playlist_names: Mutex<HashMap<String, String>>,
    revoked: Mutex<HashSet<String>>,
    write_failures: Mutex<HashSet<(String, &'static str)>>,
    create_failures: Mutex<HashSet<String>>,
    writes: Mutex<Vec<Write>>,
    refresh_calls: AtomicUsize,
    page_calls: AtomicUsize,
    refresh_delay: Mutex<Duration>,
    batch_size: usize,
    dry_run: AtomicBool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::with_batch_size(100)
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            page_failures: Mutex::new(HashMap::new()),
            playlist_names: Mutex::new(HashMap::new()),
            revoked: Mutex::new(HashSet::new()),
            write_failures: Mutex::new(HashSet::new()),
            create_failures: Mutex::new(HashSet::new()),
            writes: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
            refresh_delay: Mutex::new(Duration::ZERO),
            batch_size,
            dry_run: AtomicBool::new(false),
        }
    }

    /// Script a single-page playlist
    pub fn set_playlist(&self, playlist_id: &str, entries: Vec<PlaylistEntry>) {
        self.set_pages(playlist_id, vec![entries]);
    }

    /// Script a multi-page playlist
    pub fn set_pages(&self, playlist_id: &str, pages: Vec<Vec<PlaylistEntry>>) {
        self.playlist_names
            .lock()
            .unwrap()
            .insert(playlist_id.to_string(), format!("Playlist {}", playlist_id));
        self.pages
            .lock()
            .unwrap()
            .insert(playlist_id.to_string(), pages);
    }

    /// Make page `page` of `playlist_id` fail
    pub fn fail_page(&self, playlist_id: &str, page: usize, error: PageError) {
        self.page_failures
            .lock()
            .unwrap()
            .insert((playlist_id.to_string(), page), error);
    }

    /// Stop failing page `page` of `playlist_id`
    pub fn heal_page(&self, playlist_id: &str, page: usize) {
        self.page_failures
            .lock()
            .unwrap()
            .remove(&(playlist_id.to_string(), page));
    }

    /// Make a rewrite step ("clear", "add", "rename") fail for a target playlist
    pub fn fail_write(&self, playlist_id: &str, step: &'static str) {
        self.write_failures
            .lock()
            .unwrap()
            .insert((playlist_id.to_string(), step));
    }

    /// Stop failing a rewrite step
    pub fn heal_write(&self, playlist_id: &str, step: &'static str) {
        self.write_failures
            .lock()
            .unwrap()
            .remove(&(playlist_id.to_string(), step));
    }

    /// Make target playlist creation fail for a user
    pub fn fail_create(&self, user_id: &str) {
        self.create_failures
            .lock()
            .unwrap()
            .insert(user_id.to_string());
    }

    /// Reject refreshes with this refresh token
    pub fn revoke(&self, refresh_token: &str) {
        self.revoked
            .lock()
            .unwrap()
            .insert(refresh_token.to_string());
    }

    pub fn set_dry_run(&self, dry_run: bool) {
        self.dry_run.store(dry_run, Ordering::SeqCst);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    /// Track ids added to `playlist_id` since the last clear
    pub fn contents(&self, playlist_id: &str) -> Vec<String> {
        let mut contents = Vec::new();
        for write in self.writes.lock().unwrap().iter() {
            match write {
                Write::Clear { playlist_id: p } if p == playlist_id => contents.clear(),
                Write::Add {
                    playlist_id: p,
                    track_ids,
                } if p == playlist_id => contents.extend(track_ids.iter().cloned()),
                _ => {}
            }
        }
        contents
    }

    fn check_write(&self, playlist_id: &str, step: &'static str) -> Result<()> {
        if self
            .write_failures
            .lock()
            .unwrap()
            .contains(&(playlist_id.to_string(), step))
        {
            return Err(Error::provider("scripted", format!("{} failed with status 502", step)));
        }
        Ok(())
    }
}

#[async_trait]
impl MusicProvider for ScriptedProvider {
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.revoked.lock().unwrap().contains(refresh_token) {
            return Err(Error::provider("scripted", "invalid_grant: Refresh token revoked"));
        }
        Ok(TokenGrant {
            access_token: format!("access:{}", refresh_token),
            refresh_token: None,
            expires_in: Duration::from_secs(3600),
        })
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        Ok(TokenGrant {
            access_token: format!("access:{}", code),
            refresh_token: Some(format!("refresh:{}", code)),
            expires_in: Duration::from_secs(3600),
        })
    }

    async fn current_user_profile(&self, access_token: &str) -> Result<UserProfile> {
        let user = access_token.trim_start_matches("access:");
        Ok(UserProfile {
            id: user.to_string(),
            email: Some(format!("{}@example.com", user)),
        })
    }

    async fn fetch_playlist_page(
        &self,
        _access_token: &str,
        playlist_id: &str,
        cursor: Option<&str>,
    ) -> std::result::Result<TrackPage, PageError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);

        let index = match cursor {
            None => 0,
            Some(cursor) => cursor
                .rsplit_once('#')
                .and_then(|(_, n)| n.parse::<usize>().ok())
                .ok_or_else(|| PageError::Malformed(format!("bad cursor {}", cursor)))?,
        };

        if let Some(error) = self
            .page_failures
            .lock()
            .unwrap()
            .get(&(playlist_id.to_string(), index))
        {
            return Err(error.clone());
        }

        let pages = self.pages.lock().unwrap();
        let pages = pages.get(playlist_id).ok_or(PageError::NotFound)?;
        let entries = pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < pages.len()).then(|| format!("{}#{}", playlist_id, index + 1));

        Ok(TrackPage { entries, next })
    }

    async fn get_playlist(&self, _access_token: &str, playlist_id: &str) -> Result<PlaylistInfo> {
        let names = self.playlist_names.lock().unwrap();
        let name = names
            .get(playlist_id)
            .ok_or_else(|| Error::not_found(format!("playlist {}", playlist_id)))?;
        Ok(PlaylistInfo {
            id: playlist_id.to_string(),
            name: name.clone(),
        })
    }

    async fn create_playlist(
        &self,
        _access_token: &str,
        user_id: &str,
        name: &str,
        _description: &str,
        _public: bool,
    ) -> Result<PlaylistInfo> {
        if self.create_failures.lock().unwrap().contains(user_id) {
            return Err(Error::provider("scripted", "create failed with status 500"));
        }
        self.writes.lock().unwrap().push(Write::Create {
            user_id: user_id.to_string(),
            name: name.to_string(),
        });
        Ok(PlaylistInfo {
            id: target_id(user_id),
            name: name.to_string(),
        })
    }

    async fn clear_playlist(&self, _access_token: &str, playlist_id: &str) -> Result<()> {
        self.check_write(playlist_id, "clear")?;
        self.writes.lock().unwrap().push(Write::Clear {
            playlist_id: playlist_id.to_string(),
        });
        Ok(())
    }

    async fn add_tracks(
        &self,
        _access_token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<()> {
        assert!(track_ids.len() <= self.batch_size, "batch too large");
        self.check_write(playlist_id, "add")?;
        self.writes.lock().unwrap().push(Write::Add {
            playlist_id: playlist_id.to_string(),
            track_ids: track_ids.to_vec(),
        });
        Ok(())
    }

    async fn update_details(
        &self,
        _access_token: &str,
        playlist_id: &str,
        name: &str,
        description: &str,
    ) -> Result<()> {
        self.check_write(playlist_id, "rename")?;
        self.writes.lock().unwrap().push(Write::Details {
            playlist_id: playlist_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        });
        Ok(())
    }

    fn max_tracks_per_request(&self) -> usize {
        self.batch_size
    }

    fn dry_run(&self) -> bool {
        self.dry_run.load(Ordering::SeqCst)
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// Target playlist id the scripted provider assigns to a user
pub fn target_id(user_id: &str) -> String {
    format!("target-{}", user_id)
}

/// A playlist entry with a parsed timestamp
pub fn entry(track_id: &str, added_at: DateTime<Utc>) -> PlaylistEntry {
    raw_entry(track_id, &added_at.to_rfc3339())
}

/// A playlist entry with a verbatim timestamp
pub fn raw_entry(track_id: &str, added_at: &str) -> PlaylistEntry {
    PlaylistEntry {
        track: Some(EntryTrack {
            id: Some(track_id.to_string()),
            name: format!("Song {}", track_id),
            artists: vec!["Artist".to_string()],
        }),
        added_at: added_at.to_string(),
    }
}

/// Everything a contract test needs, wired over in-memory stores
pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub credentials: MemoryCredentialRepository,
    pub playlists: MemoryPlaylistRepository,
    pub tokens: Arc<TokenManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_provider(ScriptedProvider::new())
    }

    pub fn with_provider(provider: ScriptedProvider) -> Self {
        let provider = Arc::new(provider);
        let credentials = MemoryCredentialRepository::new();
        let playlists = MemoryPlaylistRepository::new();

        let codec = TokenCodec::new(SECRET).expect("valid secret");
        let store = CredentialStore::new(codec, Arc::new(credentials.clone()));
        let tokens = Arc::new(TokenManager::new(
            provider.clone(),
            store,
            &TokenConfig::default(),
        ));

        Self {
            provider,
            credentials,
            playlists,
            tokens,
        }
    }

    /// Store a credential whose refresh token is `refresh-{user}`
    pub async fn add_user(&self, user_id: &str) {
        self.tokens
            .credentials()
            .upsert(
                user_id,
                &format!("{}@example.com", user_id),
                &format!("refresh-{}", user_id),
                None,
                None,
            )
            .await
            .expect("credential stored");
    }

    /// Monitor `playlist_id` for `user_id`
    pub async fn monitor(&self, user_id: &str, playlist_id: &str) {
        self.playlists
            .upsert_monitored(&MonitoredPlaylist {
                provider_user_id: user_id.to_string(),
                provider_playlist_id: playlist_id.to_string(),
                display_name: format!("Playlist {}", playlist_id),
                is_active: true,
            })
            .await
            .expect("monitored playlist stored");
    }

    pub fn engine(&self) -> (SyncEngine, mpsc::Receiver<SyncEvent>) {
        self.engine_with(EngineConfig::default())
    }

    pub fn engine_with(&self, config: EngineConfig) -> (SyncEngine, mpsc::Receiver<SyncEvent>) {
        SyncEngine::new(
            self.provider.clone(),
            self.tokens.clone(),
            Arc::new(self.playlists.clone()),
            config,
            &FetchConfig::default(),
        )
        .expect("engine construction succeeds")
    }

    pub fn monitor_service(&self) -> MonitorService {
        MonitorService::new(
            self.provider.clone(),
            self.tokens.clone(),
            Arc::new(self.playlists.clone()),
        )
    }

    pub async fn watermark(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.playlists
            .target(user_id)
            .await
            .and_then(|t| t.last_successful_run)
    }
}

/// A playlist repository whose monitored listing always fails
pub struct UnreadablePlaylists;

#[async_trait]
impl PlaylistRepository for UnreadablePlaylists {
    async fn list_active_monitored(&self) -> Result<Vec<MonitoredPlaylist>> {
        Err(Error::store("database is locked"))
    }

    async fn upsert_monitored(&self, _playlist: &MonitoredPlaylist) -> Result<()> {
        Err(Error::store("database is locked"))
    }

    async fn set_monitored_active(
        &self,
        _provider_user_id: &str,
        _provider_playlist_id: &str,
        _is_active: bool,
    ) -> Result<bool> {
        Err(Error::store("database is locked"))
    }

    async fn get_target(
        &self,
        _provider_user_id: &str,
    ) -> Result<Option<newadds_core::model::TargetPlaylist>> {
        Err(Error::store("database is locked"))
    }

    async fn insert_target(&self, _target: &newadds_core::model::TargetPlaylist) -> Result<()> {
        Err(Error::store("database is locked"))
    }

    async fn advance_watermark(
        &self,
        _provider_user_id: &str,
        _provider_playlist_id: &str,
        _watermark: DateTime<Utc>,
    ) -> Result<bool> {
        Err(Error::store("database is locked"))
    }
}

/// In-memory playlists whose watermark writes always fail
pub struct UnwritableWatermark(pub MemoryPlaylistRepository);

#[async_trait]
impl PlaylistRepository for UnwritableWatermark {
    async fn list_active_monitored(&self) -> Result<Vec<MonitoredPlaylist>> {
        self.0.list_active_monitored().await
    }

    async fn upsert_monitored(&self, playlist: &MonitoredPlaylist) -> Result<()> {
        self.0.upsert_monitored(playlist).await
    }

    async fn set_monitored_active(
        &self,
        provider_user_id: &str,
        provider_playlist_id: &str,
        is_active: bool,
    ) -> Result<bool> {
        self.0
            .set_monitored_active(provider_user_id, provider_playlist_id, is_active)
            .await
    }

    async fn get_target(
        &self,
        provider_user_id: &str,
    ) -> Result<Option<newadds_core::model::TargetPlaylist>> {
        self.0.get_target(provider_user_id).await
    }

    async fn insert_target(&self, target: &newadds_core::model::TargetPlaylist) -> Result<()> {
        self.0.insert_target(target).await
    }

    async fn advance_watermark(
        &self,
        _provider_user_id: &str,
        _provider_playlist_id: &str,
        _watermark: DateTime<Utc>,
    ) -> Result<bool> {
        Err(Error::store("disk I/O error"))
    }
}

/// Drain every event currently buffered in the channel
pub fn drain(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
