//! Core sync engine
//!
//! The SyncEngine is responsible for:
//! - Loading the active monitored playlists
//! - Ensuring every user has a target playlist
//! - Selecting the entries added since the user's watermark
//! - Deduplicating across a user's playlists
//! - Rewriting the target playlist and advancing the watermark
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │ PlaylistRepository │─── active monitored set ───┐
//! └────────────────────┘                            │
//!                                                   ▼
//!                                          ┌──────────────┐
//!                                          │  SyncEngine  │
//!                                          └──────────────┘
//!                                                   │
//!         ┌─────────────────────────┬───────────────┴──────────┬─────────────────┐
//!         │                         │                          │                 │
//!         ▼                         ▼                          ▼                 ▼
//! ┌───────────────┐       ┌─────────────────┐       ┌───────────────┐   ┌─────────────┐
//! │ TokenManager  │       │ PlaylistFetcher │       │ MusicProvider │   │   Events    │
//! │ (per user)    │       │ (read, skip)    │       │ (rewrite)     │   │  (notify)   │
//! └───────────────┘       └─────────────────┘       └───────────────┘   └─────────────┘
//! ```
//!
//! ## Run Flow
//!
//! 1. Load all active monitored playlists (failure here is fatal)
//! 2. Group by user, run users concurrently (bounded)
//! 3. Per user: ensure target, fetch each playlist, select the delta, merge
//! 4. Clear, add (batched), rename the target playlist
//! 5. Advance the watermark to the run's start time
//!
//! Per-user and per-playlist failures are logged and skipped. The watermark
//! only moves after all three rewrite steps succeed and every monitored
//! playlist of the user was read, so a failed run is resumable by simply
//! running again. When a playlist is skipped the target is still rewritten,
//! but the watermark stays put and the next run reconsiders the same window.

mod delta;

pub use delta::{DeltaSelection, Duplicate, Merged, WINDOW_DAYS, merge_tracks, select_delta};

use chrono::{DateTime, SubsecRound, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::TokenManager;
use crate::config::{EngineConfig, FetchConfig};
use crate::error::{Error, Result};
use crate::fetcher::PlaylistFetcher;
use crate::model::{MonitoredPlaylist, Provenance, TargetPlaylist};
use crate::traits::{MusicProvider, PlaylistRepository};

/// Description given to a target playlist when it is created
pub const CREATED_DESCRIPTION: &str =
    "This playlist is managed by automation. New songs are added here automatically.";

/// Description written on every rewrite
pub fn refreshed_description(started_at: DateTime<Utc>) -> String {
    format!(
        "This playlist is managed by automation. Last refreshed: {}",
        started_at.format("%Y-%m-%d")
    )
}

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Run started
    RunStarted {
        started_at: DateTime<Utc>,
        users: usize,
        playlists: usize,
    },

    /// A target playlist was created for a user
    TargetCreated {
        user_id: String,
        playlist_id: String,
    },

    /// A monitored playlist was skipped this run
    PlaylistSkipped {
        user_id: String,
        playlist_id: String,
        reason: String,
    },

    /// A track appeared in more than one monitored playlist
    DuplicateDropped {
        user_id: String,
        track_id: String,
        kept_from: Provenance,
        dropped_from: Provenance,
    },

    /// A user was skipped this run; their watermark did not move
    UserSkipped { user_id: String, reason: String },

    /// A target playlist was rewritten and its watermark advanced
    UserSynced {
        user_id: String,
        playlist_id: String,
        tracks: usize,
        watermark: DateTime<Utc>,
    },

    /// A target playlist was rewritten but its watermark was withheld
    UserPartiallySynced {
        user_id: String,
        playlist_id: String,
        tracks: usize,
        reason: String,
    },

    /// Run finished
    RunFinished { report: RunReport },
}

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    /// Users whose rewrite committed and watermark advanced
    pub users_synced: usize,
    /// Users whose rewrite committed but whose watermark did not move
    pub users_partial: usize,
    /// Users with nothing written this run
    pub users_skipped: usize,
    pub playlists_fetched: usize,
    pub playlists_skipped: usize,
    pub tracks_published: usize,
    pub duplicates_removed: usize,
    /// Entries dropped because their `added_at` did not parse
    pub tracks_unparseable: usize,
}

impl RunReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            users_synced: 0,
            users_partial: 0,
            users_skipped: 0,
            playlists_fetched: 0,
            playlists_skipped: 0,
            tracks_published: 0,
            duplicates_removed: 0,
            tracks_unparseable: 0,
        }
    }

    fn add(&mut self, tally: &UserTally) {
        self.playlists_fetched += tally.playlists_fetched;
        self.playlists_skipped += tally.playlists_skipped;
        self.tracks_published += tally.tracks_published;
        self.duplicates_removed += tally.duplicates_removed;
        self.tracks_unparseable += tally.tracks_unparseable;
    }
}

/// Outcome of a per-entity step that did not complete
#[derive(Debug)]
pub enum Flow {
    /// Give up on this user or playlist for this run
    Skip(String),
    /// Give up on the whole run
    Abort(Error),
}

impl From<Error> for Flow {
    fn from(err: Error) -> Self {
        if err.is_fatal() {
            Flow::Abort(err)
        } else {
            Flow::Skip(err.to_string())
        }
    }
}

/// How far a user's sync got
#[derive(Debug)]
enum UserOutcome {
    /// Rewrite committed, watermark advanced (or would have, in dry-run)
    Synced(UserTally),
    /// Rewrite committed, watermark withheld
    Partial { tally: UserTally, reason: String },
}

/// Per-user tallies folded into the run report
#[derive(Debug, Default)]
struct UserTally {
    playlists_fetched: usize,
    playlists_skipped: usize,
    tracks_published: usize,
    duplicates_removed: usize,
    tracks_unparseable: usize,
}

/// Core sync engine
///
/// One call to [`run_once`](Self::run_once) is one scheduled cycle. The
/// engine holds no state between runs other than what the repositories and
/// the token cache persist.
///
/// ## Load Resistance
///
/// - **Bounded user concurrency**: at most `max_concurrent_users` users in flight
/// - **Bounded event channel**: events are dropped (with a warning) when full
/// - **No in-run retries**: rate limits and failures are deferred to the next run
pub struct SyncEngine {
    provider: Arc<dyn MusicProvider>,
    tokens: Arc<TokenManager>,
    playlists: Arc<dyn PlaylistRepository>,
    fetcher: PlaylistFetcher,
    config: EngineConfig,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Create a new sync engine
    ///
    /// # Parameters
    ///
    /// - `provider`: streaming service adapter
    /// - `tokens`: shared access-token manager
    /// - `playlists`: monitored/target playlist repository
    /// - `config`: engine settings
    /// - `fetch`: playlist fetch settings
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields sync events
    pub fn new(
        provider: Arc<dyn MusicProvider>,
        tokens: Arc<TokenManager>,
        playlists: Arc<dyn PlaylistRepository>,
        config: EngineConfig,
        fetch: &FetchConfig,
    ) -> Result<(Self, mpsc::Receiver<SyncEvent>)> {
        config.validate()?;
        fetch.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let fetcher = PlaylistFetcher::new(provider.clone(), tokens.clone(), fetch);

        let engine = Self {
            provider,
            tokens,
            playlists,
            fetcher,
            config,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Run one sync cycle starting now
    ///
    /// # Returns
    ///
    /// - `Ok(RunReport)`: the monitored set was read; individual users or
    ///   playlists may still have been skipped
    /// - `Err(Error::Fatal)`: the monitored set could not be read, nothing
    ///   was written
    pub async fn run_once(&self) -> Result<RunReport> {
        self.run_once_at(Utc::now().trunc_subsecs(3)).await
    }

    /// Run one sync cycle with an explicit start time
    ///
    /// `started_at` is both the reference point of the first-run window and
    /// the value the watermark advances to.
    #[instrument(skip(self), fields(started_at = %started_at))]
    pub async fn run_once_at(&self, started_at: DateTime<Utc>) -> Result<RunReport> {
        let monitored = self.playlists.list_active_monitored().await.map_err(|e| {
            error!(error = %e, "Cannot read monitored playlists");
            Error::fatal(format!("cannot read monitored playlists: {}", e))
        })?;

        let groups = group_by_user(monitored);
        let playlist_count: usize = groups.iter().map(|(_, p)| p.len()).sum();
        info!(
            users = groups.len(),
            playlists = playlist_count,
            "Starting sync run"
        );
        self.emit_event(SyncEvent::RunStarted {
            started_at,
            users: groups.len(),
            playlists: playlist_count,
        });

        let mut report = RunReport::new(started_at);

        let outcomes: Vec<(String, std::result::Result<UserOutcome, Flow>)> =
            stream::iter(groups)
                .map(|(user_id, playlists)| async move {
                    let outcome = self.sync_user(&user_id, &playlists, started_at).await;
                    (user_id, outcome)
                })
                .buffer_unordered(self.config.max_concurrent_users)
                .collect()
                .await;

        for (user_id, outcome) in outcomes {
            match outcome {
                Ok(UserOutcome::Synced(tally)) => {
                    report.users_synced += 1;
                    report.add(&tally);
                }
                Ok(UserOutcome::Partial { tally, reason }) => {
                    warn!(user_id = %user_id, reason = %reason, "Watermark withheld this run");
                    report.users_partial += 1;
                    report.add(&tally);
                }
                Err(Flow::Skip(reason)) => {
                    warn!(user_id = %user_id, reason = %reason, "User skipped this run");
                    report.users_skipped += 1;
                    self.emit_event(SyncEvent::UserSkipped { user_id, reason });
                }
                Err(Flow::Abort(e)) => return Err(e),
            }
        }

        info!(
            users_synced = report.users_synced,
            users_partial = report.users_partial,
            users_skipped = report.users_skipped,
            playlists_skipped = report.playlists_skipped,
            tracks_published = report.tracks_published,
            duplicates_removed = report.duplicates_removed,
            "Sync run finished"
        );
        self.emit_event(SyncEvent::RunFinished {
            report: report.clone(),
        });

        Ok(report)
    }

    /// Synchronize one user's target playlist
    #[instrument(skip(self, playlists, started_at), fields(user_id = %user_id))]
    async fn sync_user(
        &self,
        user_id: &str,
        playlists: &[MonitoredPlaylist],
        started_at: DateTime<Utc>,
    ) -> std::result::Result<UserOutcome, Flow> {
        let access_token = self.tokens.get_valid_access_token(user_id).await?;
        let target = self.ensure_target(user_id, &access_token).await?;
        let watermark = target.last_successful_run;

        match watermark {
            Some(w) => debug!(watermark = %w, "Selecting entries added after watermark"),
            None => debug!(window_days = WINDOW_DAYS, "No watermark, using first-run window"),
        }

        let mut tally = UserTally::default();
        let mut collected = Vec::with_capacity(playlists.len());

        // A user's playlists are read one after another
        for playlist in playlists {
            match self.collect_playlist(user_id, playlist, watermark, started_at).await {
                Ok(selection) => {
                    tally.playlists_fetched += 1;
                    tally.tracks_unparseable += selection.dropped.len();
                    collected.push((
                        Provenance {
                            playlist_id: playlist.provider_playlist_id.clone(),
                            playlist_name: playlist.display_name.clone(),
                        },
                        selection.included,
                    ));
                }
                Err(Flow::Skip(reason)) => {
                    tally.playlists_skipped += 1;
                    self.emit_event(SyncEvent::PlaylistSkipped {
                        user_id: user_id.to_string(),
                        playlist_id: playlist.provider_playlist_id.clone(),
                        reason,
                    });
                }
                Err(abort) => return Err(abort),
            }
        }

        let merged = merge_tracks(collected);
        for duplicate in &merged.duplicates {
            debug!(
                track_id = %duplicate.track_id,
                kept_from = %duplicate.kept_from.playlist_name,
                dropped_from = %duplicate.dropped_from.playlist_name,
                "Duplicate track dropped"
            );
            self.emit_event(SyncEvent::DuplicateDropped {
                user_id: user_id.to_string(),
                track_id: duplicate.track_id.clone(),
                kept_from: duplicate.kept_from.clone(),
                dropped_from: duplicate.dropped_from.clone(),
            });
        }
        tally.duplicates_removed = merged.duplicates.len();

        let track_ids: Vec<String> = merged.tracks.iter().map(|t| t.track_id.clone()).collect();
        self.rewrite_target(user_id, &target, &track_ids, started_at)
            .await?;
        tally.tracks_published = track_ids.len();

        if tally.playlists_skipped > 0 {
            let reason = format!(
                "{} monitored playlist(s) skipped, watermark withheld",
                tally.playlists_skipped
            );
            return Ok(self.partial(user_id, &target, tally, reason));
        }

        if self.provider.dry_run() {
            info!(
                tracks = track_ids.len(),
                "[DRY-RUN] Would advance watermark to {}", started_at
            );
            return Ok(UserOutcome::Synced(tally));
        }

        match self
            .playlists
            .advance_watermark(user_id, &target.provider_playlist_id, started_at)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("Watermark already at or past run start"),
            Err(e) => {
                error!(error = %e, "Rewrite committed but watermark was not stored");
                let reason = format!("watermark not stored: {}", e);
                return Ok(self.partial(user_id, &target, tally, reason));
            }
        }

        info!(
            tracks = track_ids.len(),
            playlists_skipped = tally.playlists_skipped,
            "Target playlist refreshed"
        );
        self.emit_event(SyncEvent::UserSynced {
            user_id: user_id.to_string(),
            playlist_id: target.provider_playlist_id.clone(),
            tracks: track_ids.len(),
            watermark: started_at,
        });

        Ok(UserOutcome::Synced(tally))
    }

    /// Report a committed rewrite whose watermark did not advance
    fn partial(
        &self,
        user_id: &str,
        target: &TargetPlaylist,
        tally: UserTally,
        reason: String,
    ) -> UserOutcome {
        info!(
            tracks = tally.tracks_published,
            reason = %reason,
            "Target playlist refreshed without advancing watermark"
        );
        self.emit_event(SyncEvent::UserPartiallySynced {
            user_id: user_id.to_string(),
            playlist_id: target.provider_playlist_id.clone(),
            tracks: tally.tracks_published,
            reason: reason.clone(),
        });
        UserOutcome::Partial { tally, reason }
    }

    /// Return the user's target playlist, creating it provider-side if absent
    async fn ensure_target(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> std::result::Result<TargetPlaylist, Flow> {
        if let Some(target) = self.playlists.get_target(user_id).await? {
            return Ok(target);
        }

        info!(name = %self.config.target_playlist_name, "Creating target playlist");
        let created = self
            .provider
            .create_playlist(
                access_token,
                user_id,
                &self.config.target_playlist_name,
                CREATED_DESCRIPTION,
                self.config.target_playlist_public,
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create target playlist");
                Flow::Skip(format!("target playlist creation failed: {}", e))
            })?;

        let target = TargetPlaylist {
            provider_user_id: user_id.to_string(),
            provider_playlist_id: created.id,
            display_name: created.name,
            last_successful_run: None,
        };
        self.playlists.insert_target(&target).await?;

        self.emit_event(SyncEvent::TargetCreated {
            user_id: user_id.to_string(),
            playlist_id: target.provider_playlist_id.clone(),
        });
        Ok(target)
    }

    /// Fetch one monitored playlist and select its delta
    async fn collect_playlist(
        &self,
        user_id: &str,
        playlist: &MonitoredPlaylist,
        watermark: Option<DateTime<Utc>>,
        started_at: DateTime<Utc>,
    ) -> std::result::Result<DeltaSelection, Flow> {
        let tracks = self
            .fetcher
            .fetch_all_tracks(user_id, &playlist.provider_playlist_id)
            .await?
            .ok_or_else(|| {
                let err = Error::fetch(&playlist.provider_playlist_id, "playlist unavailable");
                Flow::Skip(err.to_string())
            })?;

        let selection = select_delta(tracks, watermark, started_at);
        for track in &selection.dropped {
            warn!(
                playlist = %playlist.display_name,
                track = %track.name,
                artists = %track.artists_display(),
                added_at = %track.added_at_raw,
                "Unparseable added_at, excluding track"
            );
        }
        debug!(
            playlist = %playlist.display_name,
            included = selection.included.len(),
            "Delta selected"
        );

        Ok(selection)
    }

    /// Clear, refill and rename the target playlist
    ///
    /// Any failing step aborts the rewrite; the caller withholds the watermark.
    async fn rewrite_target(
        &self,
        user_id: &str,
        target: &TargetPlaylist,
        track_ids: &[String],
        started_at: DateTime<Utc>,
    ) -> std::result::Result<(), Flow> {
        let access_token = self.tokens.get_valid_access_token(user_id).await?;
        let playlist_id = target.provider_playlist_id.as_str();

        self.provider
            .clear_playlist(&access_token, playlist_id)
            .await
            .map_err(|e| rewrite_failed(user_id, "clear", e))?;

        let batch = self.provider.max_tracks_per_request().max(1);
        for chunk in track_ids.chunks(batch) {
            self.provider
                .add_tracks(&access_token, playlist_id, chunk)
                .await
                .map_err(|e| rewrite_failed(user_id, "add", e))?;
        }

        self.provider
            .update_details(
                &access_token,
                playlist_id,
                &self.config.target_playlist_name,
                &refreshed_description(started_at),
            )
            .await
            .map_err(|e| rewrite_failed(user_id, "rename", e))?;

        Ok(())
    }

    /// Emit a sync event
    fn emit_event(&self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody is listening
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

fn rewrite_failed(user_id: &str, step: &'static str, cause: Error) -> Flow {
    let err = Error::rewrite(user_id, step, cause.to_string());
    error!(error = %err, "Rewrite aborted, watermark withheld");
    Flow::Skip(err.to_string())
}

/// Group monitored playlists by user, keeping first-seen order for both
fn group_by_user(monitored: Vec<MonitoredPlaylist>) -> Vec<(String, Vec<MonitoredPlaylist>)> {
    let mut groups: Vec<(String, Vec<MonitoredPlaylist>)> = Vec::new();
    for playlist in monitored {
        match groups
            .iter_mut()
            .find(|(user, _)| *user == playlist.provider_user_id)
        {
            Some((_, playlists)) => playlists.push(playlist),
            None => groups.push((playlist.provider_user_id.clone(), vec![playlist])),
        }
    }
    groups
}
