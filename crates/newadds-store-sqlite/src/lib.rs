// # SQLite Store
//
// SQLite implementation of `CredentialRepository` and `PlaylistRepository`.
//
// ## Schema
//
// - `users`: one row per provider user, refresh token stored encrypted
// - `monitored_playlists`: unique on `(provider_user_id, provider_playlist_id)`
// - `target_playlist`: unique on `(provider_user_id, provider_playlist_id)`,
//   carries the run watermark
//
// Timestamps are stored as fixed-width RFC 3339 UTC text with millisecond
// precision, so lexical comparison in SQL matches chronological order.
//
// ## Scope
//
// - ✅ Idempotent `CREATE TABLE IF NOT EXISTS` bootstrap
// - ✅ Upserts via `ON CONFLICT`
// - ✅ Monotonic watermark writes enforced in the UPDATE itself
// - ❌ NO versioned migrations

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use newadds_core::model::{CredentialUpsert, MonitoredPlaylist, StoredCredential, TargetPlaylist};
use newadds_core::traits::{CredentialRepository, PlaylistRepository};
use newadds_core::{Error, Result};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::str::FromStr;
use std::time::Duration;

/// Pool size for file-backed databases
const MAX_CONNECTIONS: u32 = 5;

/// How long to wait for a pooled connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        provider_user_id TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL,
        encrypted_refresh_token TEXT NOT NULL,
        access_token TEXT,
        access_token_expiry TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )"#,
    r#"CREATE TABLE IF NOT EXISTS monitored_playlists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        provider_user_id TEXT NOT NULL,
        provider_playlist_id TEXT NOT NULL,
        display_name TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        UNIQUE (provider_user_id, provider_playlist_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS target_playlist (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        provider_user_id TEXT NOT NULL,
        provider_playlist_id TEXT NOT NULL,
        display_name TEXT NOT NULL,
        last_successful_run TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        UNIQUE (provider_user_id, provider_playlist_id)
    )"#,
];

/// SQLite-backed repositories sharing one pool
///
/// Cloning is cheap; clones share the pool.
///
/// # Example
///
/// ```rust,no_run
/// use newadds_store_sqlite::SqliteStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = SqliteStore::connect("sqlite:newadds.db").await?;
///     // hand `Arc::new(store.clone())` to CredentialStore and SyncEngine
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure the schema
    ///
    /// `sqlite::memory:` is supported; the pool is then limited to a single
    /// connection, since every in-memory connection is its own database.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::config(format!("Invalid database URL {}: {}", url, e)))?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { MAX_CONNECTIONS })
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| Error::store(format!("Failed to open database: {}", e)))?;

        let store = Self::from_pool(pool);
        store.ensure_schema().await?;

        tracing::info!("SQLite store ready at {}", url);
        Ok(store)
    }

    /// Wrap an existing pool without touching the schema
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create any missing tables
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;
        }
        Ok(())
    }

    /// The underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn store_error(err: sqlx::Error) -> Error {
    Error::store(err.to_string())
}

/// Fixed-width RFC 3339 text: `2024-05-10T06:00:00.000Z`
fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp, treating an unreadable value as absent
fn decode_timestamp(raw: Option<String>, column: &str, key: &str) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!(
                "Ignoring unreadable {} '{}' for {}: {}",
                column,
                raw,
                key,
                e
            );
            None
        }
    }
}

fn credential_from_row(row: &SqliteRow) -> Result<StoredCredential> {
    let provider_user_id: String = row.try_get("provider_user_id").map_err(store_error)?;
    let expiry = decode_timestamp(
        row.try_get("access_token_expiry").map_err(store_error)?,
        "access_token_expiry",
        &provider_user_id,
    );

    Ok(StoredCredential {
        internal_id: row.try_get("id").map_err(store_error)?,
        email: row.try_get("email").map_err(store_error)?,
        encrypted_refresh_token: row.try_get("encrypted_refresh_token").map_err(store_error)?,
        last_known_access_token: row.try_get("access_token").map_err(store_error)?,
        access_token_expiry: expiry,
        provider_user_id,
    })
}

#[async_trait]
impl CredentialRepository for SqliteStore {
    async fn upsert_credential(&self, credential: &CredentialUpsert) -> Result<StoredCredential> {
        let row = sqlx::query(
            r#"INSERT INTO users
                   (provider_user_id, email, encrypted_refresh_token, access_token, access_token_expiry)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (provider_user_id) DO UPDATE SET
                   email = excluded.email,
                   encrypted_refresh_token = excluded.encrypted_refresh_token,
                   access_token = excluded.access_token,
                   access_token_expiry = excluded.access_token_expiry,
                   updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               RETURNING id, provider_user_id, email, encrypted_refresh_token,
                         access_token, access_token_expiry"#,
        )
        .bind(&credential.provider_user_id)
        .bind(&credential.email)
        .bind(&credential.encrypted_refresh_token)
        .bind(&credential.access_token)
        .bind(credential.access_token_expiry.map(encode_timestamp))
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        credential_from_row(&row)
    }

    async fn find_credential(&self, provider_user_id: &str) -> Result<Option<StoredCredential>> {
        let row = sqlx::query(
            r#"SELECT id, provider_user_id, email, encrypted_refresh_token,
                      access_token, access_token_expiry
               FROM users WHERE provider_user_id = ?"#,
        )
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(credential_from_row).transpose()
    }

    async fn update_expiry(&self, provider_user_id: &str, expiry: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"UPDATE users
               SET access_token_expiry = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               WHERE provider_user_id = ?"#,
        )
        .bind(encode_timestamp(expiry))
        .bind(provider_user_id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }
}

#[async_trait]
impl PlaylistRepository for SqliteStore {
    async fn list_active_monitored(&self) -> Result<Vec<MonitoredPlaylist>> {
        let rows = sqlx::query(
            r#"SELECT provider_user_id, provider_playlist_id, display_name, is_active
               FROM monitored_playlists
               WHERE is_active = 1
               ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter()
            .map(|row| {
                Ok(MonitoredPlaylist {
                    provider_user_id: row.try_get("provider_user_id").map_err(store_error)?,
                    provider_playlist_id: row
                        .try_get("provider_playlist_id")
                        .map_err(store_error)?,
                    display_name: row.try_get("display_name").map_err(store_error)?,
                    is_active: row.try_get("is_active").map_err(store_error)?,
                })
            })
            .collect()
    }

    async fn upsert_monitored(&self, playlist: &MonitoredPlaylist) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO monitored_playlists
                   (provider_user_id, provider_playlist_id, display_name, is_active)
               VALUES (?, ?, ?, 1)
               ON CONFLICT (provider_user_id, provider_playlist_id) DO UPDATE SET
                   display_name = excluded.display_name,
                   is_active = 1"#,
        )
        .bind(&playlist.provider_user_id)
        .bind(&playlist.provider_playlist_id)
        .bind(&playlist.display_name)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn set_monitored_active(
        &self,
        provider_user_id: &str,
        provider_playlist_id: &str,
        is_active: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE monitored_playlists SET is_active = ?
               WHERE provider_user_id = ? AND provider_playlist_id = ?"#,
        )
        .bind(is_active)
        .bind(provider_user_id)
        .bind(provider_playlist_id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_target(&self, provider_user_id: &str) -> Result<Option<TargetPlaylist>> {
        // Latest mapping wins if a user was ever given a second target
        let row = sqlx::query(
            r#"SELECT provider_user_id, provider_playlist_id, display_name, last_successful_run
               FROM target_playlist
               WHERE provider_user_id = ?
               ORDER BY id DESC
               LIMIT 1"#,
        )
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let watermark = decode_timestamp(
            row.try_get("last_successful_run").map_err(store_error)?,
            "last_successful_run",
            provider_user_id,
        );

        Ok(Some(TargetPlaylist {
            provider_user_id: row.try_get("provider_user_id").map_err(store_error)?,
            provider_playlist_id: row.try_get("provider_playlist_id").map_err(store_error)?,
            display_name: row.try_get("display_name").map_err(store_error)?,
            last_successful_run: watermark,
        }))
    }

    async fn insert_target(&self, target: &TargetPlaylist) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO target_playlist
                   (provider_user_id, provider_playlist_id, display_name, last_successful_run)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (provider_user_id, provider_playlist_id) DO UPDATE SET
                   display_name = excluded.display_name"#,
        )
        .bind(&target.provider_user_id)
        .bind(&target.provider_playlist_id)
        .bind(&target.display_name)
        .bind(target.last_successful_run.map(encode_timestamp))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn advance_watermark(
        &self,
        provider_user_id: &str,
        provider_playlist_id: &str,
        watermark: DateTime<Utc>,
    ) -> Result<bool> {
        // A value SQLite cannot read as a date reads back as no watermark,
        // so it is overwritten like one
        let result = sqlx::query(
            r#"UPDATE target_playlist SET last_successful_run = ?1
               WHERE provider_user_id = ?2 AND provider_playlist_id = ?3
                 AND (last_successful_run IS NULL
                      OR julianday(last_successful_run) IS NULL
                      OR last_successful_run < ?1)"#,
        )
        .bind(encode_timestamp(watermark))
        .bind(provider_user_id)
        .bind(provider_playlist_id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }
}
