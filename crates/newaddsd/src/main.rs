// # newaddsd - New Adds Daemon
//
// Thin run-once binary, meant to be invoked by an external scheduler
// (cron, systemd timer).
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Wiring the store, codec, provider, token manager and engine
// 4. Running exactly one sync cycle and reporting it through the exit status
//
// All aggregation logic lives in newadds-core.
//
// ## Configuration
//
// ### Store
// - `NEWADDS_DATABASE_URL`: SQLite URL, e.g. `sqlite:/var/lib/newadds/newadds.db` (required)
//
// ### Crypto
// - `NEWADDS_ENCRYPTION_KEY`: refresh-token encryption secret, at least 32 chars (required)
//
// ### Provider
// - `NEWADDS_SPOTIFY_CLIENT_ID`: OAuth client ID (required)
// - `NEWADDS_SPOTIFY_CLIENT_SECRET`: OAuth client secret (required)
// - `NEWADDS_SPOTIFY_REDIRECT_URI`: redirect URI (optional)
// - `NEWADDS_DRY_RUN`: log playlist writes instead of performing them
//
// ### Engine
// - `NEWADDS_TARGET_PLAYLIST_NAME`: name of the managed playlist (default "New Adds")
// - `NEWADDS_MAX_CONCURRENT_USERS`: users synchronized in parallel, 1..=32 (default 4)
// - `NEWADDS_TOKEN_REFRESH_SKEW_SECS`: early-expiry margin, 0..=600 (default 60)
// - `NEWADDS_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export NEWADDS_DATABASE_URL=sqlite:/var/lib/newadds/newadds.db
// export NEWADDS_ENCRYPTION_KEY=$(openssl rand -hex 32)
// export NEWADDS_SPOTIFY_CLIENT_ID=your_client_id
// export NEWADDS_SPOTIFY_CLIENT_SECRET=your_client_secret
//
// newaddsd
// ```

use anyhow::{Context, Result};
use newadds_core::config::{
    CryptoConfig, EngineConfig, FetchConfig, NewaddsConfig, ProviderConfig, StoreConfig,
    TokenConfig,
};
use newadds_core::traits::{CredentialRepository, MusicProvider, PlaylistRepository};
use newadds_core::{CredentialStore, SyncEngine, SyncEvent, TokenCodec, TokenManager};
use newadds_provider_spotify::SpotifyProvider;
use newadds_store_sqlite::SqliteStore;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
///
/// - 0: The monitored set was read (individual users may have been skipped)
/// - 1: Configuration or startup error
/// - 2: Fatal run error (monitored playlists unreadable)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NewaddsExitCode {
    /// Run completed
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// The run was aborted
    RunError = 2,
}

impl From<NewaddsExitCode> for ExitCode {
    fn from(code: NewaddsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration, as read from the environment
struct Config {
    database_url: String,
    encryption_key: String,
    client_id: String,
    client_secret: String,
    redirect_uri: Option<String>,
    target_playlist_name: Option<String>,
    max_concurrent_users: Option<usize>,
    refresh_skew_secs: Option<u64>,
    dry_run: bool,
    log_level: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("encryption_key", &"<REDACTED>")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("redirect_uri", &self.redirect_uri)
            .field("target_playlist_name", &self.target_playlist_name)
            .field("max_concurrent_users", &self.max_concurrent_users)
            .field("refresh_skew_secs", &self.refresh_skew_secs)
            .field("dry_run", &self.dry_run)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through a variable lookup
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("{} is required. Set it via: export {}=...", key, key))
        };

        Ok(Self {
            database_url: required("NEWADDS_DATABASE_URL")?,
            encryption_key: required("NEWADDS_ENCRYPTION_KEY")?,
            client_id: required("NEWADDS_SPOTIFY_CLIENT_ID")?,
            client_secret: required("NEWADDS_SPOTIFY_CLIENT_SECRET")?,
            redirect_uri: lookup("NEWADDS_SPOTIFY_REDIRECT_URI").filter(|v| !v.is_empty()),
            target_playlist_name: lookup("NEWADDS_TARGET_PLAYLIST_NAME"),
            max_concurrent_users: parse_optional(&lookup, "NEWADDS_MAX_CONCURRENT_USERS")?,
            refresh_skew_secs: parse_optional(&lookup, "NEWADDS_TOKEN_REFRESH_SKEW_SECS")?,
            dry_run: lookup("NEWADDS_DRY_RUN")
                .map(|v| parse_flag(&v))
                .transpose()?
                .unwrap_or(false),
            log_level: lookup("NEWADDS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the values the core configuration does not check
    fn validate(&self) -> Result<()> {
        if let Some(users) = self.max_concurrent_users
            && !(1..=32).contains(&users)
        {
            anyhow::bail!(
                "NEWADDS_MAX_CONCURRENT_USERS must be between 1 and 32. Got: {}",
                users
            );
        }

        // Check for obvious placeholder credentials (common mistake)
        for (key, value) in [
            ("NEWADDS_SPOTIFY_CLIENT_ID", &self.client_id),
            ("NEWADDS_SPOTIFY_CLIENT_SECRET", &self.client_secret),
        ] {
            let lower = value.to_lowercase();
            if lower.starts_with("your_") || lower.contains("replace_me") {
                anyhow::bail!(
                    "{} appears to be a placeholder. \
                    Use the credentials from your Spotify developer dashboard.",
                    key
                );
            }
        }

        if let Some(ref uri) = self.redirect_uri
            && !uri.starts_with("https://")
            && !uri.starts_with("http://")
        {
            anyhow::bail!(
                "NEWADDS_SPOTIFY_REDIRECT_URI must use HTTP or HTTPS scheme. Got: {}",
                uri
            );
        }

        parse_level(&self.log_level)?;
        Ok(())
    }

    /// Build the core configuration and validate it
    fn to_core(&self) -> Result<NewaddsConfig> {
        let mut engine = EngineConfig::default();
        if let Some(ref name) = self.target_playlist_name {
            engine.target_playlist_name = name.clone();
        }
        if let Some(users) = self.max_concurrent_users {
            engine.max_concurrent_users = users;
        }

        let mut token = TokenConfig::default();
        if let Some(skew) = self.refresh_skew_secs {
            token.refresh_skew_secs = skew;
        }

        let config = NewaddsConfig {
            provider: ProviderConfig::Spotify {
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
                redirect_uri: self.redirect_uri.clone(),
                dry_run: self.dry_run,
            },
            store: StoreConfig::Sqlite {
                url: self.database_url.clone(),
            },
            crypto: CryptoConfig {
                encryption_key: self.encryption_key.clone(),
            },
            engine,
            token,
            fetch: FetchConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_optional<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} is not a valid number ({}). Got: {}", key, e, raw)),
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => anyhow::bail!("NEWADDS_DRY_RUN must be true or false. Got: {}", raw),
    }
}

fn parse_level(raw: &str) -> Result<Level> {
    match raw.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "NEWADDS_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            raw
        ),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return NewaddsExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return NewaddsExitCode::ConfigError.into();
    }

    let core_config = match config.to_core() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration validation error: {}", e);
            return NewaddsExitCode::ConfigError.into();
        }
    };

    // Initialize tracing
    let log_level = parse_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return NewaddsExitCode::ConfigError.into();
    }

    info!("Starting newaddsd");
    debug!("Configuration loaded: {:?}", config);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return NewaddsExitCode::ConfigError.into();
        }
    };

    let code = rt.block_on(async {
        match run_daemon(core_config).await {
            Ok(code) => code,
            Err(e) => {
                error!("Startup error: {:#}", e);
                NewaddsExitCode::ConfigError
            }
        }
    });

    code.into()
}

/// Wire the components and run one sync cycle
///
/// Startup failures are returned as errors; the outcome of the run itself is
/// returned as an exit code.
async fn run_daemon(config: NewaddsConfig) -> Result<NewaddsExitCode> {
    let StoreConfig::Sqlite { url } = &config.store;
    let store = SqliteStore::connect(url)
        .await
        .context("Failed to open the SQLite store")?;
    let credentials: Arc<dyn CredentialRepository> = Arc::new(store.clone());
    let playlists: Arc<dyn PlaylistRepository> = Arc::new(store);

    let codec = TokenCodec::new(config.crypto.encryption_key.clone())
        .context("Failed to initialize the token codec")?;
    let credential_store = CredentialStore::new(codec, credentials);

    let provider: Arc<dyn MusicProvider> = Arc::new(
        SpotifyProvider::from_config(&config.provider)
            .context("Failed to create the Spotify provider")?,
    );
    info!(
        "Provider: {}{}",
        provider.provider_name(),
        if provider.dry_run() { " (dry-run)" } else { "" }
    );

    let tokens = Arc::new(TokenManager::new(
        provider.clone(),
        credential_store,
        &config.token,
    ));

    let (engine, mut events) =
        SyncEngine::new(provider, tokens, playlists, config.engine, &config.fetch)
            .context("Failed to create the sync engine")?;

    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let result = engine.run_once().await;

    // Closing the sender lets the logger drain and finish
    drop(engine);
    if let Err(e) = logger.await {
        warn!("Event logger task failed: {}", e);
    }

    match result {
        Ok(report) => {
            info!(
                "Run complete: {} user(s) synced, {} partial, {} skipped, {} track(s) published",
                report.users_synced,
                report.users_partial,
                report.users_skipped,
                report.tracks_published
            );
            Ok(NewaddsExitCode::Success)
        }
        Err(e) => {
            error!("Run aborted: {}", e);
            Ok(NewaddsExitCode::RunError)
        }
    }
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::RunStarted {
            users, playlists, ..
        } => debug!("Run started: {} user(s), {} playlist(s)", users, playlists),
        SyncEvent::TargetCreated {
            user_id,
            playlist_id,
        } => info!("Created target playlist {} for {}", playlist_id, user_id),
        SyncEvent::PlaylistSkipped {
            user_id,
            playlist_id,
            reason,
        } => warn!("Skipped playlist {} of {}: {}", playlist_id, user_id, reason),
        SyncEvent::DuplicateDropped {
            user_id,
            track_id,
            kept_from,
            dropped_from,
        } => debug!(
            "Duplicate {} for {}: kept from '{}', dropped from '{}'",
            track_id, user_id, kept_from.playlist_name, dropped_from.playlist_name
        ),
        SyncEvent::UserSkipped { user_id, reason } => {
            warn!("Skipped user {}: {}", user_id, reason)
        }
        SyncEvent::UserSynced {
            user_id,
            tracks,
            watermark,
            ..
        } => info!(
            "Synced {}: {} track(s), watermark {}",
            user_id, tracks, watermark
        ),
        SyncEvent::UserPartiallySynced {
            user_id,
            tracks,
            reason,
            ..
        } => warn!(
            "Refreshed {} with {} track(s), watermark withheld: {}",
            user_id, tracks, reason
        ),
        SyncEvent::RunFinished { report } => debug!("Run finished: {:?}", report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, String> {
        HashMap::from([
            ("NEWADDS_DATABASE_URL", "sqlite::memory:".to_string()),
            (
                "NEWADDS_ENCRYPTION_KEY",
                "0123456789abcdef0123456789abcdef".to_string(),
            ),
            ("NEWADDS_SPOTIFY_CLIENT_ID", "client".to_string()),
            ("NEWADDS_SPOTIFY_CLIENT_SECRET", "secret".to_string()),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<Config> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_minimal_config() {
        let config = load(&base()).unwrap();
        config.validate().unwrap();

        let core = config.to_core().unwrap();
        assert_eq!(core.engine.target_playlist_name, "New Adds");
        assert_eq!(core.engine.max_concurrent_users, 4);
        assert_eq!(core.token.refresh_skew_secs, 60);
        assert!(matches!(
            core.provider,
            ProviderConfig::Spotify { dry_run: false, .. }
        ));
    }

    #[test]
    fn test_missing_required_variable() {
        for key in [
            "NEWADDS_DATABASE_URL",
            "NEWADDS_ENCRYPTION_KEY",
            "NEWADDS_SPOTIFY_CLIENT_ID",
            "NEWADDS_SPOTIFY_CLIENT_SECRET",
        ] {
            let mut vars = base();
            vars.remove(key);
            let err = load(&vars).unwrap_err();
            assert!(err.to_string().contains(key));
        }
    }

    #[test]
    fn test_overrides() {
        let mut vars = base();
        vars.insert("NEWADDS_TARGET_PLAYLIST_NAME", "Fresh".to_string());
        vars.insert("NEWADDS_MAX_CONCURRENT_USERS", "8".to_string());
        vars.insert("NEWADDS_TOKEN_REFRESH_SKEW_SECS", "120".to_string());
        vars.insert("NEWADDS_DRY_RUN", "true".to_string());

        let core = load(&vars).unwrap().to_core().unwrap();
        assert_eq!(core.engine.target_playlist_name, "Fresh");
        assert_eq!(core.engine.max_concurrent_users, 8);
        assert_eq!(core.token.refresh_skew_secs, 120);
        assert!(matches!(
            core.provider,
            ProviderConfig::Spotify { dry_run: true, .. }
        ));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let mut vars = base();
        vars.insert("NEWADDS_MAX_CONCURRENT_USERS", "64".to_string());
        assert!(load(&vars).unwrap().validate().is_err());

        let mut vars = base();
        vars.insert("NEWADDS_TOKEN_REFRESH_SKEW_SECS", "900".to_string());
        assert!(load(&vars).unwrap().to_core().is_err());

        let mut vars = base();
        vars.insert("NEWADDS_MAX_CONCURRENT_USERS", "many".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_short_encryption_key_rejected() {
        let mut vars = base();
        vars.insert("NEWADDS_ENCRYPTION_KEY", "short".to_string());
        assert!(load(&vars).unwrap().to_core().is_err());
    }

    #[test]
    fn test_non_sqlite_url_rejected() {
        let mut vars = base();
        vars.insert("NEWADDS_DATABASE_URL", "mysql://localhost/newadds".to_string());
        assert!(load(&vars).unwrap().to_core().is_err());
    }

    #[test]
    fn test_placeholder_credentials_rejected() {
        let mut vars = base();
        vars.insert("NEWADDS_SPOTIFY_CLIENT_SECRET", "your_client_secret".to_string());
        assert!(load(&vars).unwrap().validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut vars = base();
        vars.insert("NEWADDS_LOG_LEVEL", "verbose".to_string());
        assert!(load(&vars).unwrap().validate().is_err());
        assert_eq!(parse_level("DEBUG").unwrap(), Level::DEBUG);
    }

    #[test]
    fn test_dry_run_flag_parsing() {
        assert!(parse_flag("1").unwrap());
        assert!(parse_flag("Yes").unwrap());
        assert!(!parse_flag("false").unwrap());
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn test_secrets_not_exposed_in_debug() {
        let config = load(&base()).unwrap();
        let debug_str = format!("{:?}", config);
        assert!(!debug_str.contains("0123456789abcdef"));
        assert!(!debug_str.contains("\"secret\""));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(NewaddsExitCode::Success as u8, 0);
        assert_eq!(NewaddsExitCode::ConfigError as u8, 1);
        assert_eq!(NewaddsExitCode::RunError as u8, 2);
    }
}
