// # Spotify Provider
//
// This crate provides the Spotify Web API implementation of `MusicProvider`.
//
// ## Scope
//
// - ✅ One HTTP request per trait call
// - ✅ Full error propagation (skip and retry decisions belong to the engine)
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Specific handling of 401, 403, 404, 429 (with Retry-After) and 5xx
// - ✅ Dry-run mode for safe testing
// - ❌ NO retry or backoff (the next scheduled run retries)
// - ❌ NO token caching (owned by `TokenManager`)
// - ❌ NO store access
//
// ## Security Requirements
//
// - Client secret and tokens NEVER appear in logs
// - Construction fails if client ID or secret is empty
//
// ## API Reference
//
// - Token: POST `https://accounts.spotify.com/api/token` (Basic client auth, form body)
// - Profile: GET `/v1/me`
// - Playlist: GET `/v1/playlists/{id}`, PUT `/v1/playlists/{id}`
// - Items: GET/PUT/POST `/v1/playlists/{id}/tracks`
// - Create: POST `/v1/users/{user_id}/playlists`

use async_trait::async_trait;
use newadds_core::config::ProviderConfig;
use newadds_core::model::{
    EntryTrack, PlaylistEntry, PlaylistInfo, TokenGrant, TrackPage, UserProfile,
};
use newadds_core::traits::{MusicProvider, PageError};
use newadds_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Spotify Web API base URL
pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

/// Spotify accounts service base URL
pub const SPOTIFY_ACCOUNTS_BASE: &str = "https://accounts.spotify.com";

/// Scopes requested by the authorization-code flow
pub const SCOPES: &str = "user-read-private user-read-email playlist-read-private playlist-modify-public playlist-modify-private";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Items requested per playlist page
const PAGE_LIMIT: usize = 100;

/// Largest number of URIs accepted by one add request
const MAX_TRACKS_PER_REQUEST: usize = 100;

/// Spotify provider
///
/// Stateless and single-shot: every method issues one request and maps the
/// response. Token caching, skipping and retry belong to the core.
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the provider will:
/// - Perform all reads and token requests
/// - Log the intended payload of every write
/// - **NOT** modify any playlist
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the client secret.
pub struct SpotifyProvider {
    /// OAuth client ID
    client_id: String,

    /// OAuth client secret
    /// ⚠️ NEVER log this value
    client_secret: String,

    /// Redirect URI for the authorization-code flow
    redirect_uri: Option<String>,

    /// Web API base URL
    api_base: String,

    /// Accounts service base URL
    accounts_base: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Dry-run mode: if true, perform reads but only log writes
    dry_run: bool,
}

// Custom Debug implementation that hides the client secret
impl std::fmt::Debug for SpotifyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyProvider")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("redirect_uri", &self.redirect_uri)
            .field("api_base", &self.api_base)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl SpotifyProvider {
    /// Create a new Spotify provider
    ///
    /// # Parameters
    ///
    /// - `client_id` / `client_secret`: application credentials
    /// - `redirect_uri`: required only for [`exchange_code`](MusicProvider::exchange_code)
    /// - `dry_run`: if true, log writes instead of performing them
    ///
    /// # Errors
    ///
    /// `Error::Config` if either credential is empty or the HTTP client
    /// cannot be built.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Option<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();

        if client_id.is_empty() {
            return Err(Error::config("Spotify client ID cannot be empty"));
        }
        if client_secret.is_empty() {
            return Err(Error::config("Spotify client secret cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            api_base: SPOTIFY_API_BASE.to_string(),
            accounts_base: SPOTIFY_ACCOUNTS_BASE.to_string(),
            client,
            dry_run,
        })
    }

    /// Create a provider from configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        match config {
            ProviderConfig::Spotify {
                client_id,
                client_secret,
                redirect_uri,
                dry_run,
            } => {
                if *dry_run {
                    tracing::warn!(
                        "Spotify provider running in DRY-RUN mode - no playlists will be modified"
                    );
                }
                Self::new(
                    client_id.clone(),
                    client_secret.clone(),
                    redirect_uri.clone(),
                    *dry_run,
                )
            }
        }
    }

    /// Point the provider at different base URLs (local test servers)
    pub fn with_base_urls(
        mut self,
        api_base: impl Into<String>,
        accounts_base: impl Into<String>,
    ) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.accounts_base = accounts_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the URL a user visits to grant access
    ///
    /// `state` is echoed back on the redirect and must be checked by the caller.
    pub fn authorization_url(&self, state: &str) -> Result<String> {
        let redirect_uri = self.redirect_uri.as_deref().ok_or_else(|| {
            Error::config("Spotify redirect URI is required for authorization")
        })?;

        let url = reqwest::Url::parse_with_params(
            &format!("{}/authorize", self.accounts_base),
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("scope", SCOPES),
                ("redirect_uri", redirect_uri),
                ("state", state),
            ],
        )
        .map_err(|e| Error::config(format!("Invalid accounts URL: {}", e)))?;

        Ok(url.to_string())
    }

    /// POST a grant to the token endpoint
    ///
    /// ```http
    /// POST /api/token
    /// Authorization: Basic <client_id:client_secret>
    /// Content-Type: application/x-www-form-urlencoded
    /// ```
    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let url = format!("{}/api/token", self.accounts_base);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| Error::provider("spotify", format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(token_error(status, &body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::provider("spotify", format!("Failed to parse token response: {}", e)))?;

        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: Duration::from_secs(token.expires_in),
        })
    }

    /// Send a write request, or log it in dry-run mode
    async fn write(
        &self,
        operation: &str,
        method: reqwest::Method,
        url: &str,
        access_token: &str,
        payload: serde_json::Value,
    ) -> Result<Option<reqwest::Response>> {
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send {} {} ({}) with payload: {}",
                method,
                url,
                operation,
                payload
            );
            return Ok(None);
        }

        let response = self
            .client
            .request(method, url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::provider("spotify", format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(api_error(operation, status, &body));
        }

        Ok(Some(response))
    }

    /// GET a JSON resource
    async fn read<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        access_token: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::provider("spotify", format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(api_error(operation, status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| Error::provider("spotify", format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl MusicProvider for SpotifyProvider {
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        tracing::debug!("Requesting access token with refresh_token grant");
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        let redirect_uri = self.redirect_uri.as_deref().ok_or_else(|| {
            Error::config("Spotify redirect URI is required for code exchange")
        })?;

        tracing::debug!("Exchanging authorization code");
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn current_user_profile(&self, access_token: &str) -> Result<UserProfile> {
        let url = format!("{}/me", self.api_base);
        self.read("get user profile", &url, access_token).await
    }

    /// Fetch one page of playlist items
    ///
    /// ```http
    /// GET /playlists/:id/tracks?limit=100
    /// Authorization: Bearer <token>
    /// ```
    ///
    /// Later pages use the `next` URL returned by the previous page verbatim.
    async fn fetch_playlist_page(
        &self,
        access_token: &str,
        playlist_id: &str,
        cursor: Option<&str>,
    ) -> std::result::Result<TrackPage, PageError> {
        let url = match cursor {
            Some(next) => next.to_string(),
            None => format!(
                "{}/playlists/{}/tracks?limit={}",
                self.api_base, playlist_id, PAGE_LIMIT
            ),
        };

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| PageError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(classify_status(status.as_u16(), retry_after));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PageError::Transport(e.to_string()))?;
        parse_page(&body)
    }

    async fn get_playlist(&self, access_token: &str, playlist_id: &str) -> Result<PlaylistInfo> {
        let url = format!("{}/playlists/{}?fields=id,name", self.api_base, playlist_id);
        self.read("get playlist", &url, access_token).await
    }

    async fn create_playlist(
        &self,
        access_token: &str,
        user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<PlaylistInfo> {
        let url = format!("{}/users/{}/playlists", self.api_base, user_id);
        let payload = serde_json::json!({
            "name": name,
            "description": description,
            "public": public,
        });

        let response = self
            .write("create playlist", reqwest::Method::POST, &url, access_token, payload)
            .await?;

        match response {
            Some(response) => response.json().await.map_err(|e| {
                Error::provider("spotify", format!("Failed to parse response: {}", e))
            }),
            // Nothing was created, so there is no id to hand back
            None => Err(Error::provider(
                "spotify",
                "dry-run mode: target playlist not created",
            )),
        }
    }

    async fn clear_playlist(&self, access_token: &str, playlist_id: &str) -> Result<()> {
        let url = format!("{}/playlists/{}/tracks", self.api_base, playlist_id);
        self.write(
            "clear playlist",
            reqwest::Method::PUT,
            &url,
            access_token,
            serde_json::json!({ "uris": [] }),
        )
        .await?;
        Ok(())
    }

    async fn add_tracks(
        &self,
        access_token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<()> {
        if track_ids.len() > MAX_TRACKS_PER_REQUEST {
            return Err(Error::provider(
                "spotify",
                format!(
                    "At most {} tracks per request, got {}",
                    MAX_TRACKS_PER_REQUEST,
                    track_ids.len()
                ),
            ));
        }

        let url = format!("{}/playlists/{}/tracks", self.api_base, playlist_id);
        let uris: Vec<String> = track_ids.iter().map(|id| track_uri(id)).collect();
        self.write(
            "add tracks",
            reqwest::Method::POST,
            &url,
            access_token,
            serde_json::json!({ "uris": uris }),
        )
        .await?;

        tracing::debug!("Added {} tracks to playlist {}", track_ids.len(), playlist_id);
        Ok(())
    }

    async fn update_details(
        &self,
        access_token: &str,
        playlist_id: &str,
        name: &str,
        description: &str,
    ) -> Result<()> {
        let url = format!("{}/playlists/{}", self.api_base, playlist_id);
        self.write(
            "update playlist details",
            reqwest::Method::PUT,
            &url,
            access_token,
            serde_json::json!({ "name": name, "description": description }),
        )
        .await?;
        Ok(())
    }

    fn max_tracks_per_request(&self) -> usize {
        MAX_TRACKS_PER_REQUEST
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }

    fn provider_name(&self) -> &'static str {
        "spotify"
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(default)]
    items: Vec<RawItem>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(default)]
    added_at: Option<String>,
    #[serde(default)]
    track: Option<RawTrack>,
}

#[derive(Deserialize)]
struct RawTrack {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artists: Vec<RawArtist>,
}

#[derive(Deserialize)]
struct RawArtist {
    #[serde(default)]
    name: String,
}

/// Parse a playlist items page into the core representation
pub fn parse_page(body: &str) -> std::result::Result<TrackPage, PageError> {
    let raw: RawPage =
        serde_json::from_str(body).map_err(|e| PageError::Malformed(e.to_string()))?;

    let entries = raw
        .items
        .into_iter()
        .map(|item| PlaylistEntry {
            track: item.track.map(|t| EntryTrack {
                id: t.id,
                name: t.name,
                artists: t.artists.into_iter().map(|a| a.name).collect(),
            }),
            added_at: item.added_at.unwrap_or_default(),
        })
        .collect();

    Ok(TrackPage {
        entries,
        next: raw.next,
    })
}

/// Map a non-success page status to a [`PageError`]
pub fn classify_status(status: u16, retry_after: Option<Duration>) -> PageError {
    match status {
        401 => PageError::Unauthorized,
        403 => PageError::Forbidden,
        404 => PageError::NotFound,
        429 => PageError::RateLimited { retry_after },
        other => PageError::Status(other),
    }
}

/// Parse a `Retry-After` header given in seconds
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Spotify URI of a track id
pub fn track_uri(track_id: &str) -> String {
    format!("spotify:track:{}", track_id)
}

/// Map a token endpoint failure
///
/// 400 with `invalid_grant` means the refresh token was revoked or expired
/// and the user has to authorize again.
fn token_error(status: u16, body: &str) -> Error {
    match status {
        400 if body.contains("invalid_grant") => Error::provider(
            "spotify",
            "Refresh token rejected (invalid_grant): user must re-authorize",
        ),
        401 => Error::provider(
            "spotify",
            format!("Client authentication failed: check client ID and secret. Status: {}", status),
        ),
        429 => Error::provider(
            "spotify",
            format!("Rate limit exceeded. Please retry later. Status: {}", status),
        ),
        500..=599 => Error::provider(
            "spotify",
            format!("Spotify server error (transient): {} - {}", status, body),
        ),
        _ => Error::provider("spotify", format!("Token request failed: {} - {}", status, body)),
    }
}

/// Map a Web API failure for a named operation
fn api_error(operation: &str, status: u16, body: &str) -> Error {
    match status {
        401 => Error::provider(
            "spotify",
            format!("Access token rejected during {}. Status: {}", operation, status),
        ),
        403 => Error::provider(
            "spotify",
            format!("Insufficient permissions for {}. Status: {}", operation, status),
        ),
        404 => Error::not_found(format!("{}: resource not found", operation)),
        429 => Error::provider(
            "spotify",
            format!("Rate limit exceeded during {}. Please retry later.", operation),
        ),
        500..=599 => Error::provider(
            "spotify",
            format!("Spotify server error (transient) during {}: {} - {}", operation, status, body),
        ),
        _ => Error::provider(
            "spotify",
            format!("{} failed: {} - {}", operation, status, body),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(dry_run: bool) -> SpotifyProvider {
        SpotifyProvider::new(
            "client-id",
            "secret_value_12345",
            Some("http://127.0.0.1:8888/callback".to_string()),
            dry_run,
        )
        .unwrap()
    }

    #[test]
    fn test_from_config() {
        let config = ProviderConfig::Spotify {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: None,
            dry_run: true,
        };

        let provider = SpotifyProvider::from_config(&config).unwrap();
        assert!(provider.dry_run());
        assert_eq!(provider.provider_name(), "spotify");
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(SpotifyProvider::new("", "secret", None, false).is_err());
        assert!(SpotifyProvider::new("client", "", None, false).is_err());
    }

    #[test]
    fn test_secret_not_exposed_in_debug() {
        let debug_str = format!("{:?}", provider(false));
        assert!(!debug_str.contains("secret_value_12345"));
        assert!(debug_str.contains("SpotifyProvider"));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(401, None), PageError::Unauthorized);
        assert_eq!(classify_status(403, None), PageError::Forbidden);
        assert_eq!(classify_status(404, None), PageError::NotFound);
        assert_eq!(
            classify_status(429, Some(Duration::from_secs(7))),
            PageError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
        assert_eq!(classify_status(502, None), PageError::Status(502));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_parse_page() {
        let body = r#"{
            "items": [
                {
                    "added_at": "2024-05-01T12:00:00Z",
                    "track": {
                        "id": "abc",
                        "name": "Song",
                        "artists": [{"name": "One"}, {"name": "Two"}]
                    }
                },
                { "added_at": "2024-05-02T12:00:00Z", "track": null },
                {
                    "added_at": "2024-05-03T12:00:00Z",
                    "track": { "id": null, "name": "Local file", "artists": [] }
                }
            ],
            "next": "https://api.spotify.com/v1/playlists/p1/tracks?offset=100&limit=100"
        }"#;

        let page = parse_page(body).unwrap();
        assert_eq!(page.entries.len(), 3);

        let first = page.entries[0].track.as_ref().unwrap();
        assert_eq!(first.id.as_deref(), Some("abc"));
        assert_eq!(first.artists, vec!["One".to_string(), "Two".to_string()]);
        assert!(page.entries[1].track.is_none());
        assert!(page.entries[2].track.as_ref().unwrap().id.is_none());
        assert_eq!(
            page.next.as_deref(),
            Some("https://api.spotify.com/v1/playlists/p1/tracks?offset=100&limit=100")
        );
    }

    #[test]
    fn test_parse_last_page() {
        let page = parse_page(r#"{"items": [], "next": null}"#).unwrap();
        assert!(page.entries.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn test_malformed_page() {
        assert!(matches!(parse_page("<html>"), Err(PageError::Malformed(_))));
    }

    #[test]
    fn test_track_uri() {
        assert_eq!(track_uri("4uLU6hMCjMI75M1A2tKUQC"), "spotify:track:4uLU6hMCjMI75M1A2tKUQC");
    }

    #[test]
    fn test_authorization_url() {
        let url = provider(false).authorization_url("xyz").unwrap();
        assert!(url.starts_with("https://accounts.spotify.com/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("playlist-modify-private"));

        let no_redirect = SpotifyProvider::new("client", "secret", None, false).unwrap();
        assert!(no_redirect.authorization_url("xyz").is_err());
    }

    #[test]
    fn test_invalid_grant_is_explicit() {
        let err = token_error(400, r#"{"error":"invalid_grant"}"#);
        assert!(err.to_string().contains("re-authorize"));
    }

    #[test]
    fn test_base_urls_trimmed() {
        let provider = provider(false).with_base_urls("http://localhost:9000/v1/", "http://localhost:9001/");
        assert_eq!(provider.api_base, "http://localhost:9000/v1");
        assert_eq!(provider.accounts_base, "http://localhost:9001");
    }

    #[tokio::test]
    async fn test_dry_run_writes_make_no_requests() {
        // Unroutable base: any real request would fail
        let provider = provider(true).with_base_urls("http://127.0.0.1:9", "http://127.0.0.1:9");

        provider.clear_playlist("token", "p1").await.unwrap();
        provider
            .add_tracks("token", "p1", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        provider
            .update_details("token", "p1", "New Adds", "desc")
            .await
            .unwrap();
        assert!(
            provider
                .create_playlist("token", "alice", "New Adds", "desc", true)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_oversized_add_rejected() {
        let provider = provider(true);
        let ids: Vec<String> = (0..101).map(|i| i.to_string()).collect();
        assert!(provider.add_tracks("token", "p1", &ids).await.is_err());
    }
}
