//! OAuth access tokens for the YouTube Data API.
//!
//! Reads an authorized-user `token.json` (the format Google's client
//! libraries write after the consent flow), refreshes the access token when it
//! is about to expire and writes the refreshed token back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::stream::errors::RemoteApiError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedUser {
    #[serde(default)]
    pub token: Option<String>,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    /// Fields we don't use (scopes, account, ...) are written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthorizedUser {
    /// The current access token, unless it is missing or expires within the margin.
    pub fn valid_token(&self, now: DateTime<Utc>) -> Option<&str> {
        let token = self.token.as_deref()?;
        let margin = chrono::Duration::from_std(EXPIRY_MARGIN).ok()?;
        match self.expiry {
            Some(expiry) if expiry - margin > now => Some(token),
            _ => None,
        }
    }

    fn apply_refresh(&mut self, refreshed: RefreshResponse, now: DateTime<Utc>) {
        self.token = Some(refreshed.access_token);
        self.expiry = Some(now + chrono::Duration::seconds(refreshed.expires_in));
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

pub fn load_authorized_user(path: &Path) -> Result<AuthorizedUser, RemoteApiError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RemoteApiError::Auth(format!(
            "Cannot read {}: {}. Complete the OAuth consent flow and save the token there.",
            path.display(),
            e
        ))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| RemoteApiError::Auth(format!("Invalid token file {}: {}", path.display(), e)))
}

fn save_authorized_user(path: &Path, user: &AuthorizedUser) -> Result<(), RemoteApiError> {
    let content = serde_json::to_string_pretty(user)
        .map_err(|e| RemoteApiError::Auth(format!("Failed to serialize token: {}", e)))?;

    std::fs::write(path, content)
        .map_err(|e| RemoteApiError::Auth(format!("Failed to write {}: {}", path.display(), e)))
}

/// Token file plus the cached credentials read from it.
pub struct TokenStore {
    path: PathBuf,
    user: Mutex<AuthorizedUser>,
}

impl TokenStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RemoteApiError> {
        let path = path.into();
        let user = load_authorized_user(&path)?;
        Ok(Self {
            path,
            user: Mutex::new(user),
        })
    }

    /// A valid access token, refreshing it first when needed.
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<String, RemoteApiError> {
        let mut user = self.user.lock().await;

        if let Some(token) = user.valid_token(Utc::now()) {
            return Ok(token.to_string());
        }

        tracing::info!(target: "broadcast", "[AUTH] Access token expired, refreshing");

        let response = http
            .post(&user.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", user.refresh_token.as_str()),
                ("client_id", user.client_id.as_str()),
                ("client_secret", user.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RemoteApiError::Auth(format!("Token refresh failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(target: "broadcast", "[AUTH] Refresh rejected ({}): {}", status, body);
            return Err(RemoteApiError::Auth(format!("Token refresh rejected ({}): {}", status, body)));
        }

        let refreshed = response
            .json::<RefreshResponse>()
            .await
            .map_err(|e| RemoteApiError::Auth(format!("Invalid refresh response: {}", e)))?;

        user.apply_refresh(refreshed, Utc::now());

        if let Err(e) = save_authorized_user(&self.path, &user) {
            tracing::warn!(target: "broadcast", "[AUTH] {}", e);
        }

        user.token
            .clone()
            .ok_or_else(|| RemoteApiError::Auth("Refresh returned no token".to_string()))
    }
}
