//! Control-plane directory client.
//!
//! The control plane knows every device on the overlay and its tags; the
//! WebUI uses it to discover the adapter fleet. Authentication is OAuth2
//! client credentials from `TS_OAUTH_CLIENT_ID` / `TS_OAUTH_CLIENT_SECRET`,
//! with the token cached until shortly before expiry.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DEFAULT_CONTROL_URL: &str = "https://control.tsymbiote.net/api/v1";

pub const OAUTH_CLIENT_ID_ENV: &str = "TS_OAUTH_CLIENT_ID";
pub const OAUTH_CLIENT_SECRET_ENV: &str = "TS_OAUTH_CLIENT_SECRET";

/// One overlay device as the control plane reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub hostname: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the device currently holds a control connection.
    #[serde(default, rename = "connectedToControl")]
    pub online: bool,
}

#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    /// Devices currently carrying `tag`.
    async fn devices_with_tag(&self, tag: &str) -> Result<Vec<Device>, ControlError>;

    /// Mint a device auth key carrying `tags` (used by `--generate-auth`).
    async fn generate_auth_key(&self, tags: &[String]) -> Result<String, ControlError>;
}

// ---------------------------------------------------------------------------
// OauthControlClient
// ---------------------------------------------------------------------------

pub struct OauthControlClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Deserialize)]
struct KeyResponse {
    key: String,
}

impl OauthControlClient {
    /// Build from the OAuth environment variables.
    pub fn from_env(scopes: Vec<String>) -> Result<Self, ControlError> {
        let client_id = std::env::var(OAUTH_CLIENT_ID_ENV)
            .map_err(|_| ControlError::MissingCredentials(OAUTH_CLIENT_ID_ENV))?;
        let client_secret = std::env::var(OAUTH_CLIENT_SECRET_ENV)
            .map_err(|_| ControlError::MissingCredentials(OAUTH_CLIENT_SECRET_ENV))?;
        Ok(Self::new(
            DEFAULT_CONTROL_URL.to_owned(),
            client_id,
            client_secret,
            scopes,
        ))
    }

    pub fn new(
        base_url: String,
        client_id: String,
        client_secret: String,
        scopes: Vec<String>,
    ) -> Self {
        OauthControlClient {
            http: reqwest::Client::new(),
            base_url,
            client_id,
            client_secret,
            scopes,
            token: Mutex::new(None),
        }
    }

    async fn bearer_token(&self) -> Result<String, ControlError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", &self.scopes.join(" ")),
            ])
            .send()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ControlError::Decode(e.to_string()))?;

        // Refresh a little early so in-flight calls never carry a stale token.
        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(30).max(30));
        let access = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + lifetime,
        });
        Ok(access)
    }
}

#[async_trait]
impl ControlPlane for OauthControlClient {
    async fn devices_with_tag(&self, tag: &str) -> Result<Vec<Device>, ControlError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .get(format!("{}/devices", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        let devices: DevicesResponse = response
            .json()
            .await
            .map_err(|e| ControlError::Decode(e.to_string()))?;

        Ok(devices
            .devices
            .into_iter()
            .filter(|d| d.tags.iter().any(|t| t == tag))
            .collect())
    }

    async fn generate_auth_key(&self, tags: &[String]) -> Result<String, ControlError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .post(format!("{}/keys", self.base_url))
            .bearer_auth(token)
            .json(&serde_json::json!({ "reusable": true, "tags": tags }))
            .send()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        let key: KeyResponse = response
            .json()
            .await
            .map_err(|e| ControlError::Decode(e.to_string()))?;
        Ok(key.key)
    }
}

#[derive(Debug)]
pub enum ControlError {
    MissingCredentials(&'static str),
    Transport(String),
    Decode(String),
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::MissingCredentials(var) => {
                write!(f, "missing control-plane credential: {}", var)
            }
            ControlError::Transport(s) => write!(f, "control-plane request failed: {}", s),
            ControlError::Decode(s) => write!(f, "control-plane decode error: {}", s),
        }
    }
}

impl std::error::Error for ControlError {}
