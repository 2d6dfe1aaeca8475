//! OAuth 2.0 access tokens for the Gmail API.
//!
//! Either a pre-issued access token or a refresh-token grant
//! (client id, client secret, refresh token) is required. Refreshed tokens
//! are cached until shortly before they expire.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, error};

use crate::errors::MailError;

pub const DEFAULT_GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const STATIC_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Clone, Default)]
pub struct GmailAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    /// Pre-issued access token, used as-is until it is rejected or ages out.
    pub access_token: Option<String>,
    /// Overrides [`DEFAULT_GOOGLE_TOKEN_URL`].
    pub token_url: Option<String>,
}

impl GmailAuthConfig {
    pub fn can_refresh(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.refresh_token.is_some()
    }

    pub fn is_valid(&self) -> bool {
        self.access_token.is_some() || self.can_refresh()
    }
}

impl fmt::Debug for GmailAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GmailAuthConfig")
            .field("client_id", &self.client_id)
            .field("has_client_secret", &self.client_secret.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_access_token", &self.access_token.is_some())
            .field("token_url", &self.token_url)
            .finish()
    }
}

#[derive(Clone)]
pub struct GmailAuth {
    client: Client,
    inner: Arc<RwLock<GmailAuthInner>>,
}

struct GmailAuthInner {
    config: GmailAuthConfig,
    access_token: Option<String>,
    token_expires_at: Option<Instant>,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: i64,
    #[allow(dead_code)]
    #[serde(default)]
    token_type: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    scope: Option<String>,
}

impl GmailAuth {
    pub fn new(config: GmailAuthConfig, client: Client) -> Result<Self, MailError> {
        if !config.is_valid() {
            return Err(MailError::Auth(
                "either GOOGLE_ACCESS_TOKEN or (GOOGLE_CLIENT_ID + GOOGLE_CLIENT_SECRET + GOOGLE_REFRESH_TOKEN) must be set"
                    .to_string(),
            ));
        }
        let (access_token, token_expires_at) = match config.access_token.clone() {
            Some(token) => (Some(token), Some(Instant::now() + STATIC_TOKEN_LIFETIME)),
            None => (None, None),
        };
        Ok(Self {
            client,
            inner: Arc::new(RwLock::new(GmailAuthInner {
                config,
                access_token,
                token_expires_at,
            })),
        })
    }

    /// Returns a cached token while it is comfortably inside its lifetime.
    pub fn access_token(&self) -> Result<String, MailError> {
        {
            let inner = self
                .inner
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let (Some(token), Some(expires_at)) = (&inner.access_token, &inner.token_expires_at)
            {
                if *expires_at > Instant::now() + EXPIRY_MARGIN {
                    return Ok(token.clone());
                }
            }
        }
        self.refresh_access_token()
    }

    /// Runs the refresh-token grant. Without refresh credentials the static
    /// token is handed back unchanged.
    pub fn refresh_access_token(&self) -> Result<String, MailError> {
        let config = {
            let inner = self
                .inner
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inner.config.clone()
        };

        let (Some(client_id), Some(client_secret), Some(refresh_token)) = (
            config.client_id.as_deref(),
            config.client_secret.as_deref(),
            config.refresh_token.as_deref(),
        ) else {
            return config
                .access_token
                .ok_or_else(|| MailError::Auth("no gmail credentials available".to_string()));
        };

        debug!("refreshing gmail oauth token");
        let token_url = config
            .token_url
            .as_deref()
            .unwrap_or(DEFAULT_GOOGLE_TOKEN_URL);
        let response = self
            .client
            .post(token_url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            error!("gmail token refresh failed: {} - {}", status, body);
            return Err(MailError::Auth(format!("token refresh HTTP {}: {}", status, body)));
        }

        let token_response: OAuthTokenResponse = response.json()?;
        let lifetime = Duration::from_secs(token_response.expires_in.max(0) as u64);
        let access_token = token_response.access_token;
        {
            let mut inner = self
                .inner
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inner.access_token = Some(access_token.clone());
            inner.token_expires_at = Some(Instant::now() + lifetime);
        }
        debug!("gmail oauth token refreshed");
        Ok(access_token)
    }

    /// Forgets the cached token so the next call refreshes.
    pub fn invalidate(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.config.can_refresh() {
            inner.access_token = None;
            inner.token_expires_at = None;
        }
    }
}

impl fmt::Debug for GmailAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GmailAuth").finish_non_exhaustive()
    }
}
