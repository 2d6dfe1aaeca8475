use std::time::Duration;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::{GmailAuth, GmailAuthConfig};
use crate::errors::MailError;
use crate::provider::{MailProvider, MessageRef, OutboundMessage, ProviderMessage};

pub const DEFAULT_GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail emits base64url both with and without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Deserialize)]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct RawMessageResponse {
    raw: String,
}

#[derive(Debug, Deserialize)]
struct ThreadResponse {
    #[serde(default)]
    messages: Vec<ProviderMessage>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Gmail REST client for a single mailbox (`users/me`).
#[derive(Debug, Clone)]
pub struct GmailClient {
    client: Client,
    base_url: String,
    auth: GmailAuth,
}

impl GmailClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_config: GmailAuthConfig,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        let client = Client::builder().timeout(timeout).build()?;
        let auth = GmailAuth::new(auth_config, client.clone())?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Retries once with a fresh token when Gmail answers 401.
    fn send_authorized<F>(&self, build: F) -> Result<Response, MailError>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let token = self.auth.access_token()?;
        let response = build(&self.client, &token).send()?;
        if response.status().as_u16() != 401 {
            return check_status(response);
        }
        info!("gmail rejected access token, refreshing");
        self.auth.invalidate();
        let token = self.auth.access_token()?;
        let response = build(&self.client, &token).send()?;
        check_status(response)
    }
}

impl MailProvider for GmailClient {
    fn list_unread(&self, query: &str, max_results: usize) -> Result<Vec<MessageRef>, MailError> {
        let url = self.endpoint("/messages");
        let max_results = max_results.to_string();
        let response = self.send_authorized(|client, token| {
            client
                .get(&url)
                .bearer_auth(token)
                .query(&[("q", query), ("maxResults", max_results.as_str())])
        })?;
        let listing: ListMessagesResponse = response.json()?;
        debug!("gmail listed {} unread message(s)", listing.messages.len());
        Ok(listing.messages)
    }

    fn get_message(&self, message_id: &str) -> Result<ProviderMessage, MailError> {
        let url = self.endpoint(&format!("/messages/{}", message_id));
        let response = self.send_authorized(|client, token| {
            client
                .get(&url)
                .bearer_auth(token)
                .query(&[("format", "metadata")])
        })?;
        Ok(response.json()?)
    }

    fn get_raw_message(&self, message_id: &str) -> Result<Vec<u8>, MailError> {
        let url = self.endpoint(&format!("/messages/{}", message_id));
        let response = self.send_authorized(|client, token| {
            client.get(&url).bearer_auth(token).query(&[("format", "raw")])
        })?;
        let payload: RawMessageResponse = response.json()?;
        Ok(URL_SAFE_LENIENT.decode(payload.raw.trim())?)
    }

    fn mark_read(&self, message_id: &str) -> Result<(), MailError> {
        let url = self.endpoint(&format!("/messages/{}/modify", message_id));
        let body = json!({ "removeLabelIds": ["UNREAD"] });
        self.send_authorized(|client, token| client.post(&url).bearer_auth(token).json(&body))?;
        debug!("marked message {} as read", message_id);
        Ok(())
    }

    fn get_thread(&self, thread_id: &str) -> Result<Vec<ProviderMessage>, MailError> {
        let url = self.endpoint(&format!("/threads/{}", thread_id));
        let response = self.send_authorized(|client, token| {
            client
                .get(&url)
                .bearer_auth(token)
                .query(&[("format", "metadata")])
        })?;
        let thread: ThreadResponse = response.json()?;
        Ok(thread.messages)
    }

    fn send(&self, message: &OutboundMessage) -> Result<String, MailError> {
        let url = self.endpoint("/messages/send");
        let body = json!({ "raw": message.raw, "threadId": message.thread_id });
        let response =
            self.send_authorized(|client, token| client.post(&url).bearer_auth(token).json(&body))?;
        let sent: SendResponse = response.json()?;
        info!(
            "sent reply {} on thread {} to {:?}",
            sent.id, message.thread_id, message.envelope.to
        );
        Ok(sent.id)
    }
}

fn check_status(response: Response) -> Result<Response, MailError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    warn!("gmail returned {}: {}", status, body);
    Err(MailError::Status {
        status: status.as_u16(),
        body,
    })
}
