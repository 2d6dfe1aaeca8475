use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::addresses::{domain_of, extract_emails, DomainAllowlist};
use crate::artifact::BodyArtifact;
use crate::errors::MailError;
use crate::provider::{MailProvider, ProviderMessage};
use crate::render::render_email_html;

pub const UNREAD_INBOX_QUERY: &str = "in:inbox is:unread";

/// A message accepted for processing.
#[derive(Debug, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub thread_id: String,
    pub sender: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(skip)]
    pub body: Option<BodyArtifact>,
}

impl InboundMessage {
    /// Same metadata, no body.
    pub fn detached(&self) -> InboundMessage {
        InboundMessage {
            message_id: self.message_id.clone(),
            thread_id: self.thread_id.clone(),
            sender: self.sender.clone(),
            to: self.to.clone(),
            cc: self.cc.clone(),
            subject: self.subject.clone(),
            snippet: self.snippet.clone(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Skip,
    Materialize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    DuplicateThread,
    MalformedSender(String),
    MissingSubject,
    DisallowedDomain(String),
    BodyUnavailable(String),
    ProviderError(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DuplicateThread => f.write_str("thread already seen this cycle"),
            SkipReason::MalformedSender(raw) => write!(f, "malformed sender '{}'", raw),
            SkipReason::MissingSubject => f.write_str("missing subject"),
            SkipReason::DisallowedDomain(domain) => write!(f, "sender domain '{}' not allowed", domain),
            SkipReason::BodyUnavailable(reason) => write!(f, "body unavailable: {}", reason),
            SkipReason::ProviderError(reason) => write!(f, "provider error: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMessage {
    pub message_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub messages: Vec<InboundMessage>,
    pub skipped: Vec<SkippedMessage>,
}

/// Pulls unread inbox mail and turns it into [`InboundMessage`]s.
pub struct MailReader<M> {
    provider: Arc<M>,
    allowlist: DomainAllowlist,
    download_dir: PathBuf,
}

impl<M: MailProvider> MailReader<M> {
    pub fn new(provider: Arc<M>, allowlist: DomainAllowlist, download_dir: PathBuf) -> Self {
        Self {
            provider,
            allowlist,
            download_dir,
        }
    }

    /// Lists up to `max_results` unread messages, marking each one read as
    /// it is examined. Only the first message per thread survives.
    pub fn fetch_unread(
        &self,
        max_results: usize,
        body_mode: BodyMode,
    ) -> Result<FetchOutcome, MailError> {
        let refs = self.provider.list_unread(UNREAD_INBOX_QUERY, max_results)?;
        let mut outcome = FetchOutcome::default();
        if refs.is_empty() {
            debug!("no unread messages");
            return Ok(outcome);
        }
        info!("examining {} unread message(s)", refs.len());

        let mut seen_threads = HashSet::new();
        for message_ref in refs {
            let message = match self.provider.get_message(&message_ref.id) {
                Ok(message) => message,
                Err(err) => {
                    error!("failed to fetch message {}: {}", message_ref.id, err);
                    outcome.skipped.push(SkippedMessage {
                        message_id: message_ref.id,
                        reason: SkipReason::ProviderError(err.to_string()),
                    });
                    continue;
                }
            };
            self.mark_read(&message.id);

            if !seen_threads.insert(message.thread_id.clone()) {
                info!(
                    "skipping message {}: thread {} already seen",
                    message.id, message.thread_id
                );
                outcome.skipped.push(SkippedMessage {
                    message_id: message.id,
                    reason: SkipReason::DuplicateThread,
                });
                continue;
            }

            match self.accept(&message, body_mode) {
                Ok(inbound) => outcome.messages.push(inbound),
                Err(reason) => {
                    warn!("skipping message {}: {}", message.id, reason);
                    outcome.skipped.push(SkippedMessage {
                        message_id: message.id,
                        reason,
                    });
                }
            }
        }
        Ok(outcome)
    }

    /// Renders a message body to `{download_dir}/{message_id}.html`.
    pub fn materialize_body(&self, message_id: &str) -> Result<BodyArtifact, MailError> {
        let raw = self.provider.get_raw_message(message_id)?;
        let html = render_email_html(message_id, &raw)?;
        BodyArtifact::write(&self.download_dir, message_id, &html)
    }

    fn mark_read(&self, message_id: &str) {
        if let Err(err) = self.provider.mark_read(message_id) {
            warn!("failed to mark message {} read: {}", message_id, err);
        }
    }

    fn accept(
        &self,
        message: &ProviderMessage,
        body_mode: BodyMode,
    ) -> Result<InboundMessage, SkipReason> {
        let raw_from = message.header("From").unwrap_or_default();
        let sender = extract_emails(raw_from)
            .into_iter()
            .next()
            .ok_or_else(|| SkipReason::MalformedSender(raw_from.to_string()))?;
        let subject = message
            .header("Subject")
            .map(|subject| subject.trim().to_string())
            .ok_or(SkipReason::MissingSubject)?;
        if !self.allowlist.allows(&sender) {
            let domain = domain_of(&sender).unwrap_or_default().to_string();
            return Err(SkipReason::DisallowedDomain(domain));
        }

        let body = match body_mode {
            BodyMode::Skip => None,
            BodyMode::Materialize => Some(
                self.materialize_body(&message.id)
                    .map_err(|err| SkipReason::BodyUnavailable(err.to_string()))?,
            ),
        };

        Ok(InboundMessage {
            message_id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            sender,
            to: extract_emails(message.header("To").unwrap_or_default()),
            cc: extract_emails(message.header("Cc").unwrap_or_default()),
            subject,
            snippet: message.snippet.clone(),
            body,
        })
    }
}
