//! Mailbox access for the task tracker: reading unread mail, rendering bodies
//! and composing threaded replies.

mod addresses;
mod artifact;
mod auth;
mod composer;
mod errors;
mod gmail;
mod provider;
mod reader;
mod render;

pub use addresses::{extract_emails, normalize_email, DomainAllowlist};
pub use artifact::BodyArtifact;
pub use auth::{GmailAuth, GmailAuthConfig, DEFAULT_GOOGLE_TOKEN_URL};
pub use composer::{reply_subject, wrap_reply_html, ReplyComposer, ReplyEnvelope};
pub use errors::MailError;
pub use gmail::{GmailClient, DEFAULT_GMAIL_API_BASE_URL};
pub use provider::{MailProvider, MessageHeader, MessagePayload, MessageRef, OutboundMessage, ProviderMessage};
pub use reader::{
    BodyMode, FetchOutcome, InboundMessage, MailReader, SkipReason, SkippedMessage,
    UNREAD_INBOX_QUERY,
};
pub use render::render_email_html;
