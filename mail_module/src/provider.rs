use serde::Deserialize;

use crate::composer::ReplyEnvelope;
use crate::errors::MailError;

/// Entry of a mailbox listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageRef {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
}

/// Message metadata: ids, snippet and headers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub payload: MessagePayload,
}

impl ProviderMessage {
    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }
}

/// A fully composed reply ready for the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub thread_id: String,
    /// RFC 5322 message, base64url encoded.
    pub raw: String,
    pub subject: String,
    pub envelope: ReplyEnvelope,
}

/// The subset of a mailbox API the tracker relies on.
pub trait MailProvider {
    fn list_unread(&self, query: &str, max_results: usize) -> Result<Vec<MessageRef>, MailError>;

    /// Headers and snippet only.
    fn get_message(&self, message_id: &str) -> Result<ProviderMessage, MailError>;

    /// The decoded RFC 5322 bytes of a message.
    fn get_raw_message(&self, message_id: &str) -> Result<Vec<u8>, MailError>;

    fn mark_read(&self, message_id: &str) -> Result<(), MailError>;

    /// Messages of a thread, oldest first.
    fn get_thread(&self, thread_id: &str) -> Result<Vec<ProviderMessage>, MailError>;

    /// Sends within the message's thread and returns the provider's message id.
    fn send(&self, message: &OutboundMessage) -> Result<String, MailError>;
}
