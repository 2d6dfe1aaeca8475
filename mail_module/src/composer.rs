use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::Message;
use tracing::debug;

use crate::addresses::extract_emails;
use crate::errors::MailError;
use crate::provider::{MailProvider, OutboundMessage, ProviderMessage};

/// Reply-all recipients with the bot's own address removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyEnvelope {
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

impl ReplyEnvelope {
    /// Replies go to the original To plus its sender, Cc kept as Cc. When
    /// nothing is left in To, the Cc list moves up.
    pub fn reply_all(bot_address: &str, original: &ProviderMessage) -> Self {
        let header = |name: &str| original.header(name).unwrap_or_default();
        let is_bot = |address: &String| address.eq_ignore_ascii_case(bot_address);

        let mut to: Vec<String> = Vec::new();
        for address in extract_emails(header("To"))
            .into_iter()
            .chain(extract_emails(header("From")))
        {
            if !is_bot(&address) && !to.contains(&address) {
                to.push(address);
            }
        }
        let mut cc: Vec<String> = Vec::new();
        for address in extract_emails(header("Cc")) {
            if !is_bot(&address) && !to.contains(&address) && !cc.contains(&address) {
                cc.push(address);
            }
        }

        if to.is_empty() {
            to = std::mem::take(&mut cc);
        }
        Self { to, cc }
    }

    pub fn is_empty(&self) -> bool {
        self.to.is_empty()
    }
}

pub fn reply_subject(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.is_empty() {
        "Re: (no subject)".to_string()
    } else if trimmed.to_ascii_lowercase().starts_with("re:") {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

/// Wraps reply content in the tracker's HTML template.
pub fn wrap_reply_html(content: &str) -> String {
    format!(
        r#"<html>
  <head>
    <style>
      body {{
        background-color: #F5F5F5;
        font-family: Arial, sans-serif;
        font-size: 14px;
        line-height: 1.5;
        margin: 0;
        padding: 0;
      }}
      .container {{
        background-color: #afbacc;
        border-radius: 4px;
        box-shadow: 0 2px 4px rgba(0, 0, 0, 0.1);
        margin: 20px;
        padding: 20px;
      }}
    </style>
  </head>
  <body>
    <div class="container">
      {}
    </div>
  </body>
</html>
"#,
        content
    )
}

/// Builds threaded reply-all messages on behalf of the bot mailbox.
#[derive(Debug, Clone)]
pub struct ReplyComposer {
    bot_address: String,
}

impl ReplyComposer {
    pub fn new(bot_address: impl Into<String>) -> Self {
        Self {
            bot_address: bot_address.into().trim().to_ascii_lowercase(),
        }
    }

    pub fn bot_address(&self) -> &str {
        &self.bot_address
    }

    /// Newest message not sent by the bot, else the newest message.
    pub fn select_original<'a>(&self, thread: &'a [ProviderMessage]) -> Option<&'a ProviderMessage> {
        thread
            .iter()
            .rev()
            .find(|message| !self.is_from_bot(message))
            .or_else(|| thread.last())
    }

    fn is_from_bot(&self, message: &ProviderMessage) -> bool {
        message
            .header("From")
            .map(|from| {
                extract_emails(from)
                    .iter()
                    .any(|address| address.eq_ignore_ascii_case(&self.bot_address))
            })
            .unwrap_or(false)
    }

    pub fn compose(
        &self,
        thread_id: &str,
        thread: &[ProviderMessage],
        content_html: &str,
    ) -> Result<OutboundMessage, MailError> {
        let original = self
            .select_original(thread)
            .ok_or_else(|| MailError::EmptyThread(thread_id.to_string()))?;
        let envelope = ReplyEnvelope::reply_all(&self.bot_address, original);
        if envelope.is_empty() {
            return Err(MailError::NoRecipients);
        }
        let subject = reply_subject(original.header("Subject").unwrap_or_default());

        let mut builder = Message::builder()
            .from(self.bot_address.parse::<Mailbox>()?)
            .subject(subject.clone());
        for address in &envelope.to {
            builder = builder.to(address.parse::<Mailbox>()?);
        }
        for address in &envelope.cc {
            builder = builder.cc(address.parse::<Mailbox>()?);
        }
        if let Some(message_id) = original.header("Message-ID").map(str::trim) {
            if !message_id.is_empty() {
                builder = builder
                    .in_reply_to(message_id.to_string())
                    .references(message_id.to_string());
            }
        }
        let message = builder.multipart(
            MultiPart::mixed().singlepart(SinglePart::html(wrap_reply_html(content_html))),
        )?;

        debug!(
            "composed reply on thread {} to {:?} cc {:?}",
            thread_id, envelope.to, envelope.cc
        );
        Ok(OutboundMessage {
            thread_id: thread_id.to_string(),
            raw: URL_SAFE.encode(message.formatted()),
            subject,
            envelope,
        })
    }

    /// Fetches the thread, composes a reply-all and sends it.
    pub fn reply_on_thread<M>(
        &self,
        provider: &M,
        thread_id: &str,
        content_html: &str,
    ) -> Result<String, MailError>
    where
        M: MailProvider + ?Sized,
    {
        let thread = provider.get_thread(thread_id)?;
        let outbound = self.compose(thread_id, &thread, content_html)?;
        provider.send(&outbound)
    }
}
