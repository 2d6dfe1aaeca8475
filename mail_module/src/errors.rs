use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mail provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gmail auth error: {0}")]
    Auth(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("mime parse error: {0}")]
    Mime(#[from] mailparse::MailParseError),
    #[error("message {0} has neither an html nor a plain-text part")]
    EmptyBody(String),
    #[error("thread {0} has no messages")]
    EmptyThread(String),
    #[error("reply has no recipients")]
    NoRecipients,
    #[error("could not compose reply: {0}")]
    Compose(String),
}

impl From<lettre::error::Error> for MailError {
    fn from(err: lettre::error::Error) -> Self {
        MailError::Compose(err.to_string())
    }
}

impl From<lettre::address::AddressError> for MailError {
    fn from(err: lettre::address::AddressError) -> Self {
        MailError::Compose(format!("invalid address: {}", err))
    }
}

impl MailError {
    /// Transport failures, 5xx, 401, 408 and 429 may clear up on their own.
    /// Missing messages and unreadable content will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            MailError::Http(err) => !err.is_decode() && !err.is_builder(),
            MailError::Status { status, .. } => {
                *status >= 500 || matches!(*status, 401 | 408 | 429)
            }
            MailError::Auth(_) | MailError::Io(_) => true,
            MailError::Decode(_)
            | MailError::Mime(_)
            | MailError::EmptyBody(_)
            | MailError::EmptyThread(_)
            | MailError::NoRecipients
            | MailError::Compose(_) => false,
        }
    }
}
