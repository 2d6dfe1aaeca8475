use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

impl BackendError {
    /// Transport failures, 5xx, 401, 408 and 429 are worth another attempt.
    /// Other 4xx responses and malformed payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Http(err) => !err.is_decode() && !err.is_builder(),
            BackendError::Status { status, .. } => {
                *status >= 500 || matches!(*status, 401 | 408 | 429)
            }
            BackendError::Auth(_)
            | BackendError::Io(_)
            | BackendError::Json(_)
            | BackendError::InvalidField { .. } => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Status { status: 401, .. })
    }
}
