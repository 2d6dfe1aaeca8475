use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct BackendCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BackendCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Shared backend login state. Clones observe the same token.
#[derive(Clone)]
pub struct BackendSession {
    inner: Arc<RwLock<SessionInner>>,
}

struct SessionInner {
    credentials: BackendCredentials,
    access_token: Option<String>,
}

impl BackendSession {
    pub fn new(credentials: BackendCredentials) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SessionInner {
                credentials,
                access_token: None,
            })),
        }
    }

    /// Starts from an already-issued token.
    pub fn with_token(credentials: BackendCredentials, token: impl Into<String>) -> Self {
        let session = Self::new(credentials);
        session.store_token(token.into());
        session
    }

    pub fn credentials(&self) -> BackendCredentials {
        self.read(|inner| inner.credentials.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(|inner| inner.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.read(|inner| inner.access_token.is_some())
    }

    pub(crate) fn store_token(&self, token: String) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.access_token = Some(token);
    }

    pub fn clear(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.access_token = None;
    }

    fn read<T>(&self, f: impl FnOnce(&SessionInner) -> T) -> T {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&inner)
    }
}

impl fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSession")
            .field("username", &self.credentials().username)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
