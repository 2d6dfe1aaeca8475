use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mail_module::{BodyArtifact, InboundMessage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("corrupt pending ledger {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// A message that was marked read but never reached the backend.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingMessage {
    pub message: InboundMessage,
    pub attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub last_error: String,
}

impl PendingMessage {
    pub fn message_id(&self) -> &str {
        &self.message.message_id
    }

    /// Rebuilds the inbound message around a freshly rendered body.
    pub fn into_inbound(self, body: BodyArtifact) -> InboundMessage {
        let mut message = self.message;
        message.body = Some(body);
        message
    }
}

/// JSON file of messages awaiting another reconciliation attempt.
#[derive(Debug, Clone)]
pub struct PendingLedger {
    path: PathBuf,
}

impl PendingLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<PendingMessage>, LedgerError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents).map_err(|source| LedgerError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Adds the message, or bumps its attempt count if already present.
    pub fn record(
        &self,
        message: &InboundMessage,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, LedgerError> {
        let mut entries = self.load()?;
        let attempts = match entries
            .iter_mut()
            .find(|entry| entry.message_id() == message.message_id)
        {
            Some(entry) => {
                entry.attempts += 1;
                entry.last_failed_at = now;
                entry.last_error = error.to_string();
                entry.attempts
            }
            None => {
                entries.push(PendingMessage {
                    message: message.detached(),
                    attempts: 1,
                    first_failed_at: now,
                    last_failed_at: now,
                    last_error: error.to_string(),
                });
                1
            }
        };
        self.save(&entries)?;
        info!(
            "recorded message {} as pending (attempt {})",
            message.message_id, attempts
        );
        Ok(attempts)
    }

    /// Returns whether an entry was removed.
    pub fn remove(&self, message_id: &str) -> Result<bool, LedgerError> {
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|entry| entry.message_id() != message_id);
        if entries.len() == before {
            return Ok(false);
        }
        self.save(&entries)?;
        debug!("removed message {} from pending ledger", message_id);
        Ok(true)
    }

    fn save(&self, entries: &[PendingMessage]) -> Result<(), LedgerError> {
        let io_error = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(entries).map_err(|source| LedgerError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(io_error)?;
        fs::rename(&tmp_path, &self.path).map_err(io_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn inbound(id: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.to_string(),
            thread_id: format!("thread-{}", id),
            sender: "alice@gmail.com".to_string(),
            to: vec!["bot@gmail.com".to_string(), "bob@gmail.com".to_string()],
            cc: Vec::new(),
            subject: "VPN down".to_string(),
            snippet: String::new(),
            body: None,
        }
    }

    #[test]
    fn missing_file_is_an_empty_ledger() {
        let temp = TempDir::new().expect("tempdir");
        let ledger = PendingLedger::new(temp.path().join("state").join("pending.json"));
        assert!(ledger.load().expect("load").is_empty());
        assert!(!ledger.remove("m1").expect("remove"));
    }

    #[test]
    fn record_upserts_and_counts_attempts() {
        let temp = TempDir::new().expect("tempdir");
        let ledger = PendingLedger::new(temp.path().join("state").join("pending.json"));
        let first = Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();

        assert_eq!(ledger.record(&inbound("m1"), "503", first).expect("record"), 1);
        assert_eq!(ledger.record(&inbound("m2"), "503", first).expect("record"), 1);
        assert_eq!(ledger.record(&inbound("m1"), "timeout", later).expect("record"), 2);

        let entries = ledger.load().expect("load");
        assert_eq!(entries.len(), 2);
        let m1 = entries.iter().find(|e| e.message_id() == "m1").expect("m1");
        assert_eq!(m1.attempts, 2);
        assert_eq!(m1.first_failed_at, first);
        assert_eq!(m1.last_failed_at, later);
        assert_eq!(m1.last_error, "timeout");
        assert_eq!(m1.message.to, vec!["bot@gmail.com", "bob@gmail.com"]);
    }

    #[test]
    fn remove_drops_only_the_named_entry() {
        let temp = TempDir::new().expect("tempdir");
        let ledger = PendingLedger::new(temp.path().join("pending.json"));
        let now = Utc::now();
        ledger.record(&inbound("m1"), "x", now).expect("record");
        ledger.record(&inbound("m2"), "x", now).expect("record");

        assert!(ledger.remove("m1").expect("remove"));
        let ids: Vec<_> = ledger
            .load()
            .expect("load")
            .iter()
            .map(|e| e.message_id().to_string())
            .collect();
        assert_eq!(ids, vec!["m2"]);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("pending.json");
        fs::write(&path, "{not json").expect("write");
        let err = PendingLedger::new(&path).load().expect_err("corrupt");
        assert!(matches!(err, LedgerError::Json { .. }));
    }
}
