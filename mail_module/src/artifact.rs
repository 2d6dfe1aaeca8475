use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::MailError;

/// A rendered email body on local disk. The file is removed when the guard drops.
#[derive(Debug)]
pub struct BodyArtifact {
    path: PathBuf,
}

impl BodyArtifact {
    /// Writes `{dir}/{message_id}.html`, creating `dir` if needed.
    pub fn write(dir: &Path, message_id: &str, html: &str) -> Result<Self, MailError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.html", sanitize_file_stem(message_id)));
        fs::write(&path, html)?;
        debug!("wrote body artifact {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BodyArtifact {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("removed body artifact {}", self.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "failed to remove body artifact {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

fn sanitize_file_stem(message_id: &str) -> String {
    let stem: String = message_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "message".to_string()
    } else {
        stem
    }
}
