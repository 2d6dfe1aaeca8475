use std::env;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::BoxError;

const DEFAULT_LOG_LEVEL: &str = "info";

/// `RUST_LOG` wins over `LOG_LEVEL`. With `LOG_FILE` set, output is appended
/// there instead of stderr.
pub fn init_tracing() -> Result<(), BoxError> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        let level = env::var("LOG_LEVEL")
            .ok()
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        EnvFilter::try_new(level)
    })?;

    let log_file = env::var("LOG_FILE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    match log_file {
        Some(path) => {
            if let Some(parent) = Path::new(&path).parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()?;
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .try_init()?;
        }
    }
    Ok(())
}
