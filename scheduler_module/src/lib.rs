pub mod config;
pub mod jobs;
pub mod pending;
pub mod policy;
pub mod reconciler;
pub mod sweeper;

mod logging;
mod service;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{ConfigError, TrackerConfig};
pub use logging::init_tracing;
pub use service::{run_service, wait_for_backend, IngestionJob, ReminderJob};
