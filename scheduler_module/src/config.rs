use std::collections::HashMap;
use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use mail_module::{GmailAuthConfig, DEFAULT_GMAIL_API_BASE_URL};
use task_store_module::{BackendCredentials, Criticality};
use thiserror::Error;

use crate::policy::{PolicyError, ReminderPolicy};

pub const DEFAULT_MAX_UNREAD_PER_POLL: usize = 5;
pub const DEFAULT_ALLOWED_SENDER_DOMAINS: &str = "gmail.com";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BACKEND_STARTUP_RETRY_SECS: u64 = 5;

const REQUIRED_KEYS: &[&str] = &[
    "EMAIL_PARSE_INTERVAL",
    "SEND_REMINDER_INTERVAL",
    "REMINDER_INTERVAL_FOR_CRITICAL",
    "REMINDER_INTERVAL_FOR_HIGH",
    "REMINDER_INTERVAL_FOR_MEDIUM",
    "REMINDER_INTERVAL_FOR_LOW",
    "BOT_EMAIL",
    "API_BASE_URL",
    "UI_BASE_URL",
    "USER_NAME",
    "PASSWORD",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("gmail credentials missing: set GOOGLE_ACCESS_TOKEN or GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET and GOOGLE_REFRESH_TOKEN")]
    GmailCredentials,
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Runtime settings read from the environment.
///
/// The backend at `API_BASE_URL` must write its timestamps in UTC. Naive
/// `created_time` and `last_reminder_sent_time` values are read as UTC and
/// compared against `Utc::now()`, so a backend on local time shifts every
/// reminder by its UTC offset.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub ingestion_interval: Duration,
    pub reminder_sweep_interval: Duration,
    pub reminder_policy: ReminderPolicy,
    pub bot_email: String,
    pub api_base_url: String,
    pub ui_base_url: String,
    pub backend_credentials: BackendCredentials,
    pub max_unread_per_poll: usize,
    pub allowed_sender_domains: Vec<String>,
    pub download_dir: PathBuf,
    pub pending_messages_path: PathBuf,
    pub http_timeout: Duration,
    pub backend_startup_retry: Duration,
    pub gmail_api_base_url: String,
    pub gmail_auth: GmailAuthConfig,
}

impl TrackerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(env_var_non_empty)
    }

    /// Builds the configuration from any key lookup. Every missing required
    /// key is reported at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let missing: Vec<&'static str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| lookup(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        let required = |key: &'static str| lookup(key).unwrap_or_default();

        let ingestion_interval =
            parse_minutes("EMAIL_PARSE_INTERVAL", &required("EMAIL_PARSE_INTERVAL"))?;
        let reminder_sweep_interval =
            parse_minutes("SEND_REMINDER_INTERVAL", &required("SEND_REMINDER_INTERVAL"))?;

        let mut reminder_hours = HashMap::new();
        for (criticality, key) in [
            (Criticality::Critical, "REMINDER_INTERVAL_FOR_CRITICAL"),
            (Criticality::High, "REMINDER_INTERVAL_FOR_HIGH"),
            (Criticality::Medium, "REMINDER_INTERVAL_FOR_MEDIUM"),
            (Criticality::Low, "REMINDER_INTERVAL_FOR_LOW"),
        ] {
            let raw = required(key);
            let hours = raw.parse::<f64>().map_err(|_| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: "expected a number of hours",
            })?;
            reminder_hours.insert(criticality, hours);
        }
        let reminder_policy = ReminderPolicy::from_hours(&reminder_hours)?;

        let max_unread_per_poll = lookup("MAX_UNREAD_PER_POLL")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_UNREAD_PER_POLL);
        let allowed_sender_domains: Vec<String> = lookup("ALLOWED_SENDER_DOMAINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_SENDER_DOMAINS.to_string())
            .split(',')
            .map(|domain| domain.trim().to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect();
        let http_timeout = Duration::from_secs(
            lookup("HTTP_TIMEOUT_SECS")
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );
        let backend_startup_retry = Duration::from_secs(
            lookup("BACKEND_STARTUP_RETRY_SECS")
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_BACKEND_STARTUP_RETRY_SECS),
        );
        let download_dir =
            resolve_path(lookup("DOWNLOAD_DIR").unwrap_or_else(|| "downloads".to_string()))?;
        let pending_messages_path = resolve_path(
            lookup("PENDING_MESSAGES_PATH")
                .unwrap_or_else(|| "state/pending_messages.json".to_string()),
        )?;

        let gmail_auth = GmailAuthConfig {
            client_id: lookup("GOOGLE_CLIENT_ID"),
            client_secret: lookup("GOOGLE_CLIENT_SECRET"),
            refresh_token: lookup("GOOGLE_REFRESH_TOKEN"),
            access_token: lookup("GOOGLE_ACCESS_TOKEN"),
            token_url: lookup("GOOGLE_TOKEN_URL"),
        };
        if !gmail_auth.is_valid() {
            return Err(ConfigError::GmailCredentials);
        }

        Ok(Self {
            ingestion_interval,
            reminder_sweep_interval,
            reminder_policy,
            bot_email: required("BOT_EMAIL").to_ascii_lowercase(),
            api_base_url: required("API_BASE_URL").trim_end_matches('/').to_string(),
            ui_base_url: required("UI_BASE_URL").trim_end_matches('/').to_string(),
            backend_credentials: BackendCredentials {
                username: required("USER_NAME"),
                password: required("PASSWORD"),
            },
            max_unread_per_poll,
            allowed_sender_domains,
            download_dir,
            pending_messages_path,
            http_timeout,
            backend_startup_retry,
            gmail_api_base_url: lookup("GMAIL_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GMAIL_API_BASE_URL.to_string()),
            gmail_auth,
        })
    }
}

fn parse_minutes(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    match raw.parse::<u64>() {
        Ok(minutes) if minutes > 0 => Ok(Duration::from_secs(minutes * 60)),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a positive whole number of minutes",
        }),
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    }
}
