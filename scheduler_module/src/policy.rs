use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use task_store_module::Criticality;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("no reminder interval configured for {0}")]
    Unmapped(Criticality),
    #[error("reminder interval for {criticality} must be a positive number of hours, got {hours}")]
    NonPositive { criticality: Criticality, hours: f64 },
}

/// How long an open task may sit before its assignee is reminded, per criticality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPolicy {
    critical: Duration,
    high: Duration,
    medium: Duration,
    low: Duration,
}

impl ReminderPolicy {
    /// Every criticality must be mapped to a positive, finite number of hours.
    pub fn from_hours(hours: &HashMap<Criticality, f64>) -> Result<Self, PolicyError> {
        let interval = |criticality: Criticality| -> Result<Duration, PolicyError> {
            let value = *hours
                .get(&criticality)
                .ok_or(PolicyError::Unmapped(criticality))?;
            if !value.is_finite() || value <= 0.0 {
                return Err(PolicyError::NonPositive {
                    criticality,
                    hours: value,
                });
            }
            Ok(Duration::milliseconds((value * 3_600_000.0).round() as i64))
        };
        Ok(Self {
            critical: interval(Criticality::Critical)?,
            high: interval(Criticality::High)?,
            medium: interval(Criticality::Medium)?,
            low: interval(Criticality::Low)?,
        })
    }

    pub fn interval_for(&self, criticality: Criticality) -> Duration {
        match criticality {
            Criticality::Critical => self.critical,
            Criticality::High => self.high,
            Criticality::Medium => self.medium,
            Criticality::Low => self.low,
        }
    }

    /// Due once at least the interval has passed since `baseline`.
    pub fn is_due(&self, criticality: Criticality, baseline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - baseline >= self.interval_for(criticality)
    }
}
