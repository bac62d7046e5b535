//! Activity execution policies
//!
//! Options are looked up per activity name from an [`ActivityOptionsRegistry`]
//! and merged over caller-supplied defaults. The `retry` policy merges field
//! by field, so an override may change `maximumAttempts` while keeping the
//! default backoff.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/* ===================== Option Types ===================== */

/// Lowercase and snake_case aliases let the same fields load from config
/// files and environment variables, whose keys arrive lowercased.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityOptions {
    #[serde(
        default,
        alias = "starttoclosetimeout",
        alias = "start_to_close_timeout",
        with = "duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_to_close_timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(
        default,
        alias = "initialinterval",
        alias = "initial_interval",
        with = "duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_interval: Option<Duration>,

    #[serde(
        default,
        alias = "backoffcoefficient",
        alias = "backoff_coefficient",
        skip_serializing_if = "Option::is_none"
    )]
    pub backoff_coefficient: Option<f64>,

    #[serde(
        default,
        alias = "maximumattempts",
        alias = "maximum_attempts",
        skip_serializing_if = "Option::is_none"
    )]
    pub maximum_attempts: Option<u32>,

    #[serde(
        default,
        alias = "maximuminterval",
        alias = "maximum_interval",
        with = "duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub maximum_interval: Option<Duration>,

    #[serde(
        default,
        alias = "nonretryableerrortypes",
        alias = "non_retryable_error_types",
        skip_serializing_if = "Option::is_none"
    )]
    pub non_retryable_error_types: Option<Vec<String>>,
}

impl RetryPolicy {
    /// Fields set in `overrides` win; unset fields keep their current value
    pub fn merged_with(&self, overrides: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            initial_interval: overrides.initial_interval.or(self.initial_interval),
            backoff_coefficient: overrides.backoff_coefficient.or(self.backoff_coefficient),
            maximum_attempts: overrides.maximum_attempts.or(self.maximum_attempts),
            maximum_interval: overrides.maximum_interval.or(self.maximum_interval),
            non_retryable_error_types: overrides
                .non_retryable_error_types
                .clone()
                .or_else(|| self.non_retryable_error_types.clone()),
        }
    }

    pub fn is_non_retryable(&self, error_type: &str) -> bool {
        self.non_retryable_error_types
            .as_ref()
            .is_some_and(|types| types.iter().any(|t| t == error_type))
    }
}

impl ActivityOptions {
    /// Overlay `overrides` on top of these options
    pub fn merged_with(&self, overrides: &ActivityOptions) -> ActivityOptions {
        let retry = match (&self.retry, &overrides.retry) {
            (Some(base), Some(over)) => Some(base.merged_with(over)),
            (None, Some(over)) => Some(over.clone()),
            (base, None) => base.clone(),
        };

        ActivityOptions {
            start_to_close_timeout: overrides
                .start_to_close_timeout
                .or(self.start_to_close_timeout),
            retry,
        }
    }

    pub fn is_non_retryable(&self, error_type: &str) -> bool {
        self.retry
            .as_ref()
            .is_some_and(|r| r.is_non_retryable(error_type))
    }
}

/* ===================== Registry ===================== */

/// Per-activity option overrides
#[derive(Debug, Clone, Default)]
pub struct ActivityOptionsRegistry {
    overrides: HashMap<String, ActivityOptions>,
}

impl ActivityOptionsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_overrides(overrides: HashMap<String, ActivityOptions>) -> Self {
        Self { overrides }
    }

    pub fn register(&mut self, activity: impl Into<String>, options: ActivityOptions) {
        self.overrides.insert(activity.into(), options);
    }

    pub fn get(&self, activity: &str) -> Option<&ActivityOptions> {
        self.overrides.get(activity)
    }

    /// Options for `activity`: its override merged over `defaults`, or a
    /// copy of `defaults` when nothing is registered
    pub fn get_or_default(&self, activity: &str, defaults: &ActivityOptions) -> ActivityOptions {
        match self.overrides.get(activity) {
            Some(over) => defaults.merged_with(over),
            None => defaults.clone(),
        }
    }
}

/* ===================== Durations ===================== */

/// Parse "250ms", "30s", "5m", "1h" or a bare number of milliseconds
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim();

    if let Some(ms) = duration_str.strip_suffix("ms") {
        Ok(Duration::from_millis(ms.trim().parse()?))
    } else if let Some(secs) = duration_str.strip_suffix('s') {
        Ok(Duration::from_secs(secs.trim().parse()?))
    } else if let Some(mins) = duration_str.strip_suffix('m') {
        scaled_secs(mins, 60, duration_str)
    } else if let Some(hours) = duration_str.strip_suffix('h') {
        scaled_secs(hours, 3600, duration_str)
    } else if let Ok(ms) = duration_str.parse::<u64>() {
        Ok(Duration::from_millis(ms))
    } else {
        Err(anyhow!(
            "Invalid duration '{}'. Use '250ms', '30s', '5m', '1h' or milliseconds",
            duration_str
        ))
    }
}

fn scaled_secs(count: &str, unit: u64, duration_str: &str) -> Result<Duration> {
    let count: u64 = count.trim().parse()?;
    count
        .checked_mul(unit)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("Duration '{}' is out of range", duration_str))
}

/// Shortest exact unit form of a duration
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms != 0 && ms % 3_600_000 == 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms != 0 && ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms != 0 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}ms", ms)
    }
}

mod duration_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_str(&super::format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Millis(ms)) => Ok(Some(Duration::from_millis(ms))),
            Some(Raw::Text(text)) => super::parse_duration(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
