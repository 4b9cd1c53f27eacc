//! Runtime configuration.
//!
//! Defaults match the production constants. Every value can be overridden
//! from `CONSENT_CORE_*` environment variables; unparseable overrides are
//! ignored rather than rejected.

use chrono::TimeDelta;
use serde::Deserialize;

use crate::Error;

const ENV_PREFIX: &str = "CONSENT_CORE_";

/// Configuration for consent storage and event batching.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Buffered events that trigger an immediate flush.
    pub batch_size: usize,
    /// Delay after the oldest unflushed event before a timed flush.
    pub debounce_ms: u32,
    /// Events accepted per session before `add_event` starts dropping.
    pub max_events_per_session: u64,
    /// Window within which a second same-name event is a duplicate.
    pub dedup_window_ms: u32,
    /// Most recent pending events kept in storage.
    pub pending_cap: usize,
    /// Pending events older than this are dropped instead of forwarded.
    pub pending_max_age_secs: u32,
    /// Lifetime of a consent decision.
    pub consent_expiration_days: u32,
    /// Age after which stored entries are purged by the retention sweep.
    pub data_retention_days: u32,
    /// Policy version stamped on new consent records.
    pub consent_version: String,
    /// Grant everything at startup instead of waiting for a banner decision.
    pub skip_banner: bool,
    /// Deny analytics regardless of the stored decision (Do Not Track).
    pub analytics_opt_out: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            debounce_ms: 2_000,
            max_events_per_session: 100,
            dedup_window_ms: 1_000,
            pending_cap: 20,
            pending_max_age_secs: 3_600,
            consent_expiration_days: 365,
            data_retention_days: 1_095,
            consent_version: "1.0".to_string(),
            skip_banner: false,
            analytics_opt_out: false,
        }
    }
}

impl TelemetryConfig {
    /// Loads configuration from environment variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary lookup, keyed by the full
    /// variable name (e.g. `CONSENT_CORE_BATCH_SIZE`).
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(v) = var("BATCH_SIZE").and_then(|v| v.parse::<usize>().ok()) {
            self.batch_size = v;
        }
        if let Some(v) = var("DEBOUNCE_MS").and_then(|v| v.parse::<u32>().ok()) {
            self.debounce_ms = v;
        }
        if let Some(v) = var("MAX_EVENTS_PER_SESSION").and_then(|v| v.parse::<u64>().ok()) {
            self.max_events_per_session = v;
        }
        if let Some(v) = var("DEDUP_WINDOW_MS").and_then(|v| v.parse::<u32>().ok()) {
            self.dedup_window_ms = v;
        }
        if let Some(v) = var("PENDING_CAP").and_then(|v| v.parse::<usize>().ok()) {
            self.pending_cap = v;
        }
        if let Some(v) = var("PENDING_MAX_AGE_SECS").and_then(|v| v.parse::<u32>().ok()) {
            self.pending_max_age_secs = v;
        }
        if let Some(v) = var("CONSENT_EXPIRATION_DAYS").and_then(|v| v.parse::<u32>().ok()) {
            self.consent_expiration_days = v;
        }
        if let Some(v) = var("DATA_RETENTION_DAYS").and_then(|v| v.parse::<u32>().ok()) {
            self.data_retention_days = v;
        }
        if let Some(v) = var("CONSENT_VERSION") {
            let v = v.trim();
            if !v.is_empty() {
                self.consent_version = v.to_string();
            }
        }
        if let Some(v) = var("SKIP_BANNER").and_then(|v| parse_flag(&v)) {
            self.skip_banner = v;
        }
        if let Some(v) = var("ANALYTICS_OPT_OUT").and_then(|v| parse_flag(&v)) {
            self.analytics_opt_out = v;
        }
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.consent_expiration_days == 0 {
            return Err(Error::InvalidConfig(
                "consent_expiration_days must be at least 1".to_string(),
            ));
        }
        if self.consent_version.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "consent_version must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Debounce delay as a duration.
    pub fn debounce(&self) -> TimeDelta {
        TimeDelta::milliseconds(i64::from(self.debounce_ms))
    }

    /// Deduplication window as a duration.
    pub fn dedup_window(&self) -> TimeDelta {
        TimeDelta::milliseconds(i64::from(self.dedup_window_ms))
    }

    /// Maximum age of a forwardable pending event.
    pub fn pending_max_age(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.pending_max_age_secs))
    }

    /// Lifetime of a consent decision.
    pub fn consent_expiration(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.consent_expiration_days))
    }

    /// Retention window for stored entries.
    pub fn data_retention(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.data_retention_days))
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
