//! Consent record schema.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A tracking category that requires consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentKind {
    /// Usage analytics
    Analytics,
    /// Site functionality (always granted once a decision exists)
    Functional,
    /// Advertising and personalization
    Marketing,
}

impl fmt::Display for ConsentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentKind::Analytics => write!(f, "analytics"),
            ConsentKind::Functional => write!(f, "functional"),
            ConsentKind::Marketing => write!(f, "marketing"),
        }
    }
}

/// A persisted consent decision.
///
/// Stored as `{"analytics","functional","marketing","timestamp","version"}`.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use consent_core::{ConsentKind, ConsentRecord};
///
/// let record = ConsentRecord::reject_all(Utc::now(), "1.0");
/// assert!(!record.allows(ConsentKind::Analytics));
/// assert!(record.allows(ConsentKind::Functional));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Usage analytics permitted
    pub analytics: bool,
    /// Functional storage permitted
    pub functional: bool,
    /// Marketing permitted
    pub marketing: bool,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
    /// Policy version the decision was made under
    pub version: String,
}

impl ConsentRecord {
    /// Grants every category.
    pub fn accept_all(timestamp: DateTime<Utc>, version: impl Into<String>) -> Self {
        Self::custom(true, true, timestamp, version)
    }

    /// Denies every optional category.
    pub fn reject_all(timestamp: DateTime<Utc>, version: impl Into<String>) -> Self {
        Self::custom(false, false, timestamp, version)
    }

    /// Records a customized decision. Functional is always granted.
    pub fn custom(
        analytics: bool,
        marketing: bool,
        timestamp: DateTime<Utc>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            analytics,
            functional: true,
            marketing,
            timestamp,
            version: version.into(),
        }
    }

    /// Returns whether `kind` is permitted by this record.
    pub fn allows(&self, kind: ConsentKind) -> bool {
        match kind {
            ConsentKind::Analytics => self.analytics,
            ConsentKind::Functional => self.functional,
            ConsentKind::Marketing => self.marketing,
        }
    }

    /// Returns `true` while the record is younger than `expiration`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, expiration: TimeDelta) -> bool {
        now - self.timestamp < expiration
    }

    /// Forces `functional` on. Returns the record and whether it was changed.
    pub(crate) fn normalized(mut self) -> (Self, bool) {
        let corrected = !self.functional;
        self.functional = true;
        (self, corrected)
    }
}

/// A choice made on the consent banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerDecision {
    /// "Accept all"
    AcceptAll,
    /// "Reject all"
    RejectAll,
    /// "Save preferences" with the chosen toggles
    Custom {
        /// Analytics toggle
        analytics: bool,
        /// Marketing toggle
        marketing: bool,
    },
}

impl BannerDecision {
    /// Builds the record this decision stands for.
    pub fn into_record(self, timestamp: DateTime<Utc>, version: impl Into<String>) -> ConsentRecord {
        match self {
            BannerDecision::AcceptAll => ConsentRecord::accept_all(timestamp, version),
            BannerDecision::RejectAll => ConsentRecord::reject_all(timestamp, version),
            BannerDecision::Custom {
                analytics,
                marketing,
            } => ConsentRecord::custom(analytics, marketing, timestamp, version),
        }
    }
}
