//! Developer console helpers.
//!
//! Compiled only into debug builds or with the `debug-tools` feature.

use crate::consent::{ConsentRecord, ConsentStore};

/// Manual consent controls for development builds.
///
/// # Examples
///
/// ```
/// use consent_core::{BannerDecision, TelemetryBuilder, TelemetryConfig};
///
/// let telemetry = TelemetryBuilder::new(TelemetryConfig::default()).build().unwrap();
/// telemetry.consent().decide(BannerDecision::RejectAll);
///
/// let tools = telemetry.debug_tools();
/// assert!(tools.get_consent().is_some());
/// tools.clear_consent();
/// assert!(tools.get_consent().is_none());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DebugTools<'a> {
    consent: &'a ConsentStore,
}

impl<'a> DebugTools<'a> {
    /// Wraps `consent`.
    pub fn new(consent: &'a ConsentStore) -> Self {
        Self { consent }
    }

    /// Revokes the stored decision.
    pub fn clear_consent(&self) {
        tracing::debug!(target: "consent_store", "consent cleared from debug tools");
        self.consent.revoke();
    }

    /// Returns the current decision.
    pub fn get_consent(&self) -> Option<ConsentRecord> {
        self.consent.current()
    }

    /// Asks subscribers to show the consent banner.
    pub fn show_banner(&self) {
        self.consent.request_banner();
    }
}
