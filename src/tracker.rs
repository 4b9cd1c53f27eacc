use std::rc::Rc;

use crate::batch::{EventBatcher, EventParams, ParamValue};

/// Call-site helpers that shape common events before handing them to the
/// [`EventBatcher`].
///
/// Every helper goes through [`EventBatcher::add_event`], so deduplication,
/// the session cap and the consent check apply unchanged.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use consent_core::{MemoryStore, TelemetryBuilder, TelemetryConfig};
///
/// let telemetry = TelemetryBuilder::new(TelemetryConfig::default())
///     .storage(Rc::new(MemoryStore::new()))
///     .build()
///     .unwrap();
///
/// let tracker = telemetry.tracker();
/// assert!(tracker.track("cta_click", "engagement", Some("hero"), None));
/// assert_eq!(telemetry.batcher().buffered_len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Tracker {
    batcher: Rc<EventBatcher>,
}

impl Tracker {
    /// Creates a tracker feeding `batcher`.
    pub fn new(batcher: Rc<EventBatcher>) -> Self {
        Self { batcher }
    }

    /// Tracks `action` with the conventional category, label and value
    /// parameters. Absent label or value are left out.
    ///
    /// Returns `true` if the batcher accepted the event.
    pub fn track(
        &self,
        action: &str,
        category: &str,
        label: Option<&str>,
        value: Option<f64>,
    ) -> bool {
        let mut params = EventParams::new();
        params.insert("event_category".to_string(), category.into());
        if let Some(label) = label {
            params.insert("event_label".to_string(), label.into());
        }
        if let Some(value) = value {
            params.insert("value".to_string(), value.into());
        }
        self.batcher.add_event(action, params)
    }

    /// Tracks an event with caller-built parameters.
    pub fn track_custom(&self, name: &str, params: EventParams) -> bool {
        self.batcher.add_event(name, params)
    }

    /// Tracks a numeric engagement metric, optionally qualified by `context`.
    pub fn track_engagement(&self, metric: &str, value: f64, context: Option<&str>) -> bool {
        let label = with_context(metric.to_string(), context);
        self.track("engagement_metric", "user_behavior", Some(&label), Some(value))
    }

    /// Tracks a user preference such as a theme switch.
    pub fn track_preference(&self, preference: &str, value: &str, context: Option<&str>) -> bool {
        let label = with_context(format!("{preference}: {value}"), context);
        self.track("user_preference", "personalization", Some(&label), None)
    }

    /// Tracks a handled error by type, without its message text.
    pub fn track_error(&self, error_type: &str, context: Option<&str>) -> bool {
        let mut params = EventParams::new();
        params.insert("event_category".to_string(), "error".into());
        params.insert("error_type".to_string(), ParamValue::from(error_type));
        if let Some(context) = context {
            params.insert("event_label".to_string(), context.into());
        }
        self.batcher.add_event("error_occurred", params)
    }
}

fn with_context(label: String, context: Option<&str>) -> String {
    match context {
        Some(context) => format!("{label} - {context}"),
        None => label,
    }
}
