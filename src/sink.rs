use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::batch::EventParams;

/// Error returned when delivering an event to a sink fails.
///
/// # Examples
///
/// ```
/// use consent_core::{SinkError, SinkErrorKind};
///
/// let error = SinkError::new(SinkErrorKind::Unavailable);
/// assert_eq!(error.kind(), SinkErrorKind::Unavailable);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sink error ({kind}){}", crate::error::message_suffix(.message))]
pub struct SinkError {
    kind: SinkErrorKind,
    message: Option<String>,
}

impl SinkError {
    /// Creates a new sink error with the specified kind.
    pub fn new(kind: SinkErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a new sink error with a custom message.
    pub fn with_message(kind: SinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SinkErrorKind {
        self.kind
    }

    /// Returns the error message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Kind of sink error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkErrorKind {
    /// No sink is installed or it is not ready yet. Events are parked as pending.
    Unavailable,
    /// The sink refused this event. The event is dropped.
    Rejected,
    /// Transport failure while sending. The event is dropped.
    Io,
}

impl fmt::Display for SinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "sink unavailable"),
            Self::Rejected => write!(f, "rejected"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

/// An event as delivered to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkEvent {
    /// Event name
    pub name: String,
    /// Caller-supplied parameters
    pub params: EventParams,
    /// Session sequence number assigned at enqueue time
    pub sequence: u64,
    /// Number of events in the batch this one was delivered with
    pub batch_size: usize,
    /// Whether the event was replayed from the pending queue
    pub was_pending: bool,
}

/// A telemetry ingestion endpoint.
///
/// The sink receives only events that passed the analytics consent check.
/// It is also told about every permission change so it can flip its own
/// collection switch.
pub trait TelemetrySink {
    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// Returns [`SinkErrorKind::Unavailable`] to have the event parked as
    /// pending; any other kind drops it.
    fn send(&self, event: &SinkEvent) -> Result<(), SinkError>;

    /// Returns `false` while the sink cannot accept events yet.
    fn is_available(&self) -> bool {
        true
    }

    /// Receives the current analytics permission.
    fn set_analytics_permission(&self, granted: bool);
}

/// Holder for a sink that may be installed after startup.
///
/// The slot remembers the last analytics permission it was given and replays
/// it to a sink installed later, so a late sink never starts with a stale
/// permission.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use consent_core::{RecordingSink, SinkSlot};
///
/// let slot = SinkSlot::new();
/// slot.propagate_permission(true);
/// assert!(!slot.is_available());
///
/// let sink = Rc::new(RecordingSink::new());
/// slot.install(sink.clone());
/// assert!(slot.is_available());
/// assert_eq!(sink.analytics_permission(), Some(true));
/// ```
#[derive(Default)]
pub struct SinkSlot {
    sink: RefCell<Option<Rc<dyn TelemetrySink>>>,
    analytics_permission: Cell<bool>,
}

impl SinkSlot {
    /// Creates an empty slot. Permission starts denied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `sink`, replacing any previous one, and hands it the current
    /// analytics permission.
    pub fn install(&self, sink: Rc<dyn TelemetrySink>) {
        sink.set_analytics_permission(self.analytics_permission.get());
        *self.sink.borrow_mut() = Some(sink);
        tracing::debug!(target: "sink", "telemetry sink installed");
    }

    /// Removes and returns the installed sink.
    pub fn uninstall(&self) -> Option<Rc<dyn TelemetrySink>> {
        self.sink.borrow_mut().take()
    }

    /// Returns `true` if a sink is installed and reports itself available.
    pub fn is_available(&self) -> bool {
        self.current().is_some_and(|sink| sink.is_available())
    }

    /// Returns the last permission propagated through this slot.
    pub fn analytics_permission(&self) -> bool {
        self.analytics_permission.get()
    }

    /// Records `granted` and forwards it to the installed sink, if any.
    pub fn propagate_permission(&self, granted: bool) {
        self.analytics_permission.set(granted);
        if let Some(sink) = self.current() {
            sink.set_analytics_permission(granted);
        }
    }

    /// Sends `event` to the installed sink.
    ///
    /// # Errors
    ///
    /// Returns [`SinkErrorKind::Unavailable`] when no available sink is
    /// installed, otherwise whatever the sink returns.
    pub fn send(&self, event: &SinkEvent) -> Result<(), SinkError> {
        match self.current() {
            Some(sink) if sink.is_available() => sink.send(event),
            _ => Err(SinkError::new(SinkErrorKind::Unavailable)),
        }
    }

    // Clone the handle so no borrow is held while calling into the sink.
    fn current(&self) -> Option<Rc<dyn TelemetrySink>> {
        self.sink.borrow().clone()
    }
}

impl fmt::Debug for SinkSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkSlot")
            .field("installed", &self.sink.borrow().is_some())
            .field("analytics_permission", &self.analytics_permission.get())
            .finish()
    }
}

/// A sink that records delivered events in memory.
///
/// `RecordingSink` is the observable sink used by tests and debug builds.
/// Its availability can be toggled to exercise the pending-event path.
///
/// # Examples
///
/// ```
/// use consent_core::{RecordingSink, SinkEvent, TelemetrySink};
///
/// let sink = RecordingSink::new();
/// let event = SinkEvent {
///     name: "page_view".to_string(),
///     params: Default::default(),
///     sequence: 0,
///     batch_size: 1,
///     was_pending: false,
/// };
/// sink.send(&event).unwrap();
/// assert_eq!(sink.names(), vec!["page_view"]);
/// ```
#[derive(Debug)]
pub struct RecordingSink {
    events: RefCell<Vec<SinkEvent>>,
    available: Cell<bool>,
    permission: Cell<Option<bool>>,
}

impl RecordingSink {
    /// Creates an available, empty sink.
    pub fn new() -> Self {
        Self {
            events: RefCell::new(Vec::new()),
            available: Cell::new(true),
            permission: Cell::new(None),
        }
    }

    /// Creates a sink that is not ready yet.
    pub fn unavailable() -> Self {
        let sink = Self::new();
        sink.available.set(false);
        sink
    }

    /// Toggles availability.
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    /// Returns the number of delivered events.
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    /// Returns `true` if nothing has been delivered.
    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Provides borrowed access to delivered events via callback.
    pub fn with_events<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[SinkEvent]) -> R,
    {
        f(&self.events.borrow())
    }

    /// Returns a snapshot of delivered events.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.borrow().clone()
    }

    /// Returns delivered event names in delivery order.
    pub fn names(&self) -> Vec<String> {
        self.events.borrow().iter().map(|e| e.name.clone()).collect()
    }

    /// Returns the last permission received, or `None` if never told.
    pub fn analytics_permission(&self) -> Option<bool> {
        self.permission.get()
    }

    /// Forgets delivered events.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for RecordingSink {
    fn send(&self, event: &SinkEvent) -> Result<(), SinkError> {
        if !self.available.get() {
            return Err(SinkError::new(SinkErrorKind::Unavailable));
        }
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.get()
    }

    fn set_analytics_permission(&self, granted: bool) {
        self.permission.set(Some(granted));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> SinkEvent {
        SinkEvent {
            name: name.to_string(),
            params: EventParams::new(),
            sequence: 0,
            batch_size: 1,
            was_pending: false,
        }
    }

    #[test]
    fn sink_error_creation() {
        let error = SinkError::new(SinkErrorKind::Rejected);
        assert_eq!(error.kind(), SinkErrorKind::Rejected);
        assert_eq!(error.message(), None);
    }

    #[test]
    fn sink_error_with_message() {
        let error = SinkError::with_message(SinkErrorKind::Io, "connection reset");
        assert_eq!(error.kind(), SinkErrorKind::Io);
        assert_eq!(error.message(), Some("connection reset"));
        assert_eq!(error.to_string(), "sink error (I/O error): connection reset");
    }

    #[test]
    fn empty_slot_reports_unavailable() {
        let slot = SinkSlot::new();
        assert!(!slot.is_available());
        let err = slot.send(&event("x")).unwrap_err();
        assert_eq!(err.kind(), SinkErrorKind::Unavailable);
    }

    #[test]
    fn late_sink_receives_last_permission() {
        let slot = SinkSlot::new();
        slot.propagate_permission(true);
        slot.propagate_permission(false);

        let sink = Rc::new(RecordingSink::new());
        slot.install(sink.clone());
        assert_eq!(sink.analytics_permission(), Some(false));

        slot.propagate_permission(true);
        assert_eq!(sink.analytics_permission(), Some(true));
        assert!(slot.analytics_permission());
    }

    #[test]
    fn slot_forwards_to_installed_sink() {
        let slot = SinkSlot::new();
        let sink = Rc::new(RecordingSink::new());
        slot.install(sink.clone());

        slot.send(&event("page_view")).unwrap();
        assert_eq!(sink.names(), vec!["page_view"]);

        sink.set_available(false);
        assert!(!slot.is_available());
        assert_eq!(
            slot.send(&event("late")).unwrap_err().kind(),
            SinkErrorKind::Unavailable
        );
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn uninstall_returns_sink() {
        let slot = SinkSlot::new();
        slot.install(Rc::new(RecordingSink::new()));
        assert!(slot.uninstall().is_some());
        assert!(!slot.is_available());
    }

    #[test]
    fn recording_sink_access_helpers() {
        let sink = RecordingSink::new();
        assert!(sink.is_empty());
        sink.send(&event("a")).unwrap();
        sink.send(&event("b")).unwrap();

        let count = sink.with_events(|events| events.len());
        assert_eq!(count, 2);
        assert_eq!(sink.events()[1].name, "b");

        sink.clear();
        assert!(sink.is_empty());
    }
}
