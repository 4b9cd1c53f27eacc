use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, TimeDelta, Utc};

use super::event::{BufferedEvent, EventParams, PendingEvent};
use super::timer::DebounceTimer;
use crate::clock::Clock;
use crate::config::TelemetryConfig;
use crate::consent::{ConsentKind, ConsentStore};
use crate::sink::{SinkErrorKind, SinkEvent, SinkSlot};
use crate::storage::{KeyValueStore, Namespace, ScopedStore};
use crate::Error;

/// Storage key of the pending-event queue inside the analytics namespace.
pub const PENDING_KEY: &str = "pending";

/// Lifecycle of the batch buffer.
///
/// ```text
/// Idle --add_event--> Accumulating --size/timer/flush--> Flushing --> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatcherState {
    /// Buffer empty, nothing scheduled
    Idle,
    /// Events buffered, waiting for a trigger
    Accumulating,
    /// A flush is draining a batch
    Flushing,
}

/// Counters kept by the batcher for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Events accepted into the buffer
    pub accepted: u64,
    /// Events dropped as near-duplicates
    pub dropped_duplicate: u64,
    /// Events dropped after the session cap was reached
    pub dropped_session_cap: u64,
    /// Events delivered to the sink from a live batch
    pub sent: u64,
    /// Events discarded because analytics consent was missing
    pub discarded_without_consent: u64,
    /// Events the sink refused or failed to take
    pub send_failures: u64,
    /// Events parked in the pending queue
    pub persisted_pending: u64,
    /// Pending events delivered after the sink became available
    pub forwarded_pending: u64,
    /// Pending events dropped for being too old
    pub expired_pending: u64,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    batch_size: usize,
    max_events: u64,
    debounce: TimeDelta,
    dedup_window: TimeDelta,
    pending_cap: usize,
    pending_max_age: TimeDelta,
}

impl Limits {
    fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_events: config.max_events_per_session,
            debounce: config.debounce(),
            dedup_window: config.dedup_window(),
            pending_cap: config.pending_cap,
            pending_max_age: config.pending_max_age(),
        }
    }
}

/// Buffers telemetry events and flushes them behind the analytics consent
/// check.
///
/// # Triggers
///
/// A flush runs when the buffer reaches `batch_size`, when the debounce
/// deadline (measured from the oldest unflushed event) has passed at the
/// next [`poll`](Self::poll), or on an explicit [`flush`](Self::flush).
///
/// # Reentrancy
///
/// `flush` swaps the buffer out before touching the sink. Events added from
/// inside a sink or consent callback land in the fresh buffer and are never
/// part of the batch being drained.
///
/// # Failure Semantics
///
/// Nothing here returns an error. Storage and sink failures are logged and
/// cost at most the affected events.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use consent_core::{
///     BannerDecision, ConsentStore, EventBatcher, EventParams, MemoryStore, RecordingSink,
///     SinkSlot, SystemClock, TelemetryConfig,
/// };
///
/// let config = TelemetryConfig::default();
/// let backend = Rc::new(MemoryStore::new());
/// let slot = Rc::new(SinkSlot::new());
/// let clock = Rc::new(SystemClock);
/// let consent = Rc::new(ConsentStore::new(backend.clone(), slot.clone(), clock.clone(), &config));
/// let batcher = EventBatcher::new(consent.clone(), slot.clone(), backend, clock, &config);
///
/// let sink = Rc::new(RecordingSink::new());
/// slot.install(sink.clone());
/// consent.decide(BannerDecision::AcceptAll);
///
/// batcher.add_event("page_view", EventParams::new());
/// batcher.flush();
/// assert_eq!(sink.names(), vec!["page_view"]);
/// ```
#[derive(Debug)]
pub struct EventBatcher {
    consent: Rc<ConsentStore>,
    sink: Rc<SinkSlot>,
    storage: ScopedStore,
    clock: Rc<dyn Clock>,
    limits: Limits,
    buffer: RefCell<Vec<BufferedEvent>>,
    last_accepted: RefCell<HashMap<String, DateTime<Utc>>>,
    timer: Cell<DebounceTimer>,
    next_sequence: Cell<u64>,
    flushing: Cell<bool>,
    pending_dirty: Cell<bool>,
    stats: Cell<BatcherStats>,
}

impl EventBatcher {
    /// Creates a batcher reading permission from `consent`, delivering to
    /// `sink`, and parking pending events in the analytics namespace of
    /// `backend`.
    pub fn new(
        consent: Rc<ConsentStore>,
        sink: Rc<SinkSlot>,
        backend: Rc<dyn KeyValueStore>,
        clock: Rc<dyn Clock>,
        config: &TelemetryConfig,
    ) -> Self {
        Self {
            consent,
            sink,
            storage: ScopedStore::new(backend, Namespace::Analytics),
            clock,
            limits: Limits::from_config(config),
            buffer: RefCell::new(Vec::new()),
            last_accepted: RefCell::new(HashMap::new()),
            timer: Cell::new(DebounceTimer::new()),
            next_sequence: Cell::new(0),
            flushing: Cell::new(false),
            // Unknown until checked: an earlier session may have left events.
            pending_dirty: Cell::new(true),
            stats: Cell::new(BatcherStats::default()),
        }
    }

    /// Offers an event to the buffer.
    ///
    /// The event is dropped when the session cap is reached or an event of
    /// the same name was accepted within the dedup window. Accepted events
    /// get the next session sequence number; reaching `batch_size` flushes
    /// immediately, otherwise the debounce deadline is armed if idle.
    /// NaN and infinite float parameters are removed so the event can still
    /// be parked.
    ///
    /// Returns `true` if the event was accepted.
    pub fn add_event(&self, name: impl Into<String>, mut params: EventParams) -> bool {
        let name = name.into();
        let now = self.clock.now();

        if self.next_sequence.get() >= self.limits.max_events {
            self.record(|s| s.dropped_session_cap += 1);
            tracing::debug!(target: "event_batcher", event = %name, "session cap reached, dropping event");
            return false;
        }

        if self.is_duplicate(&name, now) {
            self.record(|s| s.dropped_duplicate += 1);
            tracing::debug!(target: "event_batcher", event = %name, "duplicate within window, dropping event");
            return false;
        }

        params.retain(|key, value| {
            let finite = value.is_finite();
            if !finite {
                tracing::debug!(target: "event_batcher", event = %name, param = %key, "dropping non-finite parameter");
            }
            finite
        });

        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence + 1);
        self.last_accepted.borrow_mut().insert(name.clone(), now);

        let buffered = {
            let mut buffer = self.buffer.borrow_mut();
            buffer.push(BufferedEvent {
                name,
                params,
                enqueued_at: now,
                sequence,
            });
            buffer.len()
        };
        self.record(|s| s.accepted += 1);

        if buffered >= self.limits.batch_size && !self.flushing.get() {
            self.flush();
        } else {
            let debounce = self.limits.debounce;
            self.update_timer(|timer| {
                timer.arm_if_idle(now, debounce);
            });
        }
        true
    }

    /// Drains the buffer.
    ///
    /// Events are handled in enqueue order. Each one is checked against
    /// analytics consent and discarded if denied. Consented events go to the
    /// sink; once the sink is unavailable, the rest of the consented events
    /// are parked in the pending queue. Cancels the debounce deadline.
    pub fn flush(&self) {
        if self.flushing.get() {
            return;
        }

        let batch = std::mem::take(&mut *self.buffer.borrow_mut());
        self.update_timer(DebounceTimer::cancel);
        if batch.is_empty() {
            return;
        }

        self.flushing.set(true);
        let now = self.clock.now();
        let batch_size = batch.len();
        let mut undelivered = Vec::new();
        let (mut sent, mut discarded, mut failed) = (0u64, 0u64, 0u64);

        for event in batch {
            if !self.consent.has(ConsentKind::Analytics) {
                discarded += 1;
                continue;
            }
            if !undelivered.is_empty() || !self.sink.is_available() {
                undelivered.push(event);
                continue;
            }
            match self.sink.send(&sink_event(&event, batch_size, false)) {
                Ok(()) => sent += 1,
                Err(err) if err.kind() == SinkErrorKind::Unavailable => undelivered.push(event),
                Err(err) => {
                    failed += 1;
                    tracing::debug!(
                        target: "event_batcher",
                        event = %event.name,
                        error = %err,
                        "sink refused event"
                    );
                }
            }
        }

        let parked = undelivered.len();
        if parked > 0 {
            self.persist_pending(undelivered, now);
        }
        self.prune_dedup(now);
        self.record(|s| {
            s.sent += sent;
            s.discarded_without_consent += discarded;
            s.send_failures += failed;
        });
        self.flushing.set(false);

        tracing::debug!(
            target: "event_batcher",
            batch_size,
            sent,
            discarded,
            failed,
            parked,
            "flushed batch"
        );

        // Callbacks may have refilled the buffer past the threshold.
        if self.buffer.borrow().len() >= self.limits.batch_size {
            self.flush();
        }
    }

    /// Host event-loop hook.
    ///
    /// Forwards the pending queue the first time the sink is seen available
    /// after events were parked (or at startup), then runs the debounced
    /// flush if its deadline has passed.
    pub fn poll(&self) {
        if self.pending_dirty.get() && self.sink.is_available() {
            self.send_pending_events();
        }
        if self.timer.get().is_due(self.clock.now()) {
            self.flush();
        }
    }

    /// Forwards parked events to the sink.
    ///
    /// Only events younger than the pending max age that still have
    /// analytics consent are forwarded, marked `was_pending`. The queue is
    /// cleared before forwarding, so each parked event is delivered at most
    /// once. A malformed queue is discarded. Does nothing while the sink is
    /// unavailable.
    ///
    /// Returns the number of events forwarded.
    pub fn send_pending_events(&self) -> usize {
        if !self.sink.is_available() {
            return 0;
        }

        let pending = match self.read_pending() {
            Ok(pending) => pending,
            Err(err) if err.is_malformed() => {
                tracing::warn!(target: "event_batcher", error = %err, "discarding malformed pending queue");
                self.clear_pending();
                self.pending_dirty.set(false);
                return 0;
            }
            Err(err) => {
                tracing::warn!(target: "event_batcher", error = %err, "pending queue unreadable");
                return 0;
            }
        };
        self.pending_dirty.set(false);
        if pending.is_empty() {
            return 0;
        }
        self.clear_pending();

        let now = self.clock.now();
        let total = pending.len();
        let (mut forwarded, mut expired, mut discarded, mut failed) = (0usize, 0u64, 0u64, 0u64);

        for PendingEvent { event, stored_at } in pending {
            if now - stored_at >= self.limits.pending_max_age {
                expired += 1;
                continue;
            }
            if !self.consent.has(ConsentKind::Analytics) {
                discarded += 1;
                continue;
            }
            match self.sink.send(&sink_event(&event, total, true)) {
                Ok(()) => forwarded += 1,
                Err(err) => {
                    failed += 1;
                    tracing::debug!(
                        target: "event_batcher",
                        event = %event.name,
                        error = %err,
                        "pending event not delivered"
                    );
                }
            }
        }

        self.record(|s| {
            s.forwarded_pending += forwarded as u64;
            s.expired_pending += expired;
            s.discarded_without_consent += discarded;
            s.send_failures += failed;
        });
        tracing::info!(
            target: "event_batcher",
            forwarded,
            expired,
            discarded,
            failed,
            "pending events replayed"
        );
        forwarded
    }

    /// Flushes whatever is buffered. Called on teardown; with the sink
    /// unavailable the remainder is parked for the next session.
    pub fn shutdown(&self) {
        tracing::debug!(
            target: "event_batcher",
            buffered = self.buffered_len(),
            "shutting down"
        );
        self.flush();
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> BatcherState {
        if self.flushing.get() {
            BatcherState::Flushing
        } else if self.buffer.borrow().is_empty() {
            BatcherState::Idle
        } else {
            BatcherState::Accumulating
        }
    }

    /// Returns the number of buffered events.
    pub fn buffered_len(&self) -> usize {
        self.buffer.borrow().len()
    }

    /// Returns a snapshot of the buffered events.
    pub fn buffered(&self) -> Vec<BufferedEvent> {
        self.buffer.borrow().clone()
    }

    /// Returns the number of events accepted this session.
    pub fn session_event_count(&self) -> u64 {
        self.next_sequence.get()
    }

    /// Returns when the debounced flush is due, if armed.
    pub fn next_flush_at(&self) -> Option<DateTime<Utc>> {
        self.timer.get().deadline()
    }

    /// Returns the diagnostic counters.
    pub fn stats(&self) -> BatcherStats {
        self.stats.get()
    }

    fn is_duplicate(&self, name: &str, now: DateTime<Utc>) -> bool {
        self.last_accepted
            .borrow()
            .get(name)
            .is_some_and(|at| now - *at < self.limits.dedup_window)
    }

    fn prune_dedup(&self, now: DateTime<Utc>) {
        let window = self.limits.dedup_window;
        self.last_accepted
            .borrow_mut()
            .retain(|_, at| now - *at < window);
    }

    // Entries are decoded one by one so a single unreadable entry costs only
    // itself.
    fn read_pending(&self) -> Result<Vec<PendingEvent>, Error> {
        let entries: Vec<serde_json::Value> =
            self.storage.get_json(PENDING_KEY)?.unwrap_or_default();
        let total = entries.len();
        let pending: Vec<PendingEvent> = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();
        if pending.len() < total {
            tracing::warn!(
                target: "event_batcher",
                skipped = total - pending.len(),
                "skipping unreadable pending entries"
            );
        }
        Ok(pending)
    }

    fn persist_pending(&self, events: Vec<BufferedEvent>, now: DateTime<Utc>) {
        let mut pending = match self.read_pending() {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(target: "event_batcher", error = %err, "replacing unreadable pending queue");
                Vec::new()
            }
        };

        let max_age = self.limits.pending_max_age;
        pending.retain(|p| now - p.stored_at < max_age);

        let parked = events.len() as u64;
        pending.extend(
            events
                .into_iter()
                .map(|event| PendingEvent { event, stored_at: now }),
        );
        let overflow = pending.len().saturating_sub(self.limits.pending_cap);
        pending.drain(..overflow);

        let result = if pending.is_empty() {
            self.storage.remove(PENDING_KEY).map_err(Error::from)
        } else {
            self.storage.set_json(PENDING_KEY, &pending)
        };

        match result {
            Ok(()) => {
                self.pending_dirty.set(true);
                self.record(|s| s.persisted_pending += parked);
                tracing::debug!(
                    target: "event_batcher",
                    parked,
                    queued = pending.len(),
                    "sink unavailable, events parked"
                );
            }
            Err(err) => {
                tracing::warn!(target: "event_batcher", error = %err, "failed to park pending events");
            }
        }
    }

    fn clear_pending(&self) {
        if let Err(err) = self.storage.remove(PENDING_KEY) {
            tracing::warn!(target: "event_batcher", error = %err, "failed to clear pending queue");
        }
    }

    fn update_timer(&self, update: impl FnOnce(&mut DebounceTimer)) {
        let mut timer = self.timer.get();
        update(&mut timer);
        self.timer.set(timer);
    }

    fn record(&self, update: impl FnOnce(&mut BatcherStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }
}

fn sink_event(event: &BufferedEvent, batch_size: usize, was_pending: bool) -> SinkEvent {
    SinkEvent {
        name: event.name.clone(),
        params: event.params.clone(),
        sequence: event.sequence,
        batch_size,
        was_pending,
    }
}
