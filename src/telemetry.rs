use std::rc::Rc;

use crate::batch::EventBatcher;
use crate::clock::{Clock, SystemClock};
use crate::config::TelemetryConfig;
use crate::consent::{ConsentChange, ConsentKind, ConsentStore};
use crate::sink::{SinkSlot, TelemetrySink};
use crate::storage::{purge_stale, KeyValueStore, MemoryStore, Namespace, ScopedStore};
use crate::tracker::Tracker;
use crate::Error;

/// Builder for a [`Telemetry`] session.
///
/// `TelemetryBuilder` is the only place the components are constructed. It
/// validates the configuration and shares one storage backend, one clock and
/// one sink slot between the consent store and the batcher.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use consent_core::{
///     BannerDecision, MemoryStore, RecordingSink, TelemetryBuilder, TelemetryConfig,
/// };
///
/// let sink = Rc::new(RecordingSink::new());
/// let telemetry = TelemetryBuilder::new(TelemetryConfig::default())
///     .storage(Rc::new(MemoryStore::new()))
///     .sink(sink.clone())
///     .build()
///     .expect("default config is valid");
///
/// assert!(telemetry.initialize());
/// telemetry.consent().decide(BannerDecision::AcceptAll);
/// telemetry.tracker().track("page_view", "navigation", None, None);
/// telemetry.shutdown();
///
/// assert_eq!(sink.names(), vec!["page_view"]);
/// ```
pub struct TelemetryBuilder {
    config: TelemetryConfig,
    storage: Option<Rc<dyn KeyValueStore>>,
    clock: Option<Rc<dyn Clock>>,
    sink: Option<Rc<dyn TelemetrySink>>,
}

impl TelemetryBuilder {
    /// Creates a builder for `config`.
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            storage: None,
            clock: None,
            sink: None,
        }
    }

    /// Sets the durable storage backend. Defaults to a session-only
    /// [`MemoryStore`].
    pub fn storage(mut self, storage: Rc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the clock. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Installs a sink from the start. A sink can also be installed later
    /// with [`Telemetry::install_sink`].
    pub fn sink(mut self, sink: Rc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validates the configuration and wires the components.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is unusable.
    pub fn build(self) -> Result<Telemetry, Error> {
        self.config.validate()?;

        let backend: Rc<dyn KeyValueStore> = match self.storage {
            Some(storage) => storage,
            None => {
                tracing::debug!(target: "storage", "no backend configured, using session-only memory store");
                Rc::new(MemoryStore::new())
            }
        };
        let clock: Rc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Rc::new(SystemClock),
        };
        let slot = Rc::new(SinkSlot::new());
        if let Some(sink) = self.sink {
            slot.install(sink);
        }

        let consent = Rc::new(ConsentStore::new(
            backend.clone(),
            slot.clone(),
            clock.clone(),
            &self.config,
        ));
        let batcher = Rc::new(EventBatcher::new(
            consent.clone(),
            slot.clone(),
            backend.clone(),
            clock.clone(),
            &self.config,
        ));

        // Replay parked events as soon as analytics is granted, without
        // waiting for the next poll.
        let weak_batcher = Rc::downgrade(&batcher);
        let weak_consent = Rc::downgrade(&consent);
        consent.subscribe(move |change| {
            if !matches!(change, ConsentChange::Updated(_)) {
                return;
            }
            let granted = weak_consent
                .upgrade()
                .is_some_and(|consent| consent.has(ConsentKind::Analytics));
            if let (true, Some(batcher)) = (granted, weak_batcher.upgrade()) {
                batcher.send_pending_events();
            }
        });

        Ok(Telemetry {
            config: self.config,
            backend,
            clock,
            sink: slot,
            tracker: Tracker::new(batcher.clone()),
            consent,
            batcher,
        })
    }
}

/// A wired consent and telemetry session.
///
/// Hands out shared references to the components; there is no global state.
pub struct Telemetry {
    config: TelemetryConfig,
    backend: Rc<dyn KeyValueStore>,
    clock: Rc<dyn Clock>,
    sink: Rc<SinkSlot>,
    consent: Rc<ConsentStore>,
    batcher: Rc<EventBatcher>,
    tracker: Tracker,
}

impl Telemetry {
    /// Starts the session.
    ///
    /// Sweeps both namespaces for entries past the retention window, brings
    /// the consent store up and replays pending events if a sink is ready.
    ///
    /// Returns `true` if the consent banner should be shown.
    pub fn initialize(&self) -> bool {
        let now = self.clock.now();
        let retention = self.config.data_retention();
        let purged: usize = Namespace::ALL
            .into_iter()
            .map(|namespace| {
                purge_stale(
                    &ScopedStore::new(self.backend.clone(), namespace),
                    retention,
                    now,
                )
            })
            .sum();

        let needs_decision = self.consent.initialize();
        self.batcher.poll();

        tracing::info!(
            target: "consent_store",
            needs_decision,
            purged,
            "telemetry initialized"
        );
        needs_decision
    }

    /// Installs a sink after startup and replays pending events into it.
    pub fn install_sink(&self, sink: Rc<dyn TelemetrySink>) {
        self.sink.install(sink);
        self.batcher.poll();
    }

    /// Host event-loop hook; see [`EventBatcher::poll`].
    pub fn poll(&self) {
        self.batcher.poll();
    }

    /// Flushes buffered events on teardown.
    pub fn shutdown(&self) {
        self.batcher.shutdown();
    }

    /// Returns the consent store.
    pub fn consent(&self) -> &Rc<ConsentStore> {
        &self.consent
    }

    /// Returns the event batcher.
    pub fn batcher(&self) -> &Rc<EventBatcher> {
        &self.batcher
    }

    /// Returns the call-site tracking helpers.
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Returns the sink slot.
    pub fn sink_slot(&self) -> &Rc<SinkSlot> {
        &self.sink
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Returns the developer console helpers.
    #[cfg(any(debug_assertions, feature = "debug-tools"))]
    pub fn debug_tools(&self) -> crate::DebugTools<'_> {
        crate::DebugTools::new(&self.consent)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    use super::*;
    use crate::batch::EventParams;
    use crate::clock::ManualClock;
    use crate::consent::BannerDecision;
    use crate::sink::RecordingSink;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 9, 0, 0).unwrap()
    }

    fn build(backend: Rc<MemoryStore>, clock: Rc<ManualClock>) -> Telemetry {
        TelemetryBuilder::new(TelemetryConfig::default())
            .storage(backend)
            .clock(clock)
            .build()
            .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = TelemetryBuilder::new(TelemetryConfig {
            batch_size: 0,
            ..TelemetryConfig::default()
        })
        .build();

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn components_share_one_backend() {
        let backend = Rc::new(MemoryStore::new());
        let telemetry = build(backend.clone(), Rc::new(ManualClock::new(t0())));

        telemetry.consent().decide(BannerDecision::AcceptAll);
        telemetry
            .batcher()
            .add_event("page_view", EventParams::new());
        telemetry.shutdown();

        let mut keys = backend.keys().unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["analytics_pending".to_string(), "privacy_consent".to_string()]
        );
    }

    #[test]
    fn initialize_purges_entries_past_retention() {
        let backend = Rc::new(MemoryStore::new());
        let old = (t0() - TimeDelta::days(1200)).to_rfc3339();
        backend
            .set("analytics_session", &format!(r#"{{"timestamp":"{old}"}}"#))
            .unwrap();
        backend.set("analytics_garbage", "not json").unwrap();
        backend.set("unrelated", "not json either").unwrap();

        let telemetry = build(backend.clone(), Rc::new(ManualClock::new(t0())));
        assert!(telemetry.initialize());

        assert_eq!(backend.keys().unwrap(), vec!["unrelated".to_string()]);
    }

    #[test]
    fn late_sink_receives_parked_events_and_permission() {
        let backend = Rc::new(MemoryStore::new());
        let telemetry = build(backend, Rc::new(ManualClock::new(t0())));
        telemetry.initialize();
        telemetry.consent().decide(BannerDecision::AcceptAll);

        telemetry.tracker().track("cta_click", "engagement", Some("hero"), None);
        telemetry.batcher().flush();

        let sink = Rc::new(RecordingSink::new());
        telemetry.install_sink(sink.clone());

        assert_eq!(sink.analytics_permission(), Some(true));
        assert_eq!(sink.names(), vec!["cta_click"]);
        assert!(sink.events()[0].was_pending);
    }

    #[test]
    fn granting_consent_replays_pending_queue() {
        let sink = Rc::new(RecordingSink::unavailable());
        let telemetry = TelemetryBuilder::new(TelemetryConfig::default())
            .storage(Rc::new(MemoryStore::new()))
            .clock(Rc::new(ManualClock::new(t0())))
            .sink(sink.clone())
            .build()
            .unwrap();
        telemetry.initialize();
        telemetry.consent().decide(BannerDecision::AcceptAll);
        telemetry.batcher().add_event("page_view", EventParams::new());
        telemetry.batcher().flush();
        assert!(sink.is_empty());

        sink.set_available(true);
        telemetry.consent().decide(BannerDecision::Custom {
            analytics: true,
            marketing: false,
        });

        assert_eq!(sink.names(), vec!["page_view"]);
        assert!(sink.events()[0].was_pending);
    }

    #[test]
    fn huge_retention_override_does_not_break_startup() {
        let config = TelemetryConfig::default().with_overrides_from(|name| {
            (name == "CONSENT_CORE_DATA_RETENTION_DAYS").then(|| "4000000000".to_string())
        });
        assert_eq!(config.data_retention_days, 4_000_000_000);

        let backend = Rc::new(MemoryStore::new());
        backend
            .set("privacy_marker", r#"{"timestamp":"2001-01-01T00:00:00Z"}"#)
            .unwrap();
        let telemetry = TelemetryBuilder::new(config)
            .storage(backend.clone())
            .clock(Rc::new(ManualClock::new(t0())))
            .build()
            .unwrap();

        assert!(telemetry.initialize());
        assert!(backend.get("privacy_marker").unwrap().is_some());
    }

    #[test]
    fn opted_out_grant_leaves_pending_queue_alone() {
        let backend = Rc::new(MemoryStore::new());
        let sink = Rc::new(RecordingSink::unavailable());
        let telemetry = TelemetryBuilder::new(TelemetryConfig {
            analytics_opt_out: true,
            ..TelemetryConfig::default()
        })
        .storage(backend.clone())
        .clock(Rc::new(ManualClock::new(t0())))
        .sink(sink.clone())
        .build()
        .unwrap();
        telemetry.initialize();
        let parked = r#"[{"event":{"name":"page_view","params":{},"enqueued_at":"2025-08-01T09:00:00Z","sequence":0},"stored_at":"2025-08-01T09:00:00Z"}]"#;
        backend.set("analytics_pending", parked).unwrap();

        sink.set_available(true);
        telemetry.consent().decide(BannerDecision::AcceptAll);

        assert!(sink.is_empty());
        assert_eq!(
            backend.get("analytics_pending").unwrap().as_deref(),
            Some(parked)
        );
    }

    #[test]
    fn skip_banner_grants_without_decision() {
        let telemetry = TelemetryBuilder::new(TelemetryConfig {
            skip_banner: true,
            ..TelemetryConfig::default()
        })
        .build()
        .unwrap();

        assert!(!telemetry.initialize());
        assert!(telemetry.consent().has(ConsentKind::Analytics));
    }
}
