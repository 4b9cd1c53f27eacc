use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::observers::Observers;
use super::{BannerDecision, ConsentChange, ConsentKind, ConsentRecord, SubscriptionId};
use crate::clock::Clock;
use crate::config::TelemetryConfig;
use crate::sink::SinkSlot;
use crate::storage::{KeyValueStore, Namespace, ScopedStore};

/// Storage key of the consent record inside the consent namespace.
pub const CONSENT_KEY: &str = "consent";

/// The single source of truth for tracking permission.
///
/// `ConsentStore` persists the user's decision, answers permission queries,
/// pushes the analytics permission into the [`SinkSlot`] and notifies
/// subscribers of every change.
///
/// # Failure Semantics
///
/// No method returns an error. Storage read failures, malformed and expired
/// records all read as "no decision", which denies every category.
/// Write failures are logged and the decision applies for the rest of the
/// session only.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use consent_core::{
///     BannerDecision, ConsentKind, ConsentStore, MemoryStore, SinkSlot, SystemClock,
///     TelemetryConfig,
/// };
///
/// let store = ConsentStore::new(
///     Rc::new(MemoryStore::new()),
///     Rc::new(SinkSlot::new()),
///     Rc::new(SystemClock),
///     &TelemetryConfig::default(),
/// );
///
/// assert!(!store.has(ConsentKind::Analytics));
/// store.decide(BannerDecision::AcceptAll);
/// assert!(store.has(ConsentKind::Analytics));
/// ```
#[derive(Debug)]
pub struct ConsentStore {
    storage: ScopedStore,
    sink: Rc<SinkSlot>,
    clock: Rc<dyn Clock>,
    expiration: TimeDelta,
    version: String,
    skip_banner: bool,
    analytics_opt_out: bool,
    cached: RefCell<Option<ConsentRecord>>,
    loaded: Cell<bool>,
    observers: Observers,
}

impl ConsentStore {
    /// Creates a store over the consent namespace of `backend`.
    ///
    /// Nothing is read until the first query or [`initialize`](Self::initialize).
    pub fn new(
        backend: Rc<dyn KeyValueStore>,
        sink: Rc<SinkSlot>,
        clock: Rc<dyn Clock>,
        config: &TelemetryConfig,
    ) -> Self {
        Self {
            storage: ScopedStore::new(backend, Namespace::Consent),
            sink,
            clock,
            expiration: config.consent_expiration(),
            version: config.consent_version.clone(),
            skip_banner: config.skip_banner,
            analytics_opt_out: config.analytics_opt_out,
            cached: RefCell::new(None),
            loaded: Cell::new(false),
            observers: Observers::default(),
        }
    }

    /// Brings the store up at application start.
    ///
    /// With `skip_banner` set, an all-granting record is recorded right away.
    /// Otherwise the stored record is loaded and its analytics permission is
    /// pushed to the sink.
    ///
    /// Returns `true` if the user still has to make a banner decision.
    pub fn initialize(&self) -> bool {
        if self.skip_banner {
            let record = ConsentRecord::accept_all(self.clock.now(), self.version.clone());
            self.set(record);
            return false;
        }

        let record = self.load();
        self.sink
            .propagate_permission(record.as_ref().is_some_and(|r| self.analytics_allowed(r)));
        record.is_none()
    }

    /// Reads the decision from storage.
    ///
    /// Returns `None` if the record is absent, malformed, expired, or storage
    /// cannot be read. A malformed record is removed; a record stored with
    /// `functional` off is corrected and written back. The result also
    /// replaces the in-memory copy used by [`has`](Self::has).
    pub fn load(&self) -> Option<ConsentRecord> {
        let now = self.clock.now();
        let record = match self.storage.get_json::<ConsentRecord>(CONSENT_KEY) {
            Ok(record) => record,
            Err(err) if err.is_malformed() => {
                tracing::warn!(
                    target: "consent_store",
                    error = %err,
                    "discarding malformed consent record"
                );
                if let Err(err) = self.storage.remove(CONSENT_KEY) {
                    tracing::warn!(target: "consent_store", error = %err, "failed to remove consent record");
                }
                None
            }
            Err(err) => {
                tracing::warn!(
                    target: "consent_store",
                    error = %err,
                    "consent storage unreadable, treating as no consent"
                );
                None
            }
        };

        let record = record.filter(|r| {
            let valid = r.is_valid_at(now, self.expiration);
            if !valid {
                tracing::debug!(
                    target: "consent_store",
                    recorded_at = %r.timestamp,
                    "stored consent expired"
                );
            }
            valid
        });

        let record = record.map(|stored| {
            let (record, corrected) = stored.normalized();
            if corrected {
                tracing::debug!(target: "consent_store", "stored record had functional off, correcting");
                if let Err(err) = self.storage.set_json(CONSENT_KEY, &record) {
                    tracing::warn!(target: "consent_store", error = %err, "failed to rewrite consent record");
                }
            }
            record
        });

        *self.cached.borrow_mut() = record.clone();
        self.loaded.set(true);
        record
    }

    /// Records a decision.
    ///
    /// `functional` is forced on. The record is written to storage, the
    /// analytics permission is pushed to the sink before this returns, and
    /// subscribers receive [`ConsentChange::Updated`].
    pub fn set(&self, record: ConsentRecord) {
        let (record, corrected) = record.normalized();
        if corrected {
            tracing::debug!(target: "consent_store", "functional consent forced on");
        }

        if let Err(err) = self.storage.set_json(CONSENT_KEY, &record) {
            tracing::warn!(
                target: "consent_store",
                error = %err,
                "failed to persist consent; decision applies to this session only"
            );
        }

        *self.cached.borrow_mut() = Some(record.clone());
        self.loaded.set(true);

        let analytics = self.analytics_allowed(&record);
        self.sink.propagate_permission(analytics);

        tracing::info!(
            target: "consent_store",
            analytics,
            marketing = record.marketing,
            version = %record.version,
            "consent updated"
        );
        self.observers.notify(&ConsentChange::Updated(record));
    }

    /// Records a banner decision stamped with the current time and the
    /// configured policy version. Returns the stored record.
    pub fn decide(&self, decision: BannerDecision) -> ConsentRecord {
        let record = decision.into_record(self.clock.now(), self.version.clone());
        self.set(record.clone());
        record
    }

    /// Returns whether `kind` is currently permitted.
    ///
    /// `false` when no valid decision exists. Analytics is also `false`
    /// whenever the analytics opt-out is configured.
    pub fn has(&self, kind: ConsentKind) -> bool {
        self.current().is_some_and(|record| match kind {
            ConsentKind::Analytics => self.analytics_allowed(&record),
            other => record.allows(other),
        })
    }

    /// Returns the current valid decision, if any.
    pub fn current(&self) -> Option<ConsentRecord> {
        if !self.loaded.get() {
            return self.load();
        }
        let now = self.clock.now();
        self.cached
            .borrow()
            .as_ref()
            .filter(|r| r.is_valid_at(now, self.expiration))
            .cloned()
    }

    /// Returns `true` if the banner should be shown.
    pub fn needs_decision(&self) -> bool {
        self.current().is_none()
    }

    /// Withdraws the decision.
    ///
    /// Clears the stored record, pushes a denied analytics permission to the
    /// sink and notifies [`ConsentChange::Revoked`]. Showing the banner again
    /// is left to subscribers.
    pub fn revoke(&self) {
        if let Err(err) = self.storage.remove(CONSENT_KEY) {
            tracing::warn!(target: "consent_store", error = %err, "failed to remove consent record");
        }
        self.forget();
        tracing::info!(target: "consent_store", "consent revoked");
        self.observers.notify(&ConsentChange::Revoked);
    }

    /// Registers `callback` for consent changes.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ConsentChange) + 'static,
    {
        self.observers.subscribe(callback)
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Asks subscribers to show the consent banner.
    pub fn request_banner(&self) {
        self.observers.notify(&ConsentChange::BannerRequested);
    }

    /// Exports the current decision and every stored consent and analytics
    /// entry as pretty-printed JSON.
    pub fn export_user_data(&self) -> String {
        let mut storage = BTreeMap::new();
        for namespace in Namespace::ALL {
            match self.storage.sibling(namespace).entries() {
                Ok(entries) => storage.extend(entries),
                Err(err) => tracing::warn!(
                    target: "consent_store",
                    namespace = %namespace,
                    error = %err,
                    "export skipped unreadable namespace"
                ),
            }
        }

        let export = UserDataExport {
            consent: self.current(),
            storage,
            exported_at: self.clock.now(),
        };
        match serde_json::to_string_pretty(&export) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(target: "consent_store", error = %err, "failed to encode export");
                "{}".to_string()
            }
        }
    }

    /// Deletes every consent and analytics entry and forgets the decision.
    ///
    /// Subscribers receive [`ConsentChange::Revoked`].
    pub fn delete_all_user_data(&self) {
        for namespace in Namespace::ALL {
            match self.storage.sibling(namespace).clear() {
                Ok(removed) => tracing::debug!(
                    target: "consent_store",
                    namespace = %namespace,
                    removed,
                    "cleared namespace"
                ),
                Err(err) => tracing::warn!(
                    target: "consent_store",
                    namespace = %namespace,
                    error = %err,
                    "failed to clear namespace"
                ),
            }
        }
        self.forget();
        tracing::info!(target: "consent_store", "user data deleted");
        self.observers.notify(&ConsentChange::Revoked);
    }

    fn forget(&self) {
        *self.cached.borrow_mut() = None;
        self.loaded.set(true);
        self.sink.propagate_permission(false);
    }

    fn analytics_allowed(&self, record: &ConsentRecord) -> bool {
        record.analytics && !self.analytics_opt_out
    }
}

#[derive(Serialize)]
struct UserDataExport {
    consent: Option<ConsentRecord>,
    storage: BTreeMap<String, String>,
    exported_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::sink::RecordingSink;
    use crate::storage::MemoryStore;

    struct Fixture {
        backend: Rc<MemoryStore>,
        clock: Rc<ManualClock>,
        slot: Rc<SinkSlot>,
        store: ConsentStore,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
    }

    fn fixture_with(config: TelemetryConfig) -> Fixture {
        let backend = Rc::new(MemoryStore::new());
        let clock = Rc::new(ManualClock::new(t0()));
        let slot = Rc::new(SinkSlot::new());
        let store = ConsentStore::new(backend.clone(), slot.clone(), clock.clone(), &config);
        Fixture {
            backend,
            clock,
            slot,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(TelemetryConfig::default())
    }

    #[test]
    fn empty_storage_denies_everything() {
        let f = fixture();
        assert!(f.store.load().is_none());
        assert!(!f.store.has(ConsentKind::Analytics));
        assert!(!f.store.has(ConsentKind::Functional));
        assert!(!f.store.has(ConsentKind::Marketing));
        assert!(f.store.needs_decision());
    }

    #[test]
    fn set_forces_functional_and_round_trips() {
        let f = fixture();
        let input = ConsentRecord {
            analytics: true,
            functional: false,
            marketing: false,
            timestamp: t0(),
            version: "1.0".to_string(),
        };

        f.store.set(input.clone());

        let loaded = f.store.load().unwrap();
        assert_eq!(
            loaded,
            ConsentRecord {
                functional: true,
                ..input
            }
        );
        let raw = f.backend.get("privacy_consent").unwrap().unwrap();
        assert!(raw.contains(r#""functional":true"#));
    }

    #[test]
    fn expired_record_loads_as_none() {
        let f = fixture();
        f.store.decide(BannerDecision::AcceptAll);

        f.clock.advance(TimeDelta::days(365));
        assert!(f.store.load().is_none());
        assert!(!f.store.has(ConsentKind::Analytics));
    }

    #[test]
    fn cached_record_expires_without_reload() {
        let f = fixture();
        f.store.decide(BannerDecision::AcceptAll);
        assert!(f.store.has(ConsentKind::Marketing));

        f.clock.advance(TimeDelta::days(400));
        assert!(!f.store.has(ConsentKind::Marketing));
    }

    #[test]
    fn stored_record_without_functional_is_corrected_on_load() {
        let f = fixture();
        f.backend
            .set(
                "privacy_consent",
                r#"{"analytics":true,"functional":false,"marketing":false,"timestamp":"2025-04-01T11:00:00Z","version":"1.0"}"#,
            )
            .unwrap();

        let loaded = f.store.load().unwrap();

        assert!(loaded.functional);
        assert!(loaded.analytics);
        assert!(f.store.has(ConsentKind::Functional));
        let raw = f.backend.get("privacy_consent").unwrap().unwrap();
        assert!(raw.contains(r#""functional":true"#));
    }

    #[test]
    fn malformed_record_is_discarded() {
        let f = fixture();
        f.backend.set("privacy_consent", "{\"analytics\": tru").unwrap();

        assert!(f.store.load().is_none());
        assert!(f.backend.get("privacy_consent").unwrap().is_none());
    }

    #[test]
    fn unreadable_storage_fails_closed() {
        let f = fixture();
        f.store.decide(BannerDecision::AcceptAll);
        f.backend.set_enabled(false);

        assert!(f.store.load().is_none());
        assert!(!f.store.has(ConsentKind::Analytics));
    }

    #[test]
    fn failed_write_still_applies_for_session() {
        let f = fixture();
        f.backend.set_enabled(false);

        f.store.decide(BannerDecision::RejectAll);

        assert!(f.store.has(ConsentKind::Functional));
        assert!(!f.store.has(ConsentKind::Analytics));
    }

    #[test]
    fn set_propagates_permission_before_returning() {
        let f = fixture();
        let sink = Rc::new(RecordingSink::new());
        f.slot.install(sink.clone());
        assert_eq!(sink.analytics_permission(), Some(false));

        f.store.decide(BannerDecision::AcceptAll);
        assert_eq!(sink.analytics_permission(), Some(true));

        f.store.decide(BannerDecision::Custom {
            analytics: false,
            marketing: true,
        });
        assert_eq!(sink.analytics_permission(), Some(false));
    }

    #[test]
    fn revoke_clears_storage_and_notifies() {
        let f = fixture();
        let changes = Rc::new(RefCell::new(Vec::new()));
        let seen = changes.clone();
        f.store
            .subscribe(move |change| seen.borrow_mut().push(change.clone()));

        let record = f.store.decide(BannerDecision::AcceptAll);
        f.store.revoke();

        assert!(f.backend.get("privacy_consent").unwrap().is_none());
        assert!(!f.slot.analytics_permission());
        assert!(f.store.needs_decision());
        assert_eq!(
            *changes.borrow(),
            vec![ConsentChange::Updated(record), ConsentChange::Revoked]
        );
    }

    #[test]
    fn skip_banner_grants_everything_on_initialize() {
        let f = fixture_with(TelemetryConfig {
            skip_banner: true,
            ..TelemetryConfig::default()
        });

        assert!(!f.store.initialize());
        assert!(f.store.has(ConsentKind::Analytics));
        assert!(f.store.has(ConsentKind::Marketing));
        assert!(f.slot.analytics_permission());
        assert!(f.backend.get("privacy_consent").unwrap().is_some());
    }

    #[test]
    fn initialize_reports_missing_decision() {
        let f = fixture();
        assert!(f.store.initialize());

        f.store.decide(BannerDecision::RejectAll);
        assert!(!f.store.initialize());
    }

    #[test]
    fn opt_out_overrides_stored_analytics() {
        let f = fixture_with(TelemetryConfig {
            analytics_opt_out: true,
            ..TelemetryConfig::default()
        });

        f.store.decide(BannerDecision::AcceptAll);

        assert!(!f.store.has(ConsentKind::Analytics));
        assert!(f.store.has(ConsentKind::Marketing));
        assert!(!f.slot.analytics_permission());
    }

    #[test]
    fn export_includes_both_namespaces() {
        let f = fixture();
        f.store.decide(BannerDecision::AcceptAll);
        f.backend.set("analytics_pending", "[]").unwrap();
        f.backend.set("theme", "dark").unwrap();

        let export: serde_json::Value = serde_json::from_str(&f.store.export_user_data()).unwrap();

        assert_eq!(export["consent"]["analytics"], true);
        assert!(export["storage"]["privacy_consent"].is_string());
        assert_eq!(export["storage"]["analytics_pending"], "[]");
        assert!(export["storage"].get("theme").is_none());
    }

    #[test]
    fn delete_all_user_data_leaves_foreign_keys() {
        let f = fixture();
        f.store.decide(BannerDecision::AcceptAll);
        f.backend.set("analytics_pending", "[]").unwrap();
        f.backend.set("theme", "dark").unwrap();

        f.store.delete_all_user_data();

        assert_eq!(f.backend.keys().unwrap(), vec!["theme".to_string()]);
        assert!(f.store.needs_decision());
        assert!(!f.slot.analytics_permission());
    }

    #[test]
    fn subscriber_can_read_store_during_notification() {
        let f = Rc::new(fixture());
        let observed = Rc::new(Cell::new(false));

        let weak = Rc::downgrade(&f);
        let flag = observed.clone();
        f.store.subscribe(move |_| {
            if let Some(f) = weak.upgrade() {
                flag.set(f.store.has(ConsentKind::Analytics));
            }
        });

        f.store.decide(BannerDecision::AcceptAll);
        assert!(observed.get());
    }
}
