//! Consent-gated telemetry batching.
//!
//! This crate keeps a user's tracking consent and makes sure no telemetry
//! event reaches a sink without it:
//! - **Consent**: a durable, expiring record of which categories are allowed,
//!   with change notifications and fail-closed reads
//! - **Batching**: buffered, deduplicated, session-capped events flushed behind
//!   the analytics consent check
//! - **Pending events**: events the sink could not take yet are parked in
//!   storage and replayed once it is available
//!
//! # Core Types
//!
//! - [`ConsentStore`]: load / set / has / revoke over durable storage
//! - [`EventBatcher`]: buffers events and flushes them to the sink
//! - [`SinkSlot`] and [`TelemetrySink`]: the possibly-late ingestion endpoint
//! - [`KeyValueStore`]: the storage backend trait ([`MemoryStore`], [`FileStore`])
//! - [`TelemetryBuilder`]: wires one session from a [`TelemetryConfig`]
//!
//! Everything is single-threaded: components share state through `Rc`, and
//! timed work runs only when the host calls [`Telemetry::poll`].
//!
//! # Examples
//!
//! ```
//! use std::rc::Rc;
//! use chrono::{TimeDelta, TimeZone, Utc};
//! use consent_core::{
//!     BannerDecision, ManualClock, MemoryStore, RecordingSink, TelemetryBuilder,
//!     TelemetryConfig,
//! };
//!
//! let clock = Rc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
//! let sink = Rc::new(RecordingSink::new());
//! let telemetry = TelemetryBuilder::new(TelemetryConfig::default())
//!     .storage(Rc::new(MemoryStore::new()))
//!     .clock(clock.clone())
//!     .sink(sink.clone())
//!     .build()
//!     .expect("default config is valid");
//!
//! if telemetry.initialize() {
//!     // The banner would be shown here.
//!     telemetry.consent().decide(BannerDecision::AcceptAll);
//! }
//!
//! telemetry.tracker().track("cta_click", "engagement", Some("hero"), None);
//!
//! // Nothing is sent until the debounce delay has passed.
//! telemetry.poll();
//! assert!(sink.is_empty());
//!
//! clock.advance(TimeDelta::seconds(2));
//! telemetry.poll();
//! assert_eq!(sink.names(), vec!["cta_click"]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod consent;
pub mod storage;

mod clock;
mod config;
#[cfg(any(debug_assertions, feature = "debug-tools"))]
mod debug;
mod error;
mod sink;
mod telemetry;
mod tracker;

pub use batch::{params, EventBatcher, EventParams, ParamValue};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TelemetryConfig;
pub use consent::{
    BannerDecision, ConsentChange, ConsentKind, ConsentRecord, ConsentStore, SubscriptionId,
};
#[cfg(any(debug_assertions, feature = "debug-tools"))]
pub use debug::DebugTools;
pub use error::Error;
pub use sink::{RecordingSink, SinkError, SinkErrorKind, SinkEvent, SinkSlot, TelemetrySink};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError, StorageErrorKind};
pub use telemetry::{Telemetry, TelemetryBuilder};
pub use tracker::Tracker;
