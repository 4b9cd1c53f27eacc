//! Telemetry event batching.
//!
//! This module provides:
//! - `EventBatcher`: buffers, deduplicates and flushes events behind the
//!   analytics consent check
//! - `BufferedEvent`, `ParamValue`, `EventParams`: the event model
//! - `DebounceTimer`: the cancellable flush deadline
//!
//! Events reach the sink only through a flush, and only while analytics
//! consent is granted at flush time.

mod batcher;
mod event;
mod timer;

pub use batcher::{BatcherState, BatcherStats, EventBatcher, PENDING_KEY};
pub use event::{params, BufferedEvent, EventParams, ParamValue};
pub use timer::DebounceTimer;
