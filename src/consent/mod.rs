//! Consent state.
//!
//! This module provides:
//! - `ConsentRecord`: the persisted decision and its validity window
//! - `BannerDecision`: the choices a consent banner can report
//! - `ConsentStore`: load / set / has / revoke over durable storage
//! - `ConsentChange` and `SubscriptionId`: change notifications
//!
//! Permission is fail-closed: anything other than a valid stored (or
//! freshly recorded) decision denies every category.

mod observers;
mod record;
mod store;

pub use observers::{ConsentChange, SubscriptionId};
pub use record::{BannerDecision, ConsentKind, ConsentRecord};
pub use store::{ConsentStore, CONSENT_KEY};
