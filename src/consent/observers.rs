//! Consent change notifications.
//!
//! The store owns its subscriber list; UI components and tooling register
//! callbacks instead of listening on a host event bus.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::ConsentRecord;

/// A change broadcast to consent subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentChange {
    /// A decision was recorded (already normalized).
    Updated(ConsentRecord),
    /// The decision was withdrawn or all user data was deleted.
    Revoked,
    /// Someone asked for the banner to be shown again.
    BannerRequested,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Rc<dyn Fn(&ConsentChange)>;

#[derive(Default)]
pub(crate) struct Observers {
    next_id: Cell<u64>,
    callbacks: RefCell<Vec<(SubscriptionId, Callback)>>,
}

impl Observers {
    pub(crate) fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ConsentChange) + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.callbacks.borrow_mut().push((id, Rc::new(callback)));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.borrow_mut();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    /// Calls every subscriber registered at the time of the call.
    ///
    /// Works from a snapshot, so callbacks may subscribe, unsubscribe or
    /// change consent again without a borrow conflict.
    pub(crate) fn notify(&self, change: &ConsentChange) {
        let snapshot: Vec<Callback> = self
            .callbacks
            .borrow()
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(change);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("subscribers", &self.len())
            .finish()
    }
}
