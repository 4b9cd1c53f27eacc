use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use super::ScopedStore;

/// Removes entries in `store`'s namespace that have outlived `retention`.
///
/// An entry is removed when it is a JSON object whose `timestamp` field is
/// older than `now - retention`, or when it is not valid JSON at all.
/// Entries without a timestamp (such as the pending-event array) are kept.
///
/// Returns the number of entries removed. Storage failures stop the sweep and
/// are logged; they never propagate.
pub fn purge_stale(store: &ScopedStore, retention: TimeDelta, now: DateTime<Utc>) -> usize {
    // A window reaching past the earliest representable time keeps everything.
    let cutoff = now.checked_sub_signed(retention);

    let entries = match store.entries() {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(
                target: "storage",
                namespace = %store.namespace(),
                error = %err,
                "retention sweep skipped"
            );
            return 0;
        }
    };

    let mut removed = 0;
    for (key, raw) in entries {
        let stale = match serde_json::from_str::<Value>(&raw) {
            Ok(value) => {
                cutoff.is_some_and(|cutoff| recorded_at(&value).is_some_and(|at| at < cutoff))
            }
            Err(_) => true,
        };
        if !stale {
            continue;
        }

        let short_key = key
            .strip_prefix(store.namespace().prefix())
            .unwrap_or(&key);
        match store.remove(short_key) {
            Ok(()) => {
                tracing::debug!(target: "storage", key = %key, "removed stale entry");
                removed += 1;
            }
            Err(err) => {
                tracing::warn!(target: "storage", key = %key, error = %err, "retention sweep aborted");
                break;
            }
        }
    }
    removed
}

fn recorded_at(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.get("timestamp")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
