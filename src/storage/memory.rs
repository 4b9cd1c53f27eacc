use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use super::{KeyValueStore, StorageError, StorageErrorKind};

/// In-memory key/value backend.
///
/// Behaves like browser local storage: string keys, string values, an
/// optional byte quota, and a switch that makes every call fail as if storage
/// had been disabled by the host.
///
/// # Examples
///
/// ```
/// use consent_core::storage::{KeyValueStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.set("privacy_consent", "{}").unwrap();
/// assert_eq!(store.get("privacy_consent").unwrap().as_deref(), Some("{}"));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
    disabled: Cell<bool>,
}

impl MemoryStore {
    /// Creates an empty store with no quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that rejects writes once keys plus values
    /// would exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota_bytes: Some(bytes),
            ..Self::default()
        }
    }

    /// Enables or disables the store. A disabled store fails every call with
    /// [`StorageErrorKind::Unavailable`].
    pub fn set_enabled(&self, enabled: bool) {
        self.disabled.set(!enabled);
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Returns the bytes currently used by keys and values.
    pub fn used_bytes(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.disabled.get() {
            Err(StorageError::new(StorageErrorKind::Unavailable))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_enabled()?;

        if let Some(quota) = self.quota_bytes {
            let replaced = self
                .entries
                .borrow()
                .get(key)
                .map_or(0, |old| key.len() + old.len());
            let projected = self.used_bytes() - replaced + key.len() + value.len();
            if projected > quota {
                return Err(StorageError::with_message(
                    StorageErrorKind::QuotaExceeded,
                    format!("{projected} bytes exceeds quota of {quota}"),
                ));
            }
        }

        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_starts_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn memory_store_set_get_remove() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();
        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
        assert_eq!(store.len(), 1);

        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn quota_rejects_oversized_write() {
        let store = MemoryStore::with_quota(10);
        store.set("key", "1234").unwrap();

        let err = store.set("other", "123456").unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::QuotaExceeded);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn quota_accounts_for_replaced_value() {
        let store = MemoryStore::with_quota(10);
        store.set("key", "1234567").unwrap();
        // Replacing the value frees the old bytes first.
        store.set("key", "7654321").unwrap();
        assert_eq!(store.used_bytes(), 10);
    }

    #[test]
    fn disabled_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();
        store.set_enabled(false);

        assert_eq!(
            store.get("a").unwrap_err().kind(),
            StorageErrorKind::Unavailable
        );
        assert!(store.set("b", "2").is_err());
        assert!(store.remove("a").is_err());
        assert!(store.keys().is_err());

        store.set_enabled(true);
        assert_eq!(store.keys().unwrap(), vec!["a".to_string()]);
    }
}
