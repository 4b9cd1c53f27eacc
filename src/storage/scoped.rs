use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{KeyValueStore, StorageError};
use crate::Error;

/// A key namespace inside the shared storage backend.
///
/// Each persistence user owns exactly one namespace. Prefixes are fixed and
/// disjoint, so no key written through one namespace can be read, listed or
/// cleared through another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Consent decisions (`privacy_*`).
    Consent,
    /// Telemetry state such as pending events (`analytics_*`).
    Analytics,
}

impl Namespace {
    /// Every namespace, in a stable order.
    pub const ALL: [Namespace; 2] = [Namespace::Consent, Namespace::Analytics];

    /// Returns the key prefix owned by this namespace.
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Consent => "privacy_",
            Namespace::Analytics => "analytics_",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Consent => write!(f, "consent"),
            Namespace::Analytics => write!(f, "analytics"),
        }
    }
}

/// A view of a shared backend restricted to one [`Namespace`].
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use consent_core::storage::{KeyValueStore, MemoryStore, Namespace, ScopedStore};
///
/// let backend = Rc::new(MemoryStore::new());
/// let consent = ScopedStore::new(backend.clone(), Namespace::Consent);
///
/// consent.set("consent", "{}").unwrap();
/// assert_eq!(backend.get("privacy_consent").unwrap().as_deref(), Some("{}"));
/// ```
#[derive(Clone)]
pub struct ScopedStore {
    backend: Rc<dyn KeyValueStore>,
    namespace: Namespace,
}

impl ScopedStore {
    /// Creates a view of `backend` scoped to `namespace`.
    pub fn new(backend: Rc<dyn KeyValueStore>, namespace: Namespace) -> Self {
        Self { backend, namespace }
    }

    /// Returns a view of the same backend scoped to another namespace.
    pub fn sibling(&self, namespace: Namespace) -> Self {
        Self {
            backend: Rc::clone(&self.backend),
            namespace,
        }
    }

    /// Returns the namespace of this view.
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Returns the fully qualified backend key for `key`.
    pub fn qualify(&self, key: &str) -> String {
        format!("{}{}", self.namespace.prefix(), key)
    }

    /// Reads the raw value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend read fails.
    pub fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.backend.get(&self.qualify(key))
    }

    /// Writes the raw value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend write fails.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.backend.set(&self.qualify(key), value)
    }

    /// Removes `key` from this namespace.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend write fails.
    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(&self.qualify(key))
    }

    /// Reads and decodes a JSON value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read fails and
    /// [`Error::Serialization`] if the stored text is not a valid `T`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encodes `value` as JSON and stores it under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails and
    /// [`Error::Storage`] if the write fails.
    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), Error> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)?;
        Ok(())
    }

    /// Lists `(qualified key, value)` pairs in this namespace.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub fn entries(&self) -> Result<Vec<(String, String)>, StorageError> {
        let prefix = self.namespace.prefix();
        let mut entries = Vec::new();
        for key in self.backend.keys()? {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(value) = self.backend.get(&key)? {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    /// Removes every key in this namespace, leaving other namespaces alone.
    ///
    /// Returns the number of keys removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on the first failing backend call.
    pub fn clear(&self) -> Result<usize, StorageError> {
        let prefix = self.namespace.prefix();
        let mut removed = 0;
        for key in self.backend.keys()? {
            if key.starts_with(prefix) {
                self.backend.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl fmt::Debug for ScopedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
