//! Durable key/value storage.
//!
//! This module provides:
//! - `KeyValueStore`: the backend trait (local-storage style string map)
//! - `MemoryStore`: in-memory backend with an optional byte quota
//! - `FileStore`: single-file JSON backend for native hosts
//! - `ScopedStore`: a namespaced view that prefixes every key
//! - `purge_stale`: retention sweep over one namespace
//!
//! Consent and analytics share one backend but never share keys: every
//! access goes through a `ScopedStore` bound to a [`Namespace`].

use std::fmt;

mod file;
mod memory;
mod retention;
mod scoped;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use retention::purge_stale;
pub use scoped::{Namespace, ScopedStore};

/// A string key/value backend.
///
/// Implementations use interior mutability so a single backend can be shared
/// through `Rc` by every component of a session.
pub trait KeyValueStore {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write is rejected (quota, I/O, ...).
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Lists every key currently stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Error returned by a storage backend.
///
/// # Examples
///
/// ```
/// use consent_core::storage::{StorageError, StorageErrorKind};
///
/// let error = StorageError::with_message(StorageErrorKind::Io, "disk full");
/// assert_eq!(error.kind(), StorageErrorKind::Io);
/// assert_eq!(error.message(), Some("disk full"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("storage error ({kind}){}", crate::error::message_suffix(.message))]
pub struct StorageError {
    kind: StorageErrorKind,
    message: Option<String>,
}

impl StorageError {
    /// Creates a new storage error with the specified kind.
    pub fn new(kind: StorageErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a new storage error with a custom message.
    pub fn with_message(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Returns the error message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::with_message(StorageErrorKind::Io, err.to_string())
    }
}

/// Kind of storage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Reading or writing the underlying medium failed.
    Io,
    /// The write would exceed the backend's capacity.
    QuotaExceeded,
    /// The backend's own on-disk representation is corrupt.
    Serialization,
    /// The backend is switched off (e.g. storage disabled by the host).
    Unavailable,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "I/O error"),
            Self::QuotaExceeded => write!(f, "quota exceeded"),
            Self::Serialization => write!(f, "serialization error"),
            Self::Unavailable => write!(f, "storage unavailable"),
        }
    }
}
