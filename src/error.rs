use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur inside consent-core.
///
/// None of these cross the public boundary of [`ConsentStore`](crate::ConsentStore)
/// or [`EventBatcher`](crate::EventBatcher): those components log and absorb
/// them. They surface only from construction and configuration APIs and from
/// the lower-level storage helpers.
#[derive(Debug, Error)]
pub enum Error {
    /// The storage backend failed.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// A persisted value could not be encoded or decoded.
    #[error("malformed persisted data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns `true` if the error came from decoding a malformed value.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Serialization(_))
    }
}

// Renders the optional detail of a kind+message error as ": detail".
pub(crate) fn message_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|detail| format!(": {detail}"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageErrorKind;

    #[test]
    fn storage_error_converts() {
        let err: Error = StorageError::new(StorageErrorKind::QuotaExceeded).into();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!err.is_malformed());
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn serde_error_is_malformed() {
        let parse = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: Error = parse.into();
        assert!(err.is_malformed());
    }

    #[test]
    fn invalid_config_message() {
        let err = Error::InvalidConfig("batch_size must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "invalid configuration: batch_size must be at least 1"
        );
    }
}
