use std::fmt::Display;

use thiserror::Error;

/// Outcomes of the one-time-read engine that are not a plain success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Rejected before any key was minted or any write happened.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Never existed, already burned, or expired. All three look the same.
    #[error("not found")]
    NotFound,

    /// Every freshly generated key collided with a live record.
    #[error("key collision persisted after {attempts} attempts")]
    KeyCollision { attempts: u32 },

    /// Backend failure or deadline expiry. Retryable.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl StoreError {
    /// True when the caller may reasonably try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::KeyCollision { .. })
    }
}

/// Failures reported by a [`SecretBackend`](super::SecretBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// An insert found a live record under the same key and left it untouched.
    #[error("duplicate key")]
    DuplicateKey,

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn unavailable(e: impl Display) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<BackendError> for StoreError {
    fn from(e: BackendError) -> Self {
        match e {
            // Only reachable if a caller bypasses the retry loop.
            BackendError::DuplicateKey => Self::KeyCollision { attempts: 1 },
            BackendError::Unavailable(msg) => Self::StorageUnavailable(msg),
        }
    }
}
