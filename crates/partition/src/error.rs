//! Native client errors
//!
//! [`PartitionError`] mirrors the failure classes a partition/sort-key
//! service reports. Conditional-check failures are interpreted by the store
//! (conflict, absent key); everything else surfaces as a backend error.

use storekit_core::StoreError;
use thiserror::Error;

/// Result type alias for native client calls
pub type PartitionResult<T> = std::result::Result<T, PartitionError>;

/// Failure reported by a [`crate::client::PartitionClient`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    /// A condition expression evaluated to false
    #[error("conditional check failed")]
    ConditionalCheckFailed,

    /// The request was malformed
    #[error("validation exception: {0}")]
    Validation(String),

    /// Table or index does not exist
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Batch request above the native limit
    #[error("too many items in batch request: {size} > {max}")]
    BatchLimitExceeded {
        /// Items in the request
        size: usize,
        /// Native limit
        max: usize,
    },

    /// Service-side failure
    #[error("internal service error: {0}")]
    Internal(String),
}

impl From<PartitionError> for StoreError {
    fn from(e: PartitionError) -> Self {
        StoreError::backend(e.to_string())
    }
}
