//! Error types for storekit
//!
//! Every store, backend and wrapper layer reports failures through the
//! single [`StoreError`] enum. We use `thiserror` for the `Display` and
//! `Error` implementations.
//!
//! # Categories
//!
//! | Variant | Raised by | Retried |
//! |---------|-----------|---------|
//! | `Validation` | schema checks, filter locking, key decoding | never |
//! | `Authorization` | access restriction layer | never |
//! | `Conflict` | duplicate key, failed precondition, unique index, blocked delete | never |
//! | `NotFound` | a referenced key is absent where required | never |
//! | `Backend` | any native client failure | caller's decision |
//! | `SortOverflow` | local-sort buffer exceeded | never |
//! | `BatchTooLarge` | batch larger than the declared `batch_size` | never |
//! | `Config` | configuration load or parse failure | never |

use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error taxonomy shared by every layer of the storage stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    // ==================== Input ====================
    /// Payload, filter or key failed validation
    #[error("validation error: {reason}")]
    Validation {
        /// What was wrong with the input
        reason: String,
    },

    /// Operation not permitted for the caller
    #[error("operation '{operation}' is not permitted on store '{store}'")]
    Authorization {
        /// Operation name (`create`, `read`, ...)
        operation: String,
        /// Store the operation targeted
        store: String,
    },

    // ==================== State ====================
    /// Write conflicts with existing state
    #[error("conflict: {reason}")]
    Conflict {
        /// Description of the conflict
        reason: String,
    },

    /// A referenced key does not exist
    #[error("not found: {key}")]
    NotFound {
        /// The key that was looked up
        key: String,
    },

    // ==================== Backend ====================
    /// Native client failure, surfaced unchanged through every layer
    #[error("backend error: {reason}")]
    Backend {
        /// Native error message
        reason: String,
    },

    // ==================== Usage ====================
    /// Local-sort buffer exceeded `max_local_search_size`
    #[error("local sort exceeded {limit} buffered results; narrow the filter or order by an index sort key")]
    SortOverflow {
        /// Configured buffer bound
        limit: usize,
    },

    /// Batch contained more edits than the store accepts
    #[error("batch of {size} edits exceeds maximum of {max}")]
    BatchTooLarge {
        /// Number of edits submitted
        size: usize,
        /// Declared `batch_size`
        max: usize,
    },

    /// Configuration could not be loaded
    #[error("configuration error: {reason}")]
    Config {
        /// Description of the problem
        reason: String,
    },
}

impl StoreError {
    /// Build a `Validation` error
    pub fn validation(reason: impl Into<String>) -> Self {
        StoreError::Validation {
            reason: reason.into(),
        }
    }

    /// Build an `Authorization` error
    pub fn authorization(operation: impl Into<String>, store: impl Into<String>) -> Self {
        StoreError::Authorization {
            operation: operation.into(),
            store: store.into(),
        }
    }

    /// Build a `Conflict` error
    pub fn conflict(reason: impl Into<String>) -> Self {
        StoreError::Conflict {
            reason: reason.into(),
        }
    }

    /// Build a `NotFound` error
    pub fn not_found(key: impl Into<String>) -> Self {
        StoreError::NotFound { key: key.into() }
    }

    /// Build a `Backend` error
    pub fn backend(reason: impl Into<String>) -> Self {
        StoreError::Backend {
            reason: reason.into(),
        }
    }

    /// Build a `Config` error
    pub fn config(reason: impl Into<String>) -> Self {
        StoreError::Config {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, used in `BatchEditResult::code`
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Validation { .. } => "validation",
            StoreError::Authorization { .. } => "authorization",
            StoreError::Conflict { .. } => "conflict",
            StoreError::NotFound { .. } => "not_found",
            StoreError::Backend { .. } => "backend",
            StoreError::SortOverflow { .. } => "sort_overflow",
            StoreError::BatchTooLarge { .. } => "batch_too_large",
            StoreError::Config { .. } => "config",
        }
    }

    /// True for errors that describe the caller's input rather than the system
    pub fn is_client_error(&self) -> bool {
        !matches!(self, StoreError::Backend { .. } | StoreError::Config { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::validation(format!("invalid JSON: {}", e))
    }
}
