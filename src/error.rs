//! Error types for map operations.

/// Recoverable failures of map operations.
///
/// Invariant violations (a migration cursor running past the table, a
/// structural fingerprint mismatch at iterator release) are bugs rather than
/// recoverable states; they panic instead of appearing here.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// `add` was called with a key that is already present.
    #[error("key already present")]
    KeyExists,

    /// `delete` was called with a key that is not present.
    #[error("key not found")]
    KeyNotFound,

    /// A bucket array could not be allocated; the map is unchanged and the
    /// operation may be retried.
    #[error("bucket table allocation failed")]
    AllocationFailed,

    /// A resize was requested while a migration is already running.
    #[error("incremental rehash already in progress")]
    RehashInProgress,

    /// An explicit resize targeted fewer slots than there are live entries.
    #[error("target capacity is below the live entry count")]
    CapacityBelowUsed,

    /// An explicit shrink was requested while resizing is disabled.
    #[error("resizing is disabled")]
    ResizeDisabled,
}
