//! Store error types

/// Error type for shared-store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing service is unreachable. Transient; callers may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A per-key lock could not be acquired within the bound.
    #[error("lock acquisition timed out for key {0}")]
    LockTimeout(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
