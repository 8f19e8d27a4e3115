//! Crate-level error type
//!
//! Infrastructure failures that can abort server startup or a background
//! job. Client-facing command failures are a separate closed set, see
//! [`crate::protocol::CommandError`].

use crate::store::StoreError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The shared state store is unreachable or misbehaving
    #[error("state store: {0}")]
    Store(#[from] StoreError),

    /// The durable snapshot store is unreachable or misbehaving
    #[error("snapshot store: {0}")]
    Snapshot(#[from] mongodb::error::Error),

    /// Socket level failure
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("config: {0}")]
    Config(String),
}
