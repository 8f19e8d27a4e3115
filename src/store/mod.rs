//! Shared state store
//!
//! Every server instance reads and writes room and client records through
//! the [`StateStore`] trait. The production implementation is
//! [`RedisStore`]; [`MemoryStore`] backs tests and single-instance
//! deployments with the same semantics.
//!
//! Mutations that must not interleave (read-modify-write on one room) are
//! serialized with a per-key lock, see [`StateStore::lock`]. The pub/sub
//! surface is the only cross-process coordination channel.

pub mod error;
pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis::RedisStore;

/// How long a per-key lock may be held before the store reclaims it.
pub const LOCK_TTL: Duration = Duration::from_secs(10);

/// Upper bound on waiting for a contended per-key lock.
pub const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Key-value, hash and pub/sub operations on the shared store.
///
/// All values are opaque bytes; callers own the encoding. Errors are
/// transient from the caller's point of view ([`StoreError::Unavailable`])
/// and safe to retry.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Last-writer-wins set.
    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError>;

    /// Set with an expiry after which the key reads as absent.
    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError>;

    /// Fire-and-forget delivery to current subscribers of `channel`.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), StoreError>;

    /// Subscribe to `channel`. Payloads arrive on the returned channel in
    /// publish order; the subscription ends when the receiver is dropped.
    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<Bytes>, StoreError>;

    /// Acquire the per-key mutation lock.
    ///
    /// While the returned guard is alive no other holder of the same key
    /// exists anywhere in the fleet, which is what makes a get/apply/set
    /// sequence under the guard an atomic update. Acquisition is bounded by
    /// [`LOCK_ACQUIRE_TIMEOUT`] and fails with [`StoreError::LockTimeout`].
    async fn lock(&self, key: &str) -> Result<KeyGuard, StoreError>;
}

/// Guard for a held per-key lock.
///
/// Dropping the guard releases the lock. The Redis variant releases
/// asynchronously; the lock TTL covers a lost release.
pub struct KeyGuard {
    inner: GuardInner,
}

enum GuardInner {
    Local(tokio::sync::OwnedMutexGuard<()>),
    Redis {
        conn: ::redis::aio::ConnectionManager,
        key: String,
        token: String,
    },
}

impl KeyGuard {
    pub(crate) fn local(guard: tokio::sync::OwnedMutexGuard<()>) -> Self {
        Self {
            inner: GuardInner::Local(guard),
        }
    }

    pub(crate) fn redis(
        conn: ::redis::aio::ConnectionManager,
        key: String,
        token: String,
    ) -> Self {
        Self {
            inner: GuardInner::Redis { conn, key, token },
        }
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        if let GuardInner::Redis { conn, key, token } = &self.inner {
            let conn = conn.clone();
            let key = key.clone();
            let token = token.clone();
            // Compare-and-delete so an expired lock taken over by another
            // holder is never released by us.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = redis::release_lock(conn, &key, &token).await {
                        tracing::warn!(key = %key, error = %e, "Lock release failed");
                    }
                });
            }
        }
    }
}
