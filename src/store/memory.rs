//! In-memory state store
//!
//! Single-process implementation of [`StateStore`]. Used by the test suite
//! and by deployments that run one instance without Redis; pub/sub and
//! per-key locking behave identically to the distributed store, minus the
//! cross-process reach.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, Mutex};

use super::{KeyGuard, StateStore, StoreError, LOCK_ACQUIRE_TIMEOUT};

const CHANNEL_CAPACITY: usize = 1024;

struct ValueEntry {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process [`StateStore`]
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, ValueEntry>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender_for(&self, channel: &str) -> broadcast::Sender<Bytes> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut values = self.values.lock().await;
        match values.get(key) {
            Some(entry) if entry.is_expired() => {
                values.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.data.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.values.lock().await.insert(
            key.to_string(),
            ValueEntry {
                data: value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.values.lock().await.insert(
            key.to_string(),
            ValueEntry {
                data: value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().await.remove(key);
        self.hashes.lock().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        if self.get(key).await?.is_some() {
            return Ok(true);
        }
        Ok(self.hashes.lock().await.contains_key(key))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = {
            let mut values = self.values.lock().await;
            values.retain(|_, entry| !entry.is_expired());
            values
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        };
        let hashes = self.hashes.lock().await;
        keys.extend(hashes.keys().filter(|k| k.starts_with(prefix)).cloned());
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.hashes
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .hashes
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut hashes = self.hashes.lock().await;
        if let Some(fields) = hashes.get_mut(key) {
            fields.remove(field);
            if fields.is_empty() {
                hashes.remove(key);
            }
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), StoreError> {
        // send() errs when nobody subscribes, which matches fire-and-forget.
        let _ = self.sender_for(channel).await.send(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<Bytes>, StoreError> {
        let mut rx = self.sender_for(channel).await.subscribe();
        let (tx, out) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Pub/sub subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out)
    }

    async fn lock(&self, key: &str) -> Result<KeyGuard, StoreError> {
        let entry = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        match tokio::time::timeout(LOCK_ACQUIRE_TIMEOUT, entry.lock_owned()).await {
            Ok(guard) => Ok(KeyGuard::local(guard)),
            Err(_) => Err(StoreError::LockTimeout(key.to_string())),
        }
    }
}
