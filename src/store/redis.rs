//! Redis-backed state store
//!
//! Production implementation of [`StateStore`]. Commands go through a
//! reconnecting connection manager; each subscription holds its own pub/sub
//! connection. The per-key lock is a `SET NX PX` token with a
//! compare-and-delete release, so a crashed holder is reclaimed after
//! [`LOCK_TTL`](super::LOCK_TTL) and a stale release can never drop
//! someone else's lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;

use super::{KeyGuard, StateStore, StoreError, LOCK_ACQUIRE_TIMEOUT, LOCK_TTL};

/// Delay between attempts on a contended lock.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// [`StateStore`] over a Redis service
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `host:port`, authenticating when a password is
    /// configured.
    pub async fn connect(
        host: &str,
        port: u16,
        password: Option<&str>,
    ) -> Result<Self, StoreError> {
        let url = match password {
            Some(password) => format!("redis://:{password}@{host}:{port}/"),
            None => format!("redis://{host}:{port}/"),
        };
        let client = redis::Client::open(url.as_str())?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(host = %host, port = port, "Connected to state store");
        Ok(Self { client, conn })
    }
}

pub(super) async fn release_lock(
    mut conn: ConnectionManager,
    key: &str,
    token: &str,
) -> Result<(), StoreError> {
    let _: i32 = redis::Script::new(RELEASE_SCRIPT)
        .key(key)
        .arg(token)
        .invoke_async(&mut conn)
        .await?;
    Ok(())
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value.as_ref()).await?;
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value.as_ref(), ttl.as_secs()).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.keys(format!("{prefix}*")).await?)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(key, field).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload.as_ref()).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<Bytes>, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let channel = channel.to_string();
        let (tx, out) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Bad pub/sub payload");
                        continue;
                    }
                };
                if tx.send(Bytes::from(payload)).is_err() {
                    break;
                }
            }
            tracing::debug!(channel = %channel, "Pub/sub subscription ended");
        });
        Ok(out)
    }

    async fn lock(&self, key: &str) -> Result<KeyGuard, StoreError> {
        // The lock lives under its own key so it never collides with the
        // value it protects.
        let lock_key = format!("lock:{key}");
        let token = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + LOCK_ACQUIRE_TIMEOUT;
        let mut conn = self.conn.clone();

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&lock_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(LOCK_TTL.as_millis() as u64)
                .query_async(&mut conn)
                .await?;

            if acquired.is_some() {
                return Ok(KeyGuard::redis(self.conn.clone(), lock_key, token));
            }
            if Instant::now() >= deadline {
                return Err(StoreError::LockTimeout(key.to_string()));
            }
            tokio::time::sleep(LOCK_RETRY_DELAY).await;
        }
    }
}
