//! Durable snapshot store
//!
//! Mirrors the shared store into MongoDB so a cold Redis can be refilled.
//! Room blobs land in the `rooms` collection and client hashes in
//! `clients`, both keyed by their store key. Writes go out in batches with
//! a bounded retry per batch; the jobs are idempotent upserts, so a
//! half-finished run just gets finished by the next one.

use std::time::Duration;

use bytes::Bytes;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::ReplaceOptions;
use mongodb::{Client, Collection};

use crate::room::now_ms;
use crate::store::StateStore;

const DATABASE: &str = "roomcast";
const BATCH_SIZE: usize = 100;
const BATCH_RETRIES: u32 = 3;
const BATCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// MongoDB-backed snapshot of the shared store
pub struct SnapshotStore {
    rooms: Collection<Document>,
    clients: Collection<Document>,
}

impl SnapshotStore {
    pub async fn connect(uri: &str) -> crate::Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(DATABASE);
        tracing::info!(database = DATABASE, "Connected to snapshot store");
        Ok(Self {
            rooms: db.collection("rooms"),
            clients: db.collection("clients"),
        })
    }

    /// Copy every room and client record into the durable store.
    pub async fn snapshot(&self, store: &dyn StateStore) -> crate::Result<()> {
        let stamp = now_ms();

        let mut room_docs = Vec::new();
        for key in store.keys_with_prefix("room:").await? {
            let Some(raw) = store.get(&key).await? else {
                continue;
            };
            match std::str::from_utf8(&raw) {
                Ok(value) => room_docs.push(doc! {
                    "_id": &key,
                    "value": value,
                    "updatedAt": stamp,
                }),
                Err(_) => {
                    tracing::warn!(key = %key, "Skipping non-UTF-8 room blob");
                }
            }
        }
        let room_count = room_docs.len();
        self.upsert_in_batches(&self.rooms, room_docs).await?;

        let mut client_docs = Vec::new();
        for key in store.keys_with_prefix("client:").await? {
            let fields = store.hash_get_all(&key).await?;
            if fields.is_empty() {
                continue;
            }
            let mut document = doc! { "_id": &key, "updatedAt": stamp };
            for (field, value) in fields {
                document.insert(field, value);
            }
            client_docs.push(document);
        }
        let client_count = client_docs.len();
        self.upsert_in_batches(&self.clients, client_docs).await?;

        tracing::info!(
            rooms = room_count,
            clients = client_count,
            "Snapshot written"
        );
        Ok(())
    }

    /// Stream everything from the durable store back into the shared
    /// store. Used on startup and by the periodic reverse sync.
    pub async fn restore(&self, store: &dyn StateStore) -> crate::Result<()> {
        let mut restored = 0usize;

        let mut cursor = self.rooms.find(None, None).await?;
        while let Some(document) = cursor.try_next().await? {
            let (Ok(key), Ok(value)) = (document.get_str("_id"), document.get_str("value"))
            else {
                continue;
            };
            store.set(key, Bytes::from(value.to_string())).await?;
            restored += 1;
        }

        let mut cursor = self.clients.find(None, None).await?;
        while let Some(document) = cursor.try_next().await? {
            let Ok(key) = document.get_str("_id") else {
                continue;
            };
            for (field, value) in document.iter() {
                if field == "_id" || field == "updatedAt" {
                    continue;
                }
                if let Some(value) = value.as_str() {
                    store.hash_set(key, field, value).await?;
                }
            }
            restored += 1;
        }

        tracing::info!(records = restored, "Reverse sync complete");
        Ok(())
    }

    async fn upsert_in_batches(
        &self,
        collection: &Collection<Document>,
        documents: Vec<Document>,
    ) -> crate::Result<()> {
        for batch in documents.chunks(BATCH_SIZE) {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.upsert_batch(collection, batch).await {
                    Ok(()) => break,
                    Err(e) if attempt < BATCH_RETRIES => {
                        tracing::warn!(attempt, error = %e, "Snapshot batch failed, retrying");
                        tokio::time::sleep(BATCH_RETRY_DELAY).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn upsert_batch(
        &self,
        collection: &Collection<Document>,
        batch: &[Document],
    ) -> crate::Result<()> {
        let options = ReplaceOptions::builder().upsert(true).build();
        for document in batch {
            let Ok(key) = document.get_str("_id") else {
                continue;
            };
            collection
                .replace_one(doc! { "_id": key }, document.clone(), options.clone())
                .await?;
        }
        Ok(())
    }
}
