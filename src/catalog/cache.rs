//! Embeddability cache
//!
//! Embed probes are slow round-trips to the provider, so verdicts are kept
//! in the shared store for 15 days under `youtube_embed_status:<id>`. A
//! cache hit never re-probes. Probes carry a hard ceiling; an answer that
//! does not arrive in time counts as not embeddable and is not cached.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::store::StateStore;

use super::{CatalogError, VideoCatalog};

const KEY_PREFIX: &str = "youtube_embed_status:";
const CACHE_TTL: Duration = Duration::from_secs(15 * 24 * 60 * 60);

/// Default ceiling on one probe round-trip.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// Caching front for [`VideoCatalog::probe_embeddable`]
pub struct EmbedCache {
    store: Arc<dyn StateStore>,
    catalog: Arc<dyn VideoCatalog>,
    probe_timeout: Duration,
}

impl EmbedCache {
    pub fn new(store: Arc<dyn StateStore>, catalog: Arc<dyn VideoCatalog>) -> Self {
        Self::with_timeout(store, catalog, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(
        store: Arc<dyn StateStore>,
        catalog: Arc<dyn VideoCatalog>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            probe_timeout,
        }
    }

    /// Whether the video may be played embedded.
    ///
    /// Never fails: a store hiccup falls through to the probe, and a probe
    /// failure or timeout reads as not embeddable.
    pub async fn is_embeddable(&self, video_id: &str) -> bool {
        let key = format!("{KEY_PREFIX}{video_id}");

        match self.store.get(&key).await {
            Ok(Some(cached)) => return cached.as_ref() == b"true",
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(video = %video_id, error = %e, "Embed cache read failed");
            }
        }

        let verdict = match tokio::time::timeout(
            self.probe_timeout,
            self.catalog.probe_embeddable(video_id),
        )
        .await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                tracing::warn!(video = %video_id, error = %e, "Embed probe failed");
                return false;
            }
            Err(_) => {
                tracing::warn!(
                    video = %video_id,
                    timeout_secs = self.probe_timeout.as_secs(),
                    "Embed probe timed out"
                );
                return false;
            }
        };

        let value = if verdict { "true" } else { "false" };
        if let Err(e) = self
            .store
            .set_with_ttl(&key, Bytes::from_static(value.as_bytes()), CACHE_TTL)
            .await
        {
            tracing::warn!(video = %video_id, error = %e, "Embed cache write failed");
        }
        verdict
    }

    /// Resolve verdicts for a batch of ids, preserving input order.
    pub async fn check_many(&self, video_ids: &[String]) -> Vec<(String, bool)> {
        let mut results = Vec::with_capacity(video_ids.len());
        for id in video_ids {
            let verdict = self.is_embeddable(id).await;
            results.push((id.clone(), verdict));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::catalog::CatalogPage;
    use crate::room::Video;

    struct CountingCatalog {
        probes: AtomicUsize,
        verdict: bool,
        delay: Duration,
    }

    impl CountingCatalog {
        fn new(verdict: bool) -> Self {
            Self {
                probes: AtomicUsize::new(0),
                verdict,
                delay: Duration::ZERO,
            }
        }

        fn slow(verdict: bool, delay: Duration) -> Self {
            Self {
                probes: AtomicUsize::new(0),
                verdict,
                delay,
            }
        }
    }

    #[async_trait]
    impl VideoCatalog for CountingCatalog {
        async fn probe_embeddable(&self, _video_id: &str) -> Result<bool, CatalogError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.verdict)
        }

        async fn expand_playlist(&self, _reference: &str) -> Result<Vec<Video>, CatalogError> {
            Ok(Vec::new())
        }

        async fn search(
            &self,
            _query: &str,
            _continuation: Option<&str>,
        ) -> Result<CatalogPage, CatalogError> {
            Ok(CatalogPage::default())
        }

        async fn suggestions(&self, _query: &str) -> Result<Vec<String>, CatalogError> {
            Ok(Vec::new())
        }

        async fn related(
            &self,
            _video_id: &str,
            _continuation: Option<&str>,
        ) -> Result<CatalogPage, CatalogError> {
            Ok(CatalogPage::default())
        }
    }

    #[tokio::test]
    async fn test_hit_does_not_reprobe() {
        let catalog = Arc::new(CountingCatalog::new(true));
        let cache = EmbedCache::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&catalog) as Arc<dyn VideoCatalog>,
        );

        assert!(cache.is_embeddable("v1").await);
        assert!(cache.is_embeddable("v1").await);
        assert!(cache.is_embeddable("v1").await);

        assert_eq!(catalog.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_negative_verdict_is_cached() {
        let catalog = Arc::new(CountingCatalog::new(false));
        let cache = EmbedCache::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&catalog) as Arc<dyn VideoCatalog>,
        );

        assert!(!cache.is_embeddable("v1").await);
        assert!(!cache.is_embeddable("v1").await);

        assert_eq!(catalog.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_reads_as_not_embeddable_and_is_not_cached() {
        let catalog = Arc::new(CountingCatalog::slow(true, Duration::from_millis(100)));
        let cache = EmbedCache::with_timeout(
            Arc::new(MemoryStore::new()),
            Arc::clone(&catalog) as Arc<dyn VideoCatalog>,
            Duration::from_millis(10),
        );

        assert!(!cache.is_embeddable("v1").await);
        // No cached verdict, so the next call probes again.
        assert!(!cache.is_embeddable("v1").await);
        assert_eq!(catalog.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_check_many_preserves_order() {
        let catalog = Arc::new(CountingCatalog::new(true));
        let cache = EmbedCache::new(Arc::new(MemoryStore::new()), catalog);

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = cache.check_many(&ids).await;

        let returned: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(returned, vec!["a", "b", "c"]);
        assert!(results.iter().all(|(_, ok)| *ok));
    }
}
