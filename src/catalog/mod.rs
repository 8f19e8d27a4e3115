//! Video catalog adapter seam
//!
//! The core never talks to a video provider directly; it consumes the
//! [`VideoCatalog`] contract and treats every call as slow and fallible.
//! Embeddability answers go through [`EmbedCache`] so a verdict is probed
//! at most once per two weeks.

pub mod cache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::room::Video;

pub use cache::EmbedCache;

/// Most entries one playlist expansion may yield.
pub const PLAYLIST_EXPANSION_LIMIT: usize = 200;

/// One page of catalog results with an opaque continuation token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
    pub videos: Vec<Video>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
}

/// Error type for catalog calls
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The provider did not answer within the call ceiling
    #[error("catalog call timed out")]
    Timeout,

    /// The provider answered with a failure
    #[error("catalog: {0}")]
    Upstream(String),
}

/// External video catalog operations the server consumes.
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    /// Ask the provider whether the video plays in an embedded context.
    /// Callers go through [`EmbedCache`] instead of calling this directly.
    async fn probe_embeddable(&self, video_id: &str) -> Result<bool, CatalogError>;

    /// Resolve a playlist reference into its video descriptors, bounded by
    /// [`PLAYLIST_EXPANSION_LIMIT`].
    async fn expand_playlist(&self, reference: &str) -> Result<Vec<Video>, CatalogError>;

    async fn search(
        &self,
        query: &str,
        continuation: Option<&str>,
    ) -> Result<CatalogPage, CatalogError>;

    async fn suggestions(&self, query: &str) -> Result<Vec<String>, CatalogError>;

    async fn related(
        &self,
        video_id: &str,
        continuation: Option<&str>,
    ) -> Result<CatalogPage, CatalogError>;
}

/// Stand-in catalog used when no provider adapter is wired in.
///
/// Accepts every video as embeddable and answers catalog queries with
/// empty results. Deployments plug a real adapter into the same trait.
#[derive(Debug, Default)]
pub struct NullCatalog;

#[async_trait]
impl VideoCatalog for NullCatalog {
    async fn probe_embeddable(&self, _video_id: &str) -> Result<bool, CatalogError> {
        Ok(true)
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
