//! Catalog HTTP surface
//!
//! Thin POST endpoints next to `/ws` that forward to the video catalog
//! adapter. Continuation tokens handed to clients are opaque; the
//! provider-side cursor is parked in the shared store for five minutes
//! under `search-instance:<token>` or `related-instance:<token>`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogPage;
use crate::room::Video;

use super::runner::AppContext;

const CURSOR_TTL: Duration = Duration::from_secs(5 * 60);
const SEARCH_CURSOR_PREFIX: &str = "search-instance:";
const RELATED_CURSOR_PREFIX: &str = "related-instance:";

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub continuation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SuggestionsRequest {
    pub query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistRequest {
    pub playlist_url_or_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedRequest {
    pub video_id: String,
    #[serde(default)]
    pub continuation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckEmbeddableRequest {
    pub video_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedStatus {
    pub video_id: String,
    pub can_embed: bool,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn search(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<CatalogPage>, StatusCode> {
    let cursor = resolve_cursor(&ctx, SEARCH_CURSOR_PREFIX, req.continuation.as_deref()).await;
    let page = call_catalog(
        &ctx,
        ctx.catalog.search(&req.query, cursor.as_deref()),
        "search",
    )
    .await?;
    Ok(Json(stash_cursor(&ctx, SEARCH_CURSOR_PREFIX, page).await))
}

pub async fn suggestions(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<SuggestionsRequest>,
) -> Result<Json<Vec<String>>, StatusCode> {
    let list = call_catalog(&ctx, ctx.catalog.suggestions(&req.query), "suggestions").await?;
    Ok(Json(list))
}

pub async fn playlist(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<PlaylistRequest>,
) -> Result<Json<Vec<Video>>, StatusCode> {
    let videos = call_catalog(
        &ctx,
        ctx.catalog.expand_playlist(&req.playlist_url_or_id),
        "playlist",
    )
    .await?;
    Ok(Json(videos))
}

pub async fn related(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<RelatedRequest>,
) -> Result<Json<CatalogPage>, StatusCode> {
    let cursor = resolve_cursor(&ctx, RELATED_CURSOR_PREFIX, req.continuation.as_deref()).await;
    let page = call_catalog(
        &ctx,
        ctx.catalog.related(&req.video_id, cursor.as_deref()),
        "related",
    )
    .await?;
    Ok(Json(stash_cursor(&ctx, RELATED_CURSOR_PREFIX, page).await))
}

pub async fn check_embeddable(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<CheckEmbeddableRequest>,
) -> Json<Vec<EmbedStatus>> {
    let results = ctx.embed.check_many(&req.video_ids).await;
    Json(
        results
            .into_iter()
            .map(|(video_id, can_embed)| EmbedStatus {
                video_id,
                can_embed,
            })
            .collect(),
    )
}

/// Run one catalog call under the configured ceiling, mapping timeouts and
/// upstream failures to a gateway error.
async fn call_catalog<T>(
    ctx: &AppContext,
    call: impl std::future::Future<Output = Result<T, crate::catalog::CatalogError>>,
    operation: &str,
) -> Result<T, StatusCode> {
    match tokio::time::timeout(ctx.config.probe_timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::warn!(operation, error = %e, "Catalog call failed");
            Err(StatusCode::BAD_GATEWAY)
        }
        Err(_) => {
            tracing::warn!(operation, "Catalog call timed out");
            Err(StatusCode::GATEWAY_TIMEOUT)
        }
    }
}

/// Swap an inbound opaque token back into the provider cursor it stands
/// for. Unknown or expired tokens read as "first page".
async fn resolve_cursor(
    ctx: &AppContext,
    prefix: &str,
    token: Option<&str>,
) -> Option<String> {
    let token = token?;
    match ctx.store.get(&format!("{prefix}{token}")).await {
        Ok(Some(raw)) => String::from_utf8(raw.to_vec()).ok(),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Cursor lookup failed");
            None
        }
    }
}

/// Park the provider cursor and hand the client an opaque token instead.
async fn stash_cursor(ctx: &AppContext, prefix: &str, mut page: CatalogPage) -> CatalogPage {
    if let Some(cursor) = page.continuation.take() {
        let token = uuid::Uuid::new_v4().to_string();
        match ctx
            .store
            .set_with_ttl(
                &format!("{prefix}{token}"),
                Bytes::from(cursor),
                CURSOR_TTL,
            )
            .await
        {
            Ok(()) => page.continuation = Some(token),
            Err(e) => tracing::warn!(error = %e, "Cursor stash failed"),
        }
    }
    page
}
