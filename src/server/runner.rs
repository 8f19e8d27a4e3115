//! Server wiring and execution

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::catalog::{EmbedCache, VideoCatalog};
use crate::registry::{ClientDirectory, ConnectionRegistry, RoomBus};
use crate::room::RoomRepository;
use crate::session::{websocket_handler, Dispatcher};
use crate::store::{RedisStore, StateStore};
use crate::worker::{LifecycleWorker, SnapshotStore, Sweeper};

use super::config::ServerConfig;
use super::http;
use super::signal::shutdown_signal;

/// Window given to the final snapshot flush on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything the request handlers need, shared behind one `Arc`.
pub struct AppContext {
    pub config: ServerConfig,
    pub store: Arc<dyn StateStore>,
    pub rooms: Arc<RoomRepository>,
    pub directory: Arc<ClientDirectory>,
    pub connections: Arc<ConnectionRegistry>,
    pub bus: Arc<RoomBus>,
    pub dispatcher: Arc<Dispatcher>,
    pub catalog: Arc<dyn VideoCatalog>,
    pub embed: Arc<EmbedCache>,
}

/// Run the server against the Redis store named in the config.
///
/// Blocks until a shutdown signal arrives, then flushes a final snapshot
/// within the grace window and returns.
pub async fn run_server(
    config: ServerConfig,
    catalog: Arc<dyn VideoCatalog>,
) -> crate::Result<()> {
    let store: Arc<dyn StateStore> = Arc::new(
        RedisStore::connect(
            &config.redis_host,
            config.redis_port,
            config.redis_password.as_deref(),
        )
        .await?,
    );
    run_with_store(config, store, catalog).await
}

/// Run the server on an already constructed state store.
pub async fn run_with_store(
    config: ServerConfig,
    store: Arc<dyn StateStore>,
    catalog: Arc<dyn VideoCatalog>,
) -> crate::Result<()> {
    // Recover state before the first connection is accepted.
    let snapshot = match &config.mongodb_uri {
        Some(uri) => {
            let snapshot = Arc::new(SnapshotStore::connect(uri).await?);
            if let Err(e) = snapshot.restore(store.as_ref()).await {
                tracing::warn!(error = %e, "Startup reverse sync failed, continuing");
            }
            Some(snapshot)
        }
        None => {
            tracing::info!("MONGODB_URI not set, snapshotting disabled");
            None
        }
    };

    let connections = Arc::new(ConnectionRegistry::new());
    let directory = Arc::new(ClientDirectory::new(Arc::clone(&store)));
    let rooms = Arc::new(RoomRepository::new(Arc::clone(&store)));
    let bus = Arc::new(RoomBus::new(
        Arc::clone(&store),
        Arc::clone(&connections),
        Arc::clone(&directory),
    ));
    let bus_handle = bus.start().await?;

    let embed = Arc::new(EmbedCache::with_timeout(
        Arc::clone(&store),
        Arc::clone(&catalog),
        config.probe_timeout,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        config.clone(),
        Arc::clone(&rooms),
        Arc::clone(&directory),
        Arc::clone(&bus),
        Arc::clone(&catalog),
        Arc::clone(&embed),
    ));

    let sweeper = Arc::new(Sweeper::new(
        config.clone(),
        Arc::clone(&store),
        Arc::clone(&rooms),
        Arc::clone(&dispatcher),
    ));
    let worker = Arc::new(LifecycleWorker::new(
        config.clone(),
        Arc::clone(&store),
        sweeper,
        snapshot.clone(),
    ));
    let worker_handles = worker.spawn();

    let ctx = Arc::new(AppContext {
        config: config.clone(),
        store: Arc::clone(&store),
        rooms,
        directory,
        connections,
        bus,
        dispatcher,
        catalog,
        embed,
    });

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(http::health))
        .route("/search", post(http::search))
        .route("/suggestions", post(http::suggestions))
        .route("/playlist", post(http::playlist))
        .route("/related", post(http::related))
        .route("/check-embeddable", post(http::check_embeddable))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Server listening");
    tracing::info!("WebSocket endpoint: ws://{bind_addr}/ws");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background work, then give the final flush its grace window.
    for handle in worker_handles {
        handle.abort();
    }
    bus_handle.abort();

    if let Some(snapshot) = snapshot {
        match tokio::time::timeout(SHUTDOWN_GRACE, snapshot.snapshot(store.as_ref())).await {
            Ok(Ok(())) => tracing::info!("Final snapshot flushed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Final snapshot failed"),
            Err(_) => tracing::warn!("Final snapshot did not finish within grace window"),
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}
