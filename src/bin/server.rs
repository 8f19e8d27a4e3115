//! Synchronized video room server binary.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin server
//! cargo run --bin server -- --port 9000
//! ```
//!
//! Configuration comes from the environment (`PORT`, `REDIS_HOST`,
//! `MONGODB_URI`, `INACTIVE_TIMEOUT`, ...); command line flags override
//! the listen port.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roomcast_rs::catalog::NullCatalog;
use roomcast_rs::{run_server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Synchronized video room server", long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short = 'p', long)]
    port: Option<u16>,
}

fn setup_logging() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("roomcast_rs={level},server={level}").into());

    let json_format = std::env::var("NODE_ENV")
        .map(|env| env == "production")
        .unwrap_or(false);

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() {
    setup_logging();

    let args = Args::parse();
    let mut config = ServerConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }

    // The catalog seam: swap in a provider adapter here.
    let catalog = Arc::new(NullCatalog);

    if let Err(e) = run_server(config, catalog).await {
        tracing::error!(error = %e, "Server exited with error");
        std::process::exit(1);
    }
}
