//! Synchronized video room server
//!
//! Many clients connect over a WebSocket, create or join rooms addressed by a
//! 6-digit code, and collaboratively drive a shared video player (queue,
//! play/pause, seek, volume, history, shuffle). Room state lives in a shared
//! state store so several server instances can serve the same room; state
//! changes fan out to every member in the fleet over the store's pub/sub
//! channel.
//!
//! # Architecture
//!
//! ```text
//!   ws client ──► session::Connection ──► session::Dispatcher
//!                                              │
//!                              ┌───────────────┼──────────────┐
//!                              ▼               ▼              ▼
//!                       room::RoomRepository  catalog     registry::RoomBus
//!                              │                               │ publish
//!                              ▼                               ▼
//!                       store::StateStore ──── pub/sub ──► every instance
//!                                                              │ fan-out
//!                                                              ▼
//!                                              registry::ConnectionRegistry
//!                                                  (local ws senders)
//! ```
//!
//! The [`worker::LifecycleWorker`] runs beside the request path: it evicts
//! inactive rooms, purges orphaned client records, and mirrors the state
//! store into a durable MongoDB snapshot.

pub mod catalog;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod server;
pub mod session;
pub mod store;
pub mod worker;

pub use error::{Error, Result};
pub use server::{run_server, ServerConfig};

/// Stable identity of one client connection
pub type ClientId = String;
