//! Server assembly
//!
//! Configuration, the HTTP/WebSocket router, and the runner that wires the
//! store, registry, bus, dispatcher and lifecycle worker together.

pub mod config;
pub mod http;
pub mod runner;
pub mod signal;

pub use config::ServerConfig;
pub use runner::{run_server, AppContext};
