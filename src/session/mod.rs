//! Client sessions
//!
//! A session is one WebSocket connection: a sequential read loop feeding
//! the [`Dispatcher`] and a writer task draining the connection's outbound
//! channel. Commands from one connection are processed in arrival order;
//! their broadcasts are published in the same order.

pub mod connection;
pub mod dispatcher;

pub use connection::{websocket_handler, ConnectQuery};
pub use dispatcher::Dispatcher;
