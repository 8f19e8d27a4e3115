//! Connection registry and broadcast bus
//!
//! Three cooperating pieces route server events to room members across the
//! fleet:
//!
//! ```text
//!   dispatcher ──► RoomBus::broadcast ──► store pub/sub ("room-notifications")
//!                                               │
//!                            every instance's listener task
//!                                               │
//!                 ClientDirectory (who is in the room, locally)
//!                                               │
//!                 ConnectionRegistry (live outbound senders)
//! ```
//!
//! The registry holds each connection's outbound channel sender; the
//! connection task owns the socket. A dead sender is dropped on first
//! failed delivery, which ends that connection's writer and triggers its
//! disconnect cleanup.

pub mod bus;
pub mod clients;
pub mod connections;

pub use bus::{BusFrame, RoomBus, ROOM_CHANNEL};
pub use clients::ClientDirectory;
pub use connections::ConnectionRegistry;
