//! Room domain model and persistence
//!
//! [`Room`] is the unit of shared playback state. All transitions are plain
//! synchronous methods on the struct; [`RoomRepository`] runs them under the
//! store's per-room lock so concurrent mutations never interleave.

pub mod repository;
pub mod state;
pub mod video;

pub use repository::{RepositoryError, RoomRepository};
pub use state::{Room, RoomView};
pub use video::Video;

/// Current wall clock in Unix milliseconds, the timestamp unit for
/// `lastActivity` and `lastSeen`.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
