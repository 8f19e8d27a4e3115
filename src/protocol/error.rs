//! Client-facing command errors
//!
//! The closed set of failures a command can surface to its sender as an
//! `errorWithCode` frame. Anything outside this set is reported as a
//! generic `error` frame and logged with full context. A closed room is
//! announced through the `roomClosed` event, not through a code here.

use crate::store::StoreError;

/// Error type for dispatched client commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Bug or unexpected state; details stay in the server log
    Internal,
    /// Malformed envelope, unknown type, or missing/mistyped fields
    InvalidMessage,
    /// No room with the requested id
    RoomNotFound,
    /// No room with the requested id, reported from the rejoin flow
    RejoinRoomNotFound,
    /// The command requires room membership
    NotInRoom,
    /// Password check failed
    IncorrectPassword,
    /// Only the room creator may do this
    NotCreatorOfRoom,
    /// The video is already queued
    AlreadyInQueue,
    /// The video is not in the queue
    VideoNotFound,
    /// The catalog refused to embed this video
    VideoNotEmbeddable,
}

impl CommandError {
    /// Wire code carried by the `errorWithCode` frame
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Internal => "internalError",
            CommandError::InvalidMessage => "invalidMessage",
            CommandError::RoomNotFound => "roomNotFound",
            CommandError::RejoinRoomNotFound => "rejoinRoomNotFound",
            CommandError::NotInRoom => "notInRoom",
            CommandError::IncorrectPassword => "incorrectPassword",
            CommandError::NotCreatorOfRoom => "notCreatorOfRoom",
            CommandError::AlreadyInQueue => "alreadyInQueue",
            CommandError::VideoNotFound => "videoNotFound",
            CommandError::VideoNotEmbeddable => "videoNotEmbeddable",
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::error::Error for CommandError {}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "Store failure during command");
        CommandError::Internal
    }
}
