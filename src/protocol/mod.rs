//! Wire protocol
//!
//! Every frame on the `/ws` transport is a JSON object with a `type` tag.
//! Inbound frames parse into [`Envelope`] (optional `id`, `timestamp` and
//! `requiresAck` fields around a [`ClientCommand`]); outbound frames are
//! [`ServerEvent`] values. Unknown or malformed input is an explicit
//! [`CommandError::InvalidMessage`], never a dropped connection.

pub mod command;
pub mod error;
pub mod event;

pub use command::{parse_frame, ClientCommand, Envelope};
pub use error::CommandError;
pub use event::ServerEvent;
