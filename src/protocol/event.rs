//! Outbound event frames

use serde::{Deserialize, Serialize};

use crate::room::RoomView;
use crate::ClientId;

use super::error::CommandError;

/// Every frame the server can emit, keyed by the `type` tag.
///
/// Events cross process boundaries through the broadcast bus, so they
/// round-trip through JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Pong,
    Ack {
        id: String,
    },
    RoomCreated {
        room_id: String,
    },
    RoomJoined {
        your_id: ClientId,
        room: RoomView,
    },
    /// Room state after a mutation. Never carries the member list.
    RoomUpdate {
        room: RoomView,
    },
    LeftRoom,
    RoomClosed {
        reason: String,
    },
    Message {
        sender: ClientId,
        content: String,
    },
    Play,
    Pause,
    Replay,
    VolumeChanged {
        volume: u8,
    },
    CurrentTimeChanged {
        current_time: f64,
    },
    Error {
        message: String,
    },
    ErrorWithCode {
        code: String,
    },
}

impl ServerEvent {
    /// The generic failure frame; details never leave the server log.
    pub fn internal_error() -> Self {
        ServerEvent::Error {
            message: "Something went wrong".to_string(),
        }
    }

    pub fn error_with_code(err: &CommandError) -> Self {
        ServerEvent::ErrorWithCode {
            code: err.code().to_string(),
        }
    }

    /// Serialize for the transport. Infallible by construction of the
    /// variants; a failure here is a bug worth a loud log line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize outbound event");
            r#"{"type":"error","message":"Something went wrong"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_spelling() {
        assert_eq!(ServerEvent::Pong.to_json(), r#"{"type":"pong"}"#);
        assert_eq!(ServerEvent::LeftRoom.to_json(), r#"{"type":"leftRoom"}"#);
        let json = ServerEvent::RoomCreated {
            room_id: "473829".to_string(),
        }
        .to_json();
        assert_eq!(json, r#"{"type":"roomCreated","roomId":"473829"}"#);
    }

    #[test]
    fn test_error_with_code() {
        let json = ServerEvent::error_with_code(&CommandError::NotCreatorOfRoom).to_json();
        assert_eq!(json, r#"{"type":"errorWithCode","code":"notCreatorOfRoom"}"#);
    }

    #[test]
    fn test_current_time_changed_field() {
        let json = ServerEvent::CurrentTimeChanged { current_time: 12.5 }.to_json();
        assert_eq!(json, r#"{"type":"currentTimeChanged","currentTime":12.5}"#);
    }

    #[test]
    fn test_round_trip_through_bus() {
        let event = ServerEvent::Message {
            sender: "abc".to_string(),
            content: "hi".to_string(),
        };
        let parsed: ServerEvent = serde_json::from_str(&event.to_json()).unwrap();
        match parsed {
            ServerEvent::Message { sender, content } => {
                assert_eq!(sender, "abc");
                assert_eq!(content, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
