//! Inbound command frames

use serde::{Deserialize, Serialize};

use crate::room::Video;

use super::error::CommandError;

/// Envelope fields shared by every inbound frame.
///
/// `id` and `timestamp` are opaque client bookkeeping; when `requiresAck`
/// is set an `ack` carrying the `id` goes back before the command runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, rename = "requiresAck")]
    pub requires_ack: bool,
    #[serde(flatten)]
    pub command: ClientCommand,
}

impl From<ClientCommand> for Envelope {
    fn from(command: ClientCommand) -> Self {
        Self {
            id: None,
            timestamp: None,
            requires_ack: false,
            command,
        }
    }
}

/// Every command a client can issue, keyed by the frame's `type` tag.
///
/// An unrecognized tag fails deserialization, which callers surface as
/// [`CommandError::InvalidMessage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    Ping,
    CreateRoom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    JoinRoom {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// Same semantics as `joinRoom`; a missing room reports
    /// `rejoinRoomNotFound` so clients can tell a stale reconnect apart
    /// from a bad code.
    #[serde(rename = "reJoinRoom", alias = "rejoinRoom")]
    RejoinRoom {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    LeaveRoom,
    CloseRoom,
    SendMessage {
        content: String,
    },
    AddVideo {
        video: Video,
    },
    AddVideoAndMoveToTop {
        video: Video,
    },
    RemoveVideoFromQueue {
        video_id: String,
    },
    MoveToTop {
        video_id: String,
    },
    ShuffleQueue,
    ClearQueue,
    ClearHistory,
    PlayNow {
        video: Video,
    },
    NextVideo,
    VideoFinished,
    Play,
    Pause,
    Replay,
    Seek {
        time: f64,
    },
    SetVolume {
        volume: f64,
    },
    ImportPlaylist {
        playlist: String,
    },
}

/// Parse one text frame into an [`Envelope`].
pub fn parse_frame(text: &str) -> Result<Envelope, CommandError> {
    serde_json::from_str(text).map_err(|e| {
        tracing::debug!(error = %e, "Unparseable inbound frame");
        CommandError::InvalidMessage
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_command() {
        let envelope = parse_frame(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(envelope.command, ClientCommand::Ping));
        assert!(envelope.id.is_none());
        assert!(!envelope.requires_ack);
    }

    #[test]
    fn test_parse_envelope_fields() {
        let envelope = parse_frame(
            r#"{"type":"seek","time":42.5,"id":"m1","timestamp":1700000000,"requiresAck":true}"#,
        )
        .unwrap();
        assert_eq!(envelope.id.as_deref(), Some("m1"));
        assert!(envelope.requires_ack);
        match envelope.command {
            ClientCommand::Seek { time } => assert_eq!(time, 42.5),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_join_room() {
        let envelope =
            parse_frame(r#"{"type":"joinRoom","roomId":"473829","password":"s3"}"#).unwrap();
        match envelope.command {
            ClientCommand::JoinRoom { room_id, password } => {
                assert_eq!(room_id, "473829");
                assert_eq!(password.as_deref(), Some("s3"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_partial_video() {
        let envelope =
            parse_frame(r#"{"type":"addVideo","video":{"id":"v1","duration":180}}"#).unwrap();
        match envelope.command {
            ClientCommand::AddVideo { video } => {
                assert_eq!(video.id, "v1");
                assert_eq!(video.duration, 180.0);
                assert!(video.title.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_rejoin_tag_spellings() {
        for frame in [
            r#"{"type":"reJoinRoom","roomId":"473829"}"#,
            r#"{"type":"rejoinRoom","roomId":"473829"}"#,
        ] {
            let envelope = parse_frame(frame).unwrap();
            assert!(matches!(envelope.command, ClientCommand::RejoinRoom { .. }));
        }
    }

    #[test]
    fn test_unknown_type_is_invalid_message() {
        let err = parse_frame(r#"{"type":"selfDestruct"}"#).unwrap_err();
        assert_eq!(err, CommandError::InvalidMessage);
    }

    #[test]
    fn test_non_numeric_seek_is_invalid_message() {
        let err = parse_frame(r#"{"type":"seek","time":"soon"}"#).unwrap_err();
        assert_eq!(err, CommandError::InvalidMessage);
    }

    #[test]
    fn test_missing_required_field_is_invalid_message() {
        let err = parse_frame(r#"{"type":"joinRoom"}"#).unwrap_err();
        assert_eq!(err, CommandError::InvalidMessage);
    }

    #[test]
    fn test_not_json_is_invalid_message() {
        let err = parse_frame("definitely not json").unwrap_err();
        assert_eq!(err, CommandError::InvalidMessage);
    }
}
