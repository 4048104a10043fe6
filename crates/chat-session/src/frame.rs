//! Wire frames exchanged with the chat server.
//!
//! Inbound text is decoded once at the boundary into an [`InboundFrame`] whose
//! [`FrameKind`] is a closed set of the discriminators the session knows, with
//! [`FrameKind::Unknown`] carrying anything else verbatim.

use crate::error::{Result, SessionError};
use crate::event::EventKind;
use serde::Serialize;
use serde_json::Value;

/// Inbound frame discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Message,
    Ack,
    Typing,
    StopTyping,
    MessageRead,
    ReadConfirmation,
    DeliveryConfirmation,
    AuthSuccess,
    AuthError,
    UserStatus,
    Pong,
    Error,
    FriendRequest,
    FriendAccept,
    FriendReject,
    CallOffer,
    CallAnswer,
    CallIceCandidate,
    CallReject,
    CallEnd,
    CallTimeout,
    Unknown(String),
}

impl FrameKind {
    #[must_use]
    pub fn from_type(value: &str) -> Self {
        match value {
            "message" => Self::Message,
            "ack" => Self::Ack,
            "typing" => Self::Typing,
            "stopTyping" => Self::StopTyping,
            "messageRead" => Self::MessageRead,
            "read_confirmation" => Self::ReadConfirmation,
            "delivery_confirmation" => Self::DeliveryConfirmation,
            "auth_success" => Self::AuthSuccess,
            "auth_error" => Self::AuthError,
            "user_status" => Self::UserStatus,
            "pong" => Self::Pong,
            "error" => Self::Error,
            "FRIEND_REQUEST" => Self::FriendRequest,
            "FRIEND_ACCEPT" => Self::FriendAccept,
            "FRIEND_REJECT" => Self::FriendReject,
            "CALL_OFFER" => Self::CallOffer,
            "CALL_ANSWER" => Self::CallAnswer,
            "CALL_ICE_CANDIDATE" => Self::CallIceCandidate,
            "CALL_REJECT" => Self::CallReject,
            "CALL_END" => Self::CallEnd,
            "CALL_TIMEOUT" => Self::CallTimeout,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Wire discriminator for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::Ack => "ack",
            Self::Typing => "typing",
            Self::StopTyping => "stopTyping",
            Self::MessageRead => "messageRead",
            Self::ReadConfirmation => "read_confirmation",
            Self::DeliveryConfirmation => "delivery_confirmation",
            Self::AuthSuccess => "auth_success",
            Self::AuthError => "auth_error",
            Self::UserStatus => "user_status",
            Self::Pong => "pong",
            Self::Error => "error",
            Self::FriendRequest => "FRIEND_REQUEST",
            Self::FriendAccept => "FRIEND_ACCEPT",
            Self::FriendReject => "FRIEND_REJECT",
            Self::CallOffer => "CALL_OFFER",
            Self::CallAnswer => "CALL_ANSWER",
            Self::CallIceCandidate => "CALL_ICE_CANDIDATE",
            Self::CallReject => "CALL_REJECT",
            Self::CallEnd => "CALL_END",
            Self::CallTimeout => "CALL_TIMEOUT",
            Self::Unknown(value) => value.as_str(),
        }
    }

    /// Call-signaling frames are left to an external collaborator.
    #[must_use]
    pub fn is_call_signal(&self) -> bool {
        matches!(
            self,
            Self::CallOffer
                | Self::CallAnswer
                | Self::CallIceCandidate
                | Self::CallReject
                | Self::CallEnd
                | Self::CallTimeout
        )
    }

    /// Higher-level event this frame is re-emitted as, if any.
    ///
    /// Auth frames map to [`EventKind::Authorized`] / [`EventKind::AuthFailed`]
    /// but the session applies their state change before emitting.
    #[must_use]
    pub fn event_kind(&self) -> Option<EventKind> {
        match self {
            Self::Message => Some(EventKind::NewMessage),
            Self::Ack => Some(EventKind::MessageAck),
            Self::Typing => Some(EventKind::UserTyping),
            Self::StopTyping => Some(EventKind::UserStopTyping),
            Self::MessageRead | Self::ReadConfirmation => Some(EventKind::MessageRead),
            Self::DeliveryConfirmation => Some(EventKind::MessageDelivered),
            Self::AuthSuccess => Some(EventKind::Authorized),
            Self::AuthError => Some(EventKind::AuthFailed),
            Self::UserStatus => Some(EventKind::UserStatus),
            Self::FriendRequest => Some(EventKind::FriendRequest),
            Self::FriendAccept => Some(EventKind::FriendAccepted),
            Self::FriendReject => Some(EventKind::FriendRejected),
            Self::Pong
            | Self::Error
            | Self::CallOffer
            | Self::CallAnswer
            | Self::CallIceCandidate
            | Self::CallReject
            | Self::CallEnd
            | Self::CallTimeout
            | Self::Unknown(_) => None,
        }
    }
}

/// Decoded inbound frame: its discriminator plus the whole JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub kind: FrameKind,
    pub payload: Value,
}

impl InboundFrame {
    /// The `type` string as received.
    #[must_use]
    pub fn type_str(&self) -> &str {
        self.kind.as_str()
    }

    /// Field lookup on the payload object.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Decode raw inbound text into a typed frame.
///
/// Text that is not a JSON object carrying a string `type` is rejected.
pub fn decode_frame(text: &str) -> Result<InboundFrame> {
    let payload: Value = serde_json::from_str(text)?;
    let object = payload
        .as_object()
        .ok_or_else(|| SessionError::Decode("expected JSON object frame".to_string()))?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .map(FrameKind::from_type)
        .ok_or_else(|| SessionError::Decode("missing frame type".to_string()))?;
    Ok(InboundFrame { kind, payload })
}

/// Frames the session itself originates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    #[serde(rename = "auth")]
    Auth { token: String },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "typing")]
    Typing { to: String },
    #[serde(rename = "stopTyping")]
    StopTyping { to: String },
    #[serde(rename = "messageRead")]
    Read {
        #[serde(rename = "messageId")]
        message_id: String,
    },
}

impl OutboundFrame {
    #[must_use]
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth {
            token: token.into(),
        }
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::Ping
    }

    #[must_use]
    pub fn typing(to: impl Into<String>) -> Self {
        Self::Typing { to: to.into() }
    }

    #[must_use]
    pub fn stop_typing(to: impl Into<String>) -> Self {
        Self::StopTyping { to: to.into() }
    }

    #[must_use]
    pub fn read(message_id: impl Into<String>) -> Self {
        Self::Read {
            message_id: message_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_known_discriminators() -> Result<()> {
        let cases = [
            ("message", FrameKind::Message),
            ("stopTyping", FrameKind::StopTyping),
            ("read_confirmation", FrameKind::ReadConfirmation),
            ("auth_success", FrameKind::AuthSuccess),
            ("FRIEND_REQUEST", FrameKind::FriendRequest),
            ("CALL_ICE_CANDIDATE", FrameKind::CallIceCandidate),
        ];

        for (wire, expected) in cases {
            let text = json!({ "type": wire, "data": 1 }).to_string();
            let frame = decode_frame(&text)?;
            assert_eq!(frame.kind, expected, "{wire}");
            assert_eq!(frame.type_str(), wire);
            assert_eq!(frame.field("data"), Some(&json!(1)));
        }
        Ok(())
    }

    #[test]
    fn unknown_type_keeps_discriminator() -> Result<()> {
        let frame = decode_frame(r#"{"type":"presence_sync","users":[]}"#)?;
        assert_eq!(frame.kind, FrameKind::Unknown("presence_sync".to_string()));
        assert_eq!(frame.type_str(), "presence_sync");
        assert_eq!(frame.kind.event_kind(), None);
        Ok(())
    }

    #[test]
    fn decode_rejects_malformed_text() {
        struct Case {
            name: &'static str,
            input: &'static str,
            expected_error_fragment: &'static str,
        }

        let cases = vec![
            Case {
                name: "not json",
                input: "{not json",
                expected_error_fragment: "serialization error",
            },
            Case {
                name: "array payload",
                input: r#"["message"]"#,
                expected_error_fragment: "expected JSON object frame",
            },
            Case {
                name: "missing type",
                input: r#"{"text":"hi"}"#,
                expected_error_fragment: "missing frame type",
            },
            Case {
                name: "non-string type",
                input: r#"{"type":7}"#,
                expected_error_fragment: "missing frame type",
            },
        ];

        for case in cases {
            let result = decode_frame(case.input);
            assert!(result.is_err(), "{}: expected an error", case.name);
            if let Err(error) = result {
                let rendered = error.to_string();
                assert!(
                    rendered.contains(case.expected_error_fragment),
                    "{}: expected error fragment '{}' in '{}'",
                    case.name,
                    case.expected_error_fragment,
                    rendered
                );
            }
        }
    }

    #[test]
    fn read_aliases_map_to_same_event() {
        assert_eq!(
            FrameKind::MessageRead.event_kind(),
            FrameKind::ReadConfirmation.event_kind()
        );
        assert_eq!(
            FrameKind::DeliveryConfirmation.event_kind(),
            Some(EventKind::MessageDelivered)
        );
        assert!(FrameKind::CallEnd.is_call_signal());
        assert_eq!(FrameKind::CallEnd.event_kind(), None);
        assert_eq!(FrameKind::Pong.event_kind(), None);
    }

    #[test]
    fn outbound_frames_serialize_with_type_tag() -> Result<()> {
        assert_eq!(
            serde_json::to_value(OutboundFrame::auth("tok"))?,
            json!({ "type": "auth", "token": "tok" })
        );
        assert_eq!(
            serde_json::to_value(OutboundFrame::ping())?,
            json!({ "type": "ping" })
        );
        assert_eq!(
            serde_json::to_value(OutboundFrame::stop_typing("u2"))?,
            json!({ "type": "stopTyping", "to": "u2" })
        );
        assert_eq!(
            serde_json::to_value(OutboundFrame::read("m1"))?,
            json!({ "type": "messageRead", "messageId": "m1" })
        );
        Ok(())
    }
}
