//! Hub session protocol.
//!
//! Frames are JSON text:
//! ```text
//! client → hub   {"method": "UpdateTextBlock", "data": {...}}
//! hub → client   {"event":  "TextBlockUpdated", "data": {...}}
//! ```
//!
//! Outbound requests are strongly typed and serialized with serde.
//! Inbound events are decoded leniently: every text block goes through the
//! sanitizer, optional fields default, and only a missing identifier makes
//! a frame malformed.

use deck_core::sanitize::{lenient_index, lenient_string, sanitize, sanitize_blocks};
use deck_core::{Presentation, Role, Slide, TextBlock, User};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ───────────────────────────────────────────────────────────────────
// Outbound payloads
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMembership {
    pub presentation_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlockUpdate {
    pub presentation_id: String,
    pub slide_index: usize,
    pub text_block: TextBlock,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlockDelete {
    pub presentation_id: String,
    pub slide_index: usize,
    pub text_block_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleChangeRequest {
    pub presentation_id: String,
    pub user_id: String,
    pub new_role: Role,
    pub requester_id: String,
}

/// Operations a client invokes on the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum HubRequest {
    #[serde(rename = "JoinPresentation")]
    JoinSession(SessionMembership),
    #[serde(rename = "LeavePresentation")]
    LeaveSession(SessionMembership),
    UpdateTextBlock(TextBlockUpdate),
    DeleteTextBlock(TextBlockDelete),
    ChangeUserRole(RoleChangeRequest),
    /// Ask the hub for a full `PresentationUpdated` snapshot.
    SyncState(SessionMembership),
}

impl HubRequest {
    pub fn method(&self) -> &'static str {
        match self {
            HubRequest::JoinSession(_) => "JoinPresentation",
            HubRequest::LeaveSession(_) => "LeavePresentation",
            HubRequest::UpdateTextBlock(_) => "UpdateTextBlock",
            HubRequest::DeleteTextBlock(_) => "DeleteTextBlock",
            HubRequest::ChangeUserRole(_) => "ChangeUserRole",
            HubRequest::SyncState(_) => "SyncState",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

// ───────────────────────────────────────────────────────────────────
// Inbound events
// ───────────────────────────────────────────────────────────────────

/// Full or partial session snapshot carried by `PresentationUpdated`.
/// Absent parts are left untouched by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresentationState {
    pub presentation: Option<Presentation>,
    pub slides: Option<Vec<Slide>>,
    pub users: Option<Vec<User>>,
}

/// Events the hub pushes to participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    UserJoined(User),
    UserLeft {
        user_id: String,
    },
    UserRoleChanged {
        user_id: String,
        role: Role,
    },
    TextBlockUpdated {
        text_block: TextBlock,
        user_id: String,
        slide_index: Option<usize>,
    },
    TextBlockDeleted {
        text_block_id: String,
        user_id: String,
        slide_index: Option<usize>,
    },
    SlideChanged {
        slide_index: usize,
    },
    SlideContentUpdated {
        slide_index: usize,
        content: Vec<TextBlock>,
    },
    PresentationUpdated(PresentationState),
    SlideAdded(Slide),
    SlideRemoved {
        slide_index: usize,
    },
}

impl HubEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::UserJoined(_) => "UserJoined",
            HubEvent::UserLeft { .. } => "UserLeft",
            HubEvent::UserRoleChanged { .. } => "UserRoleChanged",
            HubEvent::TextBlockUpdated { .. } => "TextBlockUpdated",
            HubEvent::TextBlockDeleted { .. } => "TextBlockDeleted",
            HubEvent::SlideChanged { .. } => "SlideChanged",
            HubEvent::SlideContentUpdated { .. } => "SlideContentUpdated",
            HubEvent::PresentationUpdated(_) => "PresentationUpdated",
            HubEvent::SlideAdded(_) => "SlideAdded",
            HubEvent::SlideRemoved { .. } => "SlideRemoved",
        }
    }

    /// Decode an inbound frame. Unknown events and payloads without their
    /// identifying fields are rejected; everything else is defaulted.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let envelope: Value = serde_json::from_str(frame)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        let name = envelope
            .get("event")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("event"))?;
        let data = envelope.get("data").unwrap_or(&Value::Null);
        Self::from_parts(name, data)
    }

    fn from_parts(name: &str, data: &Value) -> Result<Self, ProtocolError> {
        let field = |key: &str| data.get(key).unwrap_or(&Value::Null);
        let required_id = |key: &'static str| {
            lenient_string(field(key))
                .filter(|s| !s.is_empty())
                .ok_or(ProtocolError::MissingField(key))
        };
        let required_index = |key: &'static str| {
            lenient_index(field(key)).ok_or(ProtocolError::MissingField(key))
        };

        let event = match name {
            "UserJoined" => {
                let user: User = serde_json::from_value(field("user").clone())
                    .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
                if user.id.is_empty() {
                    return Err(ProtocolError::MissingField("user"));
                }
                HubEvent::UserJoined(user)
            }
            "UserLeft" => HubEvent::UserLeft {
                user_id: required_id("userId")?,
            },
            "UserRoleChanged" => HubEvent::UserRoleChanged {
                user_id: required_id("userId")?,
                role: field("role").as_str().map(Role::parse).unwrap_or_default(),
            },
            "TextBlockUpdated" => {
                let text_block = sanitize(field("textBlock"));
                if text_block.id.is_empty() {
                    return Err(ProtocolError::MissingField("textBlock"));
                }
                HubEvent::TextBlockUpdated {
                    text_block,
                    user_id: lenient_string(field("userId")).unwrap_or_default(),
                    slide_index: lenient_index(field("slideIndex")),
                }
            }
            "TextBlockDeleted" => HubEvent::TextBlockDeleted {
                text_block_id: required_id("textBlockId")?,
                user_id: lenient_string(field("userId")).unwrap_or_default(),
                slide_index: lenient_index(field("slideIndex")),
            },
            "SlideChanged" => HubEvent::SlideChanged {
                slide_index: required_index("slideIndex")?,
            },
            "SlideContentUpdated" => HubEvent::SlideContentUpdated {
                slide_index: required_index("slideIndex")?,
                content: sanitize_blocks(field("content")),
            },
            "PresentationUpdated" => HubEvent::PresentationUpdated(PresentationState {
                presentation: field("presentation")
                    .is_object()
                    .then(|| serde_json::from_value(field("presentation").clone()).ok())
                    .flatten(),
                slides: field("slides")
                    .is_array()
                    .then(|| serde_json::from_value(field("slides").clone()).ok())
                    .flatten(),
                users: field("users")
                    .is_array()
                    .then(|| serde_json::from_value(field("users").clone()).ok())
                    .flatten(),
            }),
            "SlideAdded" => {
                let slide_value = data.get("slide").unwrap_or(data);
                if !slide_value.is_object() {
                    return Err(ProtocolError::MissingField("slide"));
                }
                HubEvent::SlideAdded(
                    serde_json::from_value(slide_value.clone())
                        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?,
                )
            }
            "SlideRemoved" => HubEvent::SlideRemoved {
                slide_index: required_index("slideIndex")?,
            },
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }

    /// Encode as a hub frame. Used by hub implementations and tests.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let data = match self {
            HubEvent::UserJoined(user) => json!({ "user": user }),
            HubEvent::UserLeft { user_id } => json!({ "userId": user_id }),
            HubEvent::UserRoleChanged { user_id, role } => json!({ "userId": user_id, "role": role }),
            HubEvent::TextBlockUpdated { text_block, user_id, slide_index } => {
                json!({ "textBlock": text_block, "userId": user_id, "slideIndex": slide_index })
            }
            HubEvent::TextBlockDeleted { text_block_id, user_id, slide_index } => {
                json!({ "textBlockId": text_block_id, "userId": user_id, "slideIndex": slide_index })
            }
            HubEvent::SlideChanged { slide_index } => json!({ "slideIndex": slide_index }),
            HubEvent::SlideContentUpdated { slide_index, content } => {
                json!({ "slideIndex": slide_index, "content": content })
            }
            HubEvent::PresentationUpdated(state) => json!({
                "presentation": state.presentation,
                "slides": state.slides,
                "users": state.users,
            }),
            HubEvent::SlideAdded(slide) => json!({ "slide": slide }),
            HubEvent::SlideRemoved { slide_index } => json!({ "slideIndex": slide_index }),
        };
        serde_json::to_string(&json!({ "event": self.name(), "data": data }))
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_wire_shape() {
        let req = HubRequest::UpdateTextBlock(TextBlockUpdate {
            presentation_id: "p1".into(),
            slide_index: 2,
            text_block: TextBlock::new("t1").at(100, 100),
            user_id: "u1".into(),
        });
        let value: Value = serde_json::from_str(&req.encode().unwrap()).unwrap();
        assert_eq!(value["method"], "UpdateTextBlock");
        assert_eq!(value["data"]["presentationId"], "p1");
        assert_eq!(value["data"]["slideIndex"], 2);
        assert_eq!(value["data"]["textBlock"]["id"], "t1");
        assert_eq!(value["data"]["userId"], "u1");
    }

    #[test]
    fn test_join_uses_hub_method_name() {
        let req = HubRequest::JoinSession(SessionMembership {
            presentation_id: "p1".into(),
            user_id: "u1".into(),
        });
        let encoded = req.encode().unwrap();
        assert!(encoded.contains("\"JoinPresentation\""));
        assert_eq!(HubRequest::decode(&encoded).unwrap(), req);
        assert_eq!(req.method(), "JoinPresentation");
    }

    #[test]
    fn test_role_change_wire_shape() {
        let req = HubRequest::ChangeUserRole(RoleChangeRequest {
            presentation_id: "p1".into(),
            user_id: "u2".into(),
            new_role: Role::Editor,
            requester_id: "u1".into(),
        });
        let value: Value = serde_json::from_str(&req.encode().unwrap()).unwrap();
        assert_eq!(value["data"]["newRole"], "editor");
        assert_eq!(value["data"]["requesterId"], "u1");
    }

    #[test]
    fn test_decode_text_block_updated_sanitizes() {
        let frame = r#"{"event":"TextBlockUpdated","data":{"textBlock":{"id":5,"x":"12","width":1},"userId":"u2"}}"#;
        match HubEvent::decode(frame).unwrap() {
            HubEvent::TextBlockUpdated { text_block, user_id, slide_index } => {
                assert_eq!(text_block.id, "5");
                assert_eq!(text_block.x, 12);
                assert_eq!(text_block.width, 50);
                assert_eq!(user_id, "u2");
                assert_eq!(slide_index, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_missing_identifiers() {
        let cases = [
            r#"{"event":"TextBlockUpdated","data":{"userId":"u2"}}"#,
            r#"{"event":"TextBlockDeleted","data":{}}"#,
            r#"{"event":"UserLeft"}"#,
            r#"{"event":"SlideChanged","data":{"slideIndex":-1}}"#,
            r#"{"event":"UserJoined","data":{"user":{"nickname":"x"}}}"#,
            r#"{"data":{}}"#,
            r#"not json"#,
        ];
        for frame in cases {
            assert!(HubEvent::decode(frame).is_err(), "accepted {frame}");
        }
    }

    #[test]
    fn test_decode_unknown_event() {
        let err = HubEvent::decode(r#"{"event":"Bogus","data":{}}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownEvent("Bogus".into()));
    }

    #[test]
    fn test_decode_partial_presentation_update() {
        let frame = r#"{"event":"PresentationUpdated","data":{"users":[{"id":"u1","role":"creator"}],"slides":"junk"}}"#;
        match HubEvent::decode(frame).unwrap() {
            HubEvent::PresentationUpdated(state) => {
                assert!(state.presentation.is_none());
                assert!(state.slides.is_none());
                assert_eq!(state.users.unwrap()[0].role, Role::Creator);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_event_encode_decode_text_block_deleted() {
        let event = HubEvent::TextBlockDeleted {
            text_block_id: "t1".into(),
            user_id: "u1".into(),
            slide_index: Some(0),
        };
        assert_eq!(HubEvent::decode(&event.encode().unwrap()).unwrap(), event);
    }

    #[test]
    fn test_slide_added_accepts_bare_or_wrapped() {
        let bare = r#"{"event":"SlideAdded","data":{"id":3,"index":1}}"#;
        let wrapped = r#"{"event":"SlideAdded","data":{"slide":{"id":3,"index":1}}}"#;
        assert_eq!(HubEvent::decode(bare).unwrap(), HubEvent::decode(wrapped).unwrap());
    }
}
