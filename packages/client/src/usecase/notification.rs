//! Out-of-band push notifications.
//!
//! Push payloads are displayed by an external collaborator. The session only
//! decides whether a payload is shown: a notification for the room the user
//! is looking at is suppressed.

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{Message, MessageType, RoomId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub notification: PushNotification,
    pub data: PushData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Data part of a push. Push services deliver these values as strings;
/// numeric ids are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub chat_room_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub message_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    }))
}

impl PushPayload {
    /// Notification for a chat message, shaped like the backend's pushes.
    pub fn from_message(message: &Message, room_name: &str) -> Self {
        let body = match message.kind {
            MessageType::Image => "📷 Photo".to_string(),
            MessageType::File => "📎 File".to_string(),
            MessageType::Text | MessageType::System => message.content.clone(),
        };
        Self {
            notification: PushNotification {
                title: format!("{} ({})", message.sender_name, room_name),
                body,
                image: None,
            },
            data: PushData {
                kind: "NEW_MESSAGE".to_string(),
                chat_room_id: Some(message.room_id.to_string()),
                message_id: Some(message.id.to_string()),
                sender_id: Some(message.sender_id.to_string()),
                message_type: serde_json::to_value(message.kind)
                    .ok()
                    .and_then(|value| value.as_str().map(str::to_string)),
                timestamp: Some(message.created_at.value().to_string()),
            },
        }
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.data
            .chat_room_id
            .as_deref()
            .and_then(|id| id.trim().parse::<i64>().ok())
            .map(RoomId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDecision {
    Suppress,
    Forward,
}

impl NotificationDecision {
    /// Suppress exactly when the payload refers to the focused room.
    pub fn for_payload(payload: &PushPayload, focused: Option<RoomId>) -> Self {
        match (payload.room_id(), focused) {
            (Some(room), Some(current)) if room == current => NotificationDecision::Suppress,
            _ => NotificationDecision::Forward,
        }
    }
}

/// Presents notifications to the user.
pub trait NotificationDisplay: Send + Sync {
    fn show(&self, payload: &PushPayload);
}
