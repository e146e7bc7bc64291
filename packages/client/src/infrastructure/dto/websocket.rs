//! Hub push payloads and publish bodies.

use serde::{Deserialize, Serialize};

use crate::domain::{ChannelKey, DeliveryState, HubEvent, MessageType, StatusUpdate};
use crate::error::SessionError;

use super::http::{ChatRoomDto, ParticipantDto};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageDto {
    pub id: i64,
    pub chat_room_id: i64,
    pub sender_id: i64,
    #[serde(default)]
    pub sender_username: String,
    #[serde(default)]
    pub sender_full_name: String,
    #[serde(default)]
    pub sender_avatar_url: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub timestamp: String,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
}

/// `MESSAGE_STATUS_UPDATE` on a room's status channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusUpdateDto {
    pub message_id: i64,
    pub user_id: i64,
    pub status: DeliveryState,
    #[serde(default)]
    pub chat_room_id: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Online state of a user, on a room's status channel or the user's own
/// presence channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusDto {
    pub user_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAddedDto {
    pub chat_room_id: i64,
    pub participant: ParticipantDto,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum NewRoomDto {
    ChatRoomCreated { chat_room: ChatRoomDto },
    AddedToChatRoom { chat_room: ChatRoomDto },
}

impl NewRoomDto {
    pub fn into_room(self) -> ChatRoomDto {
        match self {
            NewRoomDto::ChatRoomCreated { chat_room } | NewRoomDto::AddedToChatRoom { chat_room } => {
                chat_room
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendTextPayload<'a> {
    pub content: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendImageDataPayload<'a> {
    pub image_data: String,
    pub filename: &'a str,
    pub content_type: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendImageUrlPayload<'a> {
    pub image_url: &'a str,
}

const MESSAGE_STATUS_UPDATE: &str = "MESSAGE_STATUS_UPDATE";

/// Whether a room status payload has the shape of a user status push.
fn is_user_status(value: &serde_json::Value) -> bool {
    value.get("userId").is_some_and(|v| !v.is_null())
        && value.get("username").is_some_and(|v| !v.is_null())
}

/// Decode a payload received on `key` into a typed event.
///
/// Each channel has exactly one payload shape, except room status which
/// carries two: message status updates tagged `MESSAGE_STATUS_UPDATE`, and
/// user status pushes recognized by their `userId` and `username` fields.
pub fn decode_event(key: &ChannelKey, body: &str) -> Result<HubEvent, SessionError> {
    let parse_error = |reason: String| SessionError::Parse {
        channel: key.destination(),
        reason,
    };

    match key {
        ChannelKey::RoomMessages(_) | ChannelKey::GlobalNotifications => {
            let dto: ChatMessageDto =
                serde_json::from_str(body).map_err(|e| parse_error(e.to_string()))?;
            let message = dto.try_into().map_err(parse_error)?;
            Ok(HubEvent::MessageReceived(message))
        }
        ChannelKey::RoomStatus(_) => {
            let value: serde_json::Value =
                serde_json::from_str(body).map_err(|e| parse_error(e.to_string()))?;
            let tag = value.get("type").and_then(serde_json::Value::as_str);
            if tag == Some(MESSAGE_STATUS_UPDATE) {
                let dto: MessageStatusUpdateDto =
                    serde_json::from_value(value).map_err(|e| parse_error(e.to_string()))?;
                let mut update: StatusUpdate = dto.try_into().map_err(parse_error)?;
                update.room_id = update.room_id.or(key.room());
                Ok(HubEvent::StatusChanged(update))
            } else if is_user_status(&value) {
                let dto: UserStatusDto =
                    serde_json::from_value(value).map_err(|e| parse_error(e.to_string()))?;
                Ok(HubEvent::PresenceChanged(dto.try_into().map_err(parse_error)?))
            } else {
                Err(parse_error(format!("unrecognized status payload (type {tag:?})")))
            }
        }
        ChannelKey::UserPresence(_) => {
            let dto: UserStatusDto =
                serde_json::from_str(body).map_err(|e| parse_error(e.to_string()))?;
            Ok(HubEvent::PresenceChanged(dto.try_into().map_err(parse_error)?))
        }
        ChannelKey::RoomUpdates(_) => {
            let dto: ParticipantAddedDto =
                serde_json::from_str(body).map_err(|e| parse_error(e.to_string()))?;
            let mut participant = dto.participant;
            participant.chat_room_id = dto.chat_room_id;
            Ok(HubEvent::ParticipantAdded(
                participant.try_into().map_err(parse_error)?,
            ))
        }
        ChannelKey::GlobalNewRoom => {
            let dto: NewRoomDto =
                serde_json::from_str(body).map_err(|e| parse_error(e.to_string()))?;
            Ok(HubEvent::RoomAvailable(
                dto.into_room().try_into().map_err(parse_error)?,
            ))
        }
        ChannelKey::SessionErrors => Ok(HubEvent::HubError(body.to_string())),
    }
}
