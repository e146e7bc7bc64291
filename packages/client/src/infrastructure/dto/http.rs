//! HTTP API DTOs of the directory.

use serde::{Deserialize, Serialize};

use crate::domain::{DeliveryState, MessageType, Role, RoomType};

/// Every directory response is wrapped in `{ "data": ... }`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomDto {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomType,
    #[serde(default)]
    pub participants: Vec<ParticipantDto>,
    #[serde(default)]
    pub last_message_content: Option<String>,
    #[serde(default)]
    pub last_message_sender_username: Option<String>,
    #[serde(default)]
    pub last_message_timestamp: Option<String>,
    #[serde(default)]
    pub last_message_type: Option<MessageType>,
    #[serde(default)]
    pub last_message_attachment_count: Option<usize>,
    #[serde(default)]
    pub unread_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDto {
    #[serde(default)]
    pub id: i64,
    pub user_id: i64,
    pub chat_room_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub last_read_message_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusDto {
    #[serde(default)]
    pub id: Option<i64>,
    pub user_id: i64,
    pub message_id: i64,
    pub status: DeliveryState,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub user_id: i64,
    pub message_id: i64,
    pub status: DeliveryState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastReadRequest {
    pub user_id: i64,
    pub chat_room_id: i64,
    pub message_id: i64,
}
