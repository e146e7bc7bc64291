//! Conversion logic between DTOs and domain entities.
//!
//! Conversions that can fail (timestamps arrive as strings) are `TryFrom`
//! with a `String` reason; callers wrap the reason into their own error.

use kairo_shared::time::parse_rfc3339_millis;

use crate::domain::{
    LastMessage, Message, MessageId, MessageType, Participant, PresenceUpdate, Room, RoomId,
    StatusUpdate, Timestamp, UserId,
};
use crate::infrastructure::dto::http as http_dto;
use crate::infrastructure::dto::websocket as ws_dto;

fn parse_timestamp(field: &str, value: &str) -> Result<Timestamp, String> {
    parse_rfc3339_millis(value)
        .map(Timestamp::new)
        .ok_or_else(|| format!("invalid {field} timestamp: {value}"))
}

fn parse_optional_timestamp(field: &str, value: Option<&str>) -> Result<Option<Timestamp>, String> {
    value.map(|v| parse_timestamp(field, v)).transpose()
}

// ========================================
// DTO → Domain Entity
// ========================================

impl TryFrom<ws_dto::ChatMessageDto> for Message {
    type Error = String;

    fn try_from(dto: ws_dto::ChatMessageDto) -> Result<Self, Self::Error> {
        let sender_name = if dto.sender_full_name.is_empty() {
            dto.sender_username
        } else {
            dto.sender_full_name
        };
        Ok(Self {
            id: MessageId(dto.id),
            room_id: RoomId(dto.chat_room_id),
            sender_id: UserId(dto.sender_id),
            sender_name,
            content: dto.content,
            kind: dto.kind,
            created_at: parse_timestamp("message", &dto.timestamp)?,
            attachments: dto.attachment_urls,
        })
    }
}

impl TryFrom<ws_dto::MessageStatusUpdateDto> for StatusUpdate {
    type Error = String;

    fn try_from(dto: ws_dto::MessageStatusUpdateDto) -> Result<Self, Self::Error> {
        Ok(Self {
            message_id: MessageId(dto.message_id),
            viewer_id: UserId(dto.user_id),
            state: dto.status,
            at: parse_optional_timestamp("status", dto.timestamp.as_deref())?.unwrap_or_default(),
            room_id: dto.chat_room_id.map(RoomId),
        })
    }
}

impl TryFrom<ws_dto::UserStatusDto> for PresenceUpdate {
    type Error = String;

    fn try_from(dto: ws_dto::UserStatusDto) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: UserId(dto.user_id),
            username: dto.username,
            online: dto.online,
            last_seen: parse_optional_timestamp("lastSeen", dto.last_seen.as_deref())?,
        })
    }
}

impl TryFrom<http_dto::ParticipantDto> for Participant {
    type Error = String;

    fn try_from(dto: http_dto::ParticipantDto) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: UserId(dto.user_id),
            room_id: RoomId(dto.chat_room_id),
            username: dto.username,
            full_name: dto.full_name,
            role: dto.role,
            online: dto.online,
            last_seen: parse_optional_timestamp("lastSeen", dto.last_seen.as_deref())?,
        })
    }
}

impl TryFrom<http_dto::ChatRoomDto> for Room {
    type Error = String;

    fn try_from(dto: http_dto::ChatRoomDto) -> Result<Self, Self::Error> {
        let participants = dto
            .participants
            .into_iter()
            .map(Participant::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let last_message = match dto.last_message_timestamp.as_deref() {
            Some(at) => Some(LastMessage {
                content: dto.last_message_content.unwrap_or_default(),
                kind: dto.last_message_type.unwrap_or(MessageType::Text),
                attachment_count: dto.last_message_attachment_count.unwrap_or(0),
                at: parse_timestamp("lastMessage", at)?,
            }),
            None => None,
        };

        Ok(Self {
            id: RoomId(dto.id),
            name: dto.name,
            kind: dto.kind,
            participants,
            last_message,
            unread_baseline: dto.unread_count.unwrap_or(0),
        })
    }
}
