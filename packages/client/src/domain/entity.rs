//! Domain entities mirrored from the chat backend.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value_object::{MessageId, RoomId, Timestamp, UserId};

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
}

/// A message as held in a room's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub kind: MessageType,
    pub created_at: Timestamp,
    pub attachments: Vec<String>,
}

impl Message {
    /// Position of the message in a room log: creation time, then id.
    pub fn order_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id)
    }
}

/// Delivery state of one message for one viewer.
///
/// Variants are declared in rank order, so the derived `Ord` is the
/// monotonic progression SENT < DELIVERED < READ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

impl DeliveryState {
    pub fn rank(self) -> u8 {
        match self {
            DeliveryState::Sent => 0,
            DeliveryState::Delivered => 1,
            DeliveryState::Read => 2,
        }
    }
}

/// Where a status observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// Optimistic local assumption (own send, local receipt, local read).
    Local,
    /// Snapshot fetched from the directory.
    Baseline,
    /// Realtime push from the hub.
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    Personal,
    Group,
    Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub online: bool,
    pub last_seen: Option<Timestamp>,
}

impl Participant {
    pub fn display_name(&self) -> &str {
        if self.full_name.is_empty() {
            &self.username
        } else {
            &self.full_name
        }
    }
}

/// Server-side summary of a room's newest message, used until the room's
/// log has been backfilled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessage {
    pub content: String,
    pub kind: MessageType,
    pub attachment_count: usize,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub kind: RoomType,
    pub participants: Vec<Participant>,
    pub last_message: Option<LastMessage>,
    pub unread_baseline: usize,
}

impl Room {
    /// Name shown in lists. Personal rooms are named after the other member.
    pub fn display_name(&self, me: UserId) -> String {
        if self.kind == RoomType::Personal
            && let Some(other) = self.participants.iter().find(|p| p.user_id != me)
        {
            return other.display_name().to_string();
        }
        self.name.clone()
    }
}

/// Last known online state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub online: bool,
    pub last_seen: Option<Timestamp>,
}

/// Connection lifecycle as observed by the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before the n-th reconnection attempt (1-based).
    Reconnecting(u32),
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Connected => f.write_str("connected"),
            SessionState::Reconnecting(attempt) => write!(f, "reconnecting (attempt {attempt})"),
            SessionState::Failed => f.write_str("failed"),
        }
    }
}
