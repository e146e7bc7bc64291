//! Logical hub channels and their wire destinations.

use std::fmt;

use super::value_object::{RoomId, UserId};

/// Identity of a subscribable hub channel.
///
/// At most one live subscription exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    RoomMessages(RoomId),
    RoomStatus(RoomId),
    RoomUpdates(RoomId),
    UserPresence(UserId),
    GlobalNewRoom,
    GlobalNotifications,
    SessionErrors,
}

impl ChannelKey {
    pub fn destination(&self) -> String {
        match self {
            ChannelKey::RoomMessages(room) => format!("/topic/chat/{room}"),
            ChannelKey::RoomStatus(room) => format!("/topic/chat/{room}/status"),
            ChannelKey::RoomUpdates(room) => format!("/topic/chat/{room}/updates"),
            ChannelKey::UserPresence(user) => format!("/topic/user/{user}/status"),
            ChannelKey::GlobalNewRoom => "/topic/chat-updates".to_string(),
            ChannelKey::GlobalNotifications => "/topic/message-notifications".to_string(),
            ChannelKey::SessionErrors => "/user/queue/errors".to_string(),
        }
    }

    /// The three channels held while a room is focused.
    pub fn room_channels(room: RoomId) -> [ChannelKey; 3] {
        [
            ChannelKey::RoomMessages(room),
            ChannelKey::RoomStatus(room),
            ChannelKey::RoomUpdates(room),
        ]
    }

    pub fn room(&self) -> Option<RoomId> {
        match self {
            ChannelKey::RoomMessages(room)
            | ChannelKey::RoomStatus(room)
            | ChannelKey::RoomUpdates(room) => Some(*room),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination())
    }
}

/// Application destinations the client publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    SendText(RoomId),
    SendImage(RoomId),
}

impl Destination {
    pub fn path(&self) -> String {
        match self {
            Destination::SendText(room) => format!("/app/chat.sendMessage/{room}"),
            Destination::SendImage(room) => format!("/app/chat.sendImage/{room}"),
        }
    }
}
