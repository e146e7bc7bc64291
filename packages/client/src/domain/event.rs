//! Typed events decoded from hub payloads.

use super::entity::{DeliveryState, Message, Participant, Room};
use super::value_object::{MessageId, RoomId, Timestamp, UserId};

/// A decoded push from one of the hub channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A new message in a room.
    MessageReceived(Message),
    /// A delivery-state change of one message for one viewer.
    StatusChanged(StatusUpdate),
    /// A user's online state changed.
    PresenceChanged(PresenceUpdate),
    /// A participant joined a room.
    ParticipantAdded(Participant),
    /// A room became visible to the current user (created or added to).
    RoomAvailable(Room),
    /// The hub reported an error for this session.
    HubError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub message_id: MessageId,
    pub viewer_id: UserId,
    pub state: DeliveryState,
    pub at: Timestamp,
    pub room_id: Option<RoomId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub username: String,
    pub online: bool,
    pub last_seen: Option<Timestamp>,
}
