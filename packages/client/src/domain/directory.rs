//! Directory collaborator interface.
//!
//! The directory is the REST side of the backend: room lists, message
//! history, participants and persisted delivery states. The session only
//! depends on this trait; the HTTP implementation lives in
//! `infrastructure::directory`.

use async_trait::async_trait;

use crate::error::DirectoryError;

use super::entity::{DeliveryState, Message, Participant, Room};
use super::value_object::{MessageId, RoomId, UserId};

/// One page of message history, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn first(size: u32) -> Self {
        Self { page: 0, size }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Rooms the user belongs to, with their baseline summaries.
    async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<Room>, DirectoryError>;

    /// A single room.
    async fn room(&self, room_id: RoomId) -> Result<Room, DirectoryError>;

    /// A page of the room's message history.
    async fn messages(
        &self,
        room_id: RoomId,
        page: PageRequest,
    ) -> Result<Vec<Message>, DirectoryError>;

    /// Current participants of the room.
    async fn participants(&self, room_id: RoomId) -> Result<Vec<Participant>, DirectoryError>;

    /// Persisted delivery state of one message for one viewer.
    async fn message_status(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<Option<DeliveryState>, DirectoryError>;

    /// Persist a delivery-state advance made by this user.
    async fn report_status(
        &self,
        user_id: UserId,
        message_id: MessageId,
        state: DeliveryState,
    ) -> Result<(), DirectoryError>;

    /// Persist the newest message the user has read in a room.
    async fn update_last_read(
        &self,
        user_id: UserId,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<(), DirectoryError>;
}
