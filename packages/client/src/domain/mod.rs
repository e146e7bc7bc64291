//! Domain layer: identifiers, entities, channel keys and the collaborator
//! interfaces the realtime core depends on.
//!
//! Nothing in this module touches the network. Infrastructure implements the
//! traits defined here (dependency inversion), and the stores operate purely
//! on these types.

pub mod channel;
pub mod directory;
pub mod entity;
pub mod event;
pub mod reconnect;
pub mod value_object;

pub use channel::{ChannelKey, Destination};
pub use directory::{DirectoryService, PageRequest};
pub use entity::{
    DeliveryState, LastMessage, Message, MessageType, Participant, Presence, Role, Room, RoomType,
    SessionState, StatusSource,
};
pub use event::{HubEvent, PresenceUpdate, StatusUpdate};
pub use value_object::{Credential, MessageId, RoomId, Timestamp, UserId};
