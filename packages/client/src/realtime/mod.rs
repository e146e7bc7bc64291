//! Realtime plumbing: the connection lifecycle and the subscription
//! registry that rides on top of it.

pub mod connection;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionManager, LinkListener, LinkWriter};
pub use registry::{ChannelEvent, EventSender, SubscriptionHandle, SubscriptionRegistry};
