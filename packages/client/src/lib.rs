//! Realtime session core of the Kairo chat client.
//!
//! One STOMP connection to the hub is multiplexed into many logical
//! channels, survives drops through bounded reconnection, and feeds stores
//! that reconcile messages, delivery states and presence arriving from
//! history fetches, live pushes and local assumptions.

// layers
pub mod domain;
pub mod infrastructure;
pub mod realtime;
pub mod store;
pub mod ui;
pub mod usecase;

pub mod config;
pub mod error;

pub use config::{ConnectionConfig, SessionConfig};
pub use error::{DirectoryError, SessionError};
pub use usecase::{ChatSession, SessionEvent};
