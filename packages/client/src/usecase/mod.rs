//! Use cases: the chat session and the notification gate.

pub mod notification;
pub mod session;

pub use notification::{
    NotificationDecision, NotificationDisplay, PushData, PushNotification, PushPayload,
};
pub use session::{ChatSession, ImageUpload, SessionEvent};
