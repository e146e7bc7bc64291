//! Transport seam between the connection manager and the network.
//!
//! A [`Connector`] opens one bidirectional text link to the hub. The
//! connection manager speaks STOMP over it and never sees sockets.

pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SessionError;

pub use websocket::WebSocketConnector;

/// An open link to the hub.
///
/// Dropping `outbound` closes the link. `inbound` ends (yields `None`) when
/// the peer closes; a read failure is delivered once as `Err` before that.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<Result<String, SessionError>>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh link. HTTP-level credential rejection maps to
    /// `SessionError::Auth`, everything else to `SessionError::Transport`.
    async fn open(&self) -> Result<Link, SessionError>;
}
