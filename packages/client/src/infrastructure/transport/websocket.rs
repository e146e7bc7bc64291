//! WebSocket transport built on tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, protocol::Message},
};

use crate::error::SessionError;

use super::{Connector, Link};

/// Opens a WebSocket to the hub and pumps text frames through channels.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<Link, SessionError> {
        let (ws_stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(classify_handshake_error)?;
        tracing::debug!(
            "WebSocket upgrade to {} completed with HTTP {}",
            self.url,
            response.status()
        );

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        // Writer: forwards outgoing frames until the session drops its sender
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::warn!("WebSocket write error: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Reader: forwards incoming text until the socket closes
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let forwarded = match message {
                    Ok(Message::Text(text)) => inbound_tx.send(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => inbound_tx.send(Ok(text)),
                        Err(_) => {
                            tracing::warn!("Dropping non UTF-8 binary frame ({} bytes)", data.len());
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!("Hub closed the connection: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("WebSocket read error: {}", e);
                        let _ = inbound_tx.send(Err(SessionError::Transport(e.to_string())));
                        break;
                    }
                };
                if forwarded.is_err() {
                    break;
                }
            }
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

fn classify_handshake_error(error: WsError) -> SessionError {
    match &error {
        WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            SessionError::Auth(format!("hub rejected the upgrade with HTTP {}", response.status()))
        }
        _ => SessionError::Transport(error.to_string()),
    }
}
