//! In-memory hub used by the realtime and session unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ConnectionConfig;
use crate::error::SessionError;
use crate::infrastructure::stomp::{self, Command, Frame};
use crate::infrastructure::transport::{Connector, Link};

use super::connection::{LinkListener, LinkWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenBehavior {
    Accept,
    /// Accept the socket, answer CONNECT with an authentication ERROR.
    RejectAuth,
    /// Refuse the upgrade with an authentication failure.
    RejectUpgrade,
    FailTransport,
}

struct HubLink {
    id: u32,
    to_client: mpsc::UnboundedSender<Result<String, SessionError>>,
}

struct HubState {
    script: VecDeque<OpenBehavior>,
    default: OpenBehavior,
    server_heartbeat: String,
    opens: u32,
    current: Option<HubLink>,
    subscriptions: Vec<(String, String)>,
    subscribe_log: Vec<String>,
    sent: Vec<Frame>,
    heartbeats: usize,
    next_message_id: u64,
}

#[derive(Clone)]
pub(crate) struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                script: VecDeque::new(),
                default: OpenBehavior::Accept,
                server_heartbeat: "0,0".to_string(),
                opens: 0,
                current: None,
                subscriptions: Vec::new(),
                subscribe_log: Vec::new(),
                sent: Vec::new(),
                heartbeats: 0,
                next_message_id: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn connector(&self) -> MemoryConnector {
        MemoryConnector { hub: self.clone() }
    }

    /// Behaviors for the next opens, in order.
    pub(crate) fn script(&self, behaviors: impl IntoIterator<Item = OpenBehavior>) {
        self.lock().script.extend(behaviors);
    }

    /// Behavior once the script is exhausted.
    pub(crate) fn set_default(&self, behavior: OpenBehavior) {
        self.lock().default = behavior;
    }

    pub(crate) fn set_server_heartbeat(&self, value: &str) {
        self.lock().server_heartbeat = value.to_string();
    }

    pub(crate) fn opens(&self) -> u32 {
        self.lock().opens
    }

    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.lock().sent.clone()
    }

    pub(crate) fn heartbeats_received(&self) -> usize {
        self.lock().heartbeats
    }

    /// Destinations subscribed on the current link.
    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.lock()
            .subscriptions
            .iter()
            .map(|(_, destination)| destination.clone())
            .collect()
    }

    /// Every SUBSCRIBE received for `destination`, across links.
    pub(crate) fn subscribe_count(&self, destination: &str) -> usize {
        self.lock()
            .subscribe_log
            .iter()
            .filter(|d| d.as_str() == destination)
            .count()
    }

    /// Push a MESSAGE to the current link's subscriber of `destination`.
    pub(crate) fn push(&self, destination: &str, body: &str) -> bool {
        let mut state = self.lock();
        let Some(id) = state
            .subscriptions
            .iter()
            .find(|(_, d)| d == destination)
            .map(|(id, _)| id.clone())
        else {
            return false;
        };
        state.next_message_id += 1;
        let frame = Frame::new(Command::Message)
            .header("subscription", id)
            .header("destination", destination)
            .header("message-id", state.next_message_id.to_string())
            .with_body(body);
        match &state.current {
            Some(link) => link.to_client.send(Ok(frame.encode())).is_ok(),
            None => false,
        }
    }

    /// Send raw text to the current link.
    pub(crate) fn push_raw(&self, raw: &str) -> bool {
        match &self.lock().current {
            Some(link) => link.to_client.send(Ok(raw.to_string())).is_ok(),
            None => false,
        }
    }

    pub(crate) fn drop_connection(&self) {
        let mut state = self.lock();
        state.current = None;
        state.subscriptions.clear();
    }

    fn handle(&self, link_id: u32, reject: bool, raw: &str) {
        let mut state = self.lock();
        if stomp::is_heartbeat(raw) {
            state.heartbeats += 1;
            return;
        }
        let Ok(frames) = stomp::decode_frames(raw) else {
            return;
        };
        for frame in frames {
            match frame.command {
                Command::Connect => {
                    let reply = if reject {
                        Frame::new(Command::Error).header("message", "Authentication failed")
                    } else {
                        Frame::new(Command::Connected)
                            .header("version", "1.2")
                            .header("heart-beat", state.server_heartbeat.clone())
                    };
                    if let Some(link) = state.current.as_ref().filter(|l| l.id == link_id) {
                        let _ = link.to_client.send(Ok(reply.encode()));
                    }
                }
                Command::Subscribe => {
                    let id = frame.get("id").unwrap_or_default().to_string();
                    let destination = frame.get("destination").unwrap_or_default().to_string();
                    state.subscribe_log.push(destination.clone());
                    state.subscriptions.push((id, destination));
                }
                Command::Unsubscribe => {
                    let id = frame.get("id").unwrap_or_default().to_string();
                    state.subscriptions.retain(|(existing, _)| *existing != id);
                }
                Command::Send => state.sent.push(frame),
                _ => {}
            }
        }
    }
}

pub(crate) struct MemoryConnector {
    hub: MemoryHub,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self) -> Result<Link, SessionError> {
        let (behavior, link_id) = {
            let mut state = self.hub.lock();
            state.opens += 1;
            let behavior = state.script.pop_front().unwrap_or(state.default);
            (behavior, state.opens)
        };

        let reject = match behavior {
            OpenBehavior::FailTransport => {
                return Err(SessionError::Transport("connection refused".to_string()));
            }
            OpenBehavior::RejectUpgrade => {
                return Err(SessionError::Auth("hub rejected the upgrade with HTTP 401".to_string()));
            }
            OpenBehavior::Accept => false,
            OpenBehavior::RejectAuth => true,
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        {
            let mut state = self.hub.lock();
            state.current = Some(HubLink {
                id: link_id,
                to_client: inbound_tx,
            });
            state.subscriptions.clear();
        }

        let hub = self.hub.clone();
        tokio::spawn(async move {
            while let Some(raw) = outbound_rx.recv().await {
                hub.handle(link_id, reject, &raw);
            }
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Counts link notifications and keeps delivered frames.
#[derive(Default)]
pub(crate) struct RecordingListener {
    ups: AtomicUsize,
    downs: AtomicUsize,
    delivered: Mutex<Vec<Frame>>,
}

impl RecordingListener {
    pub(crate) fn link_ups(&self) -> usize {
        self.ups.load(Ordering::SeqCst)
    }

    pub(crate) fn link_downs(&self) -> usize {
        self.downs.load(Ordering::SeqCst)
    }

    pub(crate) fn delivered(&self) -> Vec<Frame> {
        self.delivered.lock().unwrap().clone()
    }
}

impl LinkListener for RecordingListener {
    fn link_up(&self, _writer: LinkWriter) {
        self.ups.fetch_add(1, Ordering::SeqCst);
    }

    fn link_down(&self, _generation: u64) {
        self.downs.fetch_add(1, Ordering::SeqCst);
    }

    fn deliver(&self, frame: Frame) {
        self.delivered.lock().unwrap().push(frame);
    }
}

/// Millisecond-scale lifecycle settings.
pub(crate) fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        hub_url: "ws://localhost/ws".to_string(),
        max_reconnect_attempts: 5,
        reconnect_interval: Duration::from_millis(10),
        heartbeat_interval: Duration::from_secs(10),
        heartbeat_tolerance: 2,
        connect_timeout: Duration::from_secs(1),
    }
}

/// Poll `condition` until it holds; panics after a few seconds.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..600 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition was not met in time");
}
