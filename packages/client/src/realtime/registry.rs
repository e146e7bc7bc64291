//! Subscription registry.
//!
//! Tracks every channel the session wants, whether or not a link is up.
//! Entries are live (subscribed on the current link), stale (were live when
//! the link dropped) or pending (requested while no link was up). A new
//! link replays the stale entries and settles the pending ones, both in
//! registration order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::domain::{ChannelKey, HubEvent};
use crate::error::SessionError;
use crate::infrastructure::dto::websocket::decode_event;
use crate::infrastructure::stomp::{Command, Frame};

use super::connection::{LinkListener, LinkWriter};

/// A decoded event tagged with the channel it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub key: ChannelKey,
    pub event: HubEvent,
}

/// Handler side of a subscription.
pub type EventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Proof of registration returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    key: ChannelKey,
    seq: u64,
}

impl SubscriptionHandle {
    pub fn key(&self) -> ChannelKey {
        self.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Liveness {
    Live { id: String },
    Stale,
    Pending,
}

struct Entry {
    seq: u64,
    sender: EventSender,
    liveness: Liveness,
    waiters: Vec<oneshot::Sender<()>>,
}

struct RegistryState {
    writer: Option<LinkWriter>,
    entries: HashMap<ChannelKey, Entry>,
    by_id: HashMap<String, ChannelKey>,
    next_seq: u64,
    next_id: u64,
}

impl RegistryState {
    /// Send SUBSCRIBE for `key` on the current link.
    fn issue(&mut self, key: ChannelKey) -> Option<String> {
        let writer = self.writer.as_ref()?;
        self.next_id += 1;
        let id = format!("sub-{}", self.next_id);
        if let Err(e) = writer.send(&Frame::subscribe(&id, &key.destination())) {
            tracing::warn!("Failed to subscribe to {}: {}", key, e);
            return None;
        }
        self.by_id.insert(id.clone(), key);
        Some(id)
    }
}

pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    queue_wait: Duration,
}

impl SubscriptionRegistry {
    pub fn new(queue_wait: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                writer: None,
                entries: HashMap::new(),
                by_id: HashMap::new(),
                next_seq: 0,
                next_id: 0,
            }),
            queue_wait,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `key` with `sender` as its handler.
    ///
    /// Idempotent per key: a second call returns the existing handle and
    /// keeps the first handler. Without a link the request is queued and
    /// resolves when the next link comes up, or fails with
    /// `SessionError::Subscription` after the queue wait.
    pub async fn subscribe(
        &self,
        key: ChannelKey,
        sender: EventSender,
    ) -> Result<SubscriptionHandle, SessionError> {
        let (handle, ready) = {
            let mut state = self.lock();
            if let Some(entry) = state.entries.get_mut(&key) {
                let handle = SubscriptionHandle {
                    key,
                    seq: entry.seq,
                };
                if entry.liveness != Liveness::Pending {
                    tracing::debug!("Already subscribed to {}", key);
                    return Ok(handle);
                }
                let (tx, rx) = oneshot::channel();
                entry.waiters.push(tx);
                (handle, rx)
            } else {
                state.next_seq += 1;
                let seq = state.next_seq;
                let handle = SubscriptionHandle { key, seq };
                if let Some(id) = state.issue(key) {
                    tracing::debug!("Subscribed to {} as {}", key, id);
                    state.entries.insert(
                        key,
                        Entry {
                            seq,
                            sender,
                            liveness: Liveness::Live { id },
                            waiters: Vec::new(),
                        },
                    );
                    return Ok(handle);
                }
                tracing::debug!("No link; queueing subscription to {}", key);
                let (tx, rx) = oneshot::channel();
                state.entries.insert(
                    key,
                    Entry {
                        seq,
                        sender,
                        liveness: Liveness::Pending,
                        waiters: vec![tx],
                    },
                );
                (handle, rx)
            }
        };

        match timeout(self.queue_wait, ready).await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(_)) => Err(SessionError::Subscription {
                channel: key.destination(),
                waited_ms: 0,
            }),
            Err(_) => {
                let mut state = self.lock();
                let expired = state
                    .entries
                    .get(&key)
                    .is_some_and(|e| e.seq == handle.seq && e.liveness == Liveness::Pending);
                if expired {
                    state.entries.remove(&key);
                }
                tracing::warn!("Gave up waiting to subscribe to {}", key);
                Err(SessionError::Subscription {
                    channel: key.destination(),
                    waited_ms: u64::try_from(self.queue_wait.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Remove `key`. Returns whether it was registered.
    pub fn unsubscribe(&self, key: &ChannelKey) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.entries.remove(key) else {
            return false;
        };
        if let Liveness::Live { id } = entry.liveness {
            state.by_id.remove(&id);
            if let Some(writer) = &state.writer {
                let _ = writer.send(&Frame::unsubscribe(&id));
            }
        }
        tracing::debug!("Unsubscribed from {}", key);
        true
    }

    pub fn is_registered(&self, key: &ChannelKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn is_live(&self, key: &ChannelKey) -> bool {
        self.lock()
            .entries
            .get(key)
            .is_some_and(|e| matches!(e.liveness, Liveness::Live { .. }))
    }

    /// Keys live on the current link, in registration order.
    pub fn live_keys(&self) -> Vec<ChannelKey> {
        let state = self.lock();
        let mut live: Vec<(u64, ChannelKey)> = state
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.liveness, Liveness::Live { .. }))
            .map(|(key, e)| (e.seq, *key))
            .collect();
        live.sort_by_key(|(seq, _)| *seq);
        live.into_iter().map(|(_, key)| key).collect()
    }
}

impl LinkListener for SubscriptionRegistry {
    fn link_up(&self, writer: LinkWriter) {
        let mut state = self.lock();
        state.writer = Some(writer);

        let mut waiting: Vec<(u64, ChannelKey)> = state
            .entries
            .iter()
            .filter(|(_, e)| !matches!(e.liveness, Liveness::Live { .. }))
            .map(|(key, e)| (e.seq, *key))
            .collect();
        waiting.sort_by_key(|(seq, _)| *seq);

        for (_, key) in waiting {
            let Some(id) = state.issue(key) else {
                continue;
            };
            if let Some(entry) = state.entries.get_mut(&key) {
                if entry.liveness == Liveness::Stale {
                    tracing::debug!("Resubscribed to {} as {}", key, id);
                }
                entry.liveness = Liveness::Live { id };
                for waiter in entry.waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }
    }

    fn link_down(&self, generation: u64) {
        let mut state = self.lock();
        if state
            .writer
            .as_ref()
            .is_none_or(|w| w.generation() != generation)
        {
            return;
        }
        state.writer = None;
        state.by_id.clear();
        for entry in state.entries.values_mut() {
            if matches!(entry.liveness, Liveness::Live { .. }) {
                entry.liveness = Liveness::Stale;
            }
        }
    }

    fn deliver(&self, frame: Frame) {
        if frame.command == Command::Receipt {
            tracing::debug!("Receipt {:?}", frame.get("receipt-id"));
            return;
        }

        let target = {
            let state = self.lock();
            frame
                .get("subscription")
                .and_then(|id| state.by_id.get(id))
                .and_then(|key| state.entries.get(key).map(|e| (*key, e.sender.clone())))
        };
        let Some((key, sender)) = target else {
            tracing::debug!(
                "Dropping message for unknown subscription {:?}",
                frame.get("subscription")
            );
            return;
        };

        match decode_event(&key, &frame.body) {
            Ok(event) => {
                if sender.send(ChannelEvent { key, event }).is_err() {
                    tracing::debug!("Handler for {} is gone", key);
                }
            }
            Err(e) => tracing::warn!("{}", e),
        }
    }
}
