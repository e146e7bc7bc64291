//! The chat session: one explicitly constructed object owning the
//! connection, the subscriptions and the stores.
//!
//! Hub events arrive on a single channel and are applied by one dispatch
//! task; user actions call in from any task. All stores sit behind one
//! mutex that is never held across an await.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::join_all;
use kairo_shared::time::{Clock, SystemClock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use url::Url;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::domain::{
    ChannelKey, Credential, DeliveryState, Destination, DirectoryService, HubEvent, Message,
    MessageId, MessageType, PageRequest, Participant, Presence, PresenceUpdate, Room, RoomId,
    SessionState, StatusSource, StatusUpdate, Timestamp, UserId,
};
use crate::error::SessionError;
use crate::infrastructure::dto::websocket::{
    SendImageDataPayload, SendImageUrlPayload, SendTextPayload,
};
use crate::infrastructure::transport::Connector;
use crate::realtime::{ChannelEvent, ConnectionManager, LinkListener, SubscriptionRegistry};
use crate::store::{
    Ingested, MessageLog, OutgoingMessage, PresenceTracker, ReadTracker, RoomFilter,
    SidebarAggregator, SidebarEntry, StatusReconciler,
};

use super::notification::{NotificationDecision, NotificationDisplay, PushPayload};

/// Changes observable by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    MessageAdded(Message),
    /// A room's history page was merged into its log.
    BackfillCompleted { room_id: RoomId, added: usize },
    StatusChanged {
        message_id: MessageId,
        viewer_id: UserId,
        state: DeliveryState,
    },
    PresenceChanged { user_id: UserId, presence: Presence },
    SidebarChanged(RoomId),
    RoomAdded(RoomId),
    HubError(String),
}

/// An inline image to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

struct Stores {
    log: MessageLog,
    statuses: StatusReconciler,
    presence: PresenceTracker,
    sidebar: SidebarAggregator,
    reads: ReadTracker,
    focused: Option<RoomId>,
    /// Bumped on every focus change; results of work started under an
    /// older token are discarded.
    focus_token: u64,
}

impl Stores {
    fn recompute(&mut self, room: RoomId) -> bool {
        self.sidebar.recompute(room, &self.log, &self.statuses)
    }

    fn other_participants(&self, room: RoomId, me: UserId) -> Vec<UserId> {
        self.sidebar
            .room(room)
            .map(|r| {
                r.participants
                    .iter()
                    .map(|p| p.user_id)
                    .filter(|user| *user != me)
                    .collect()
            })
            .unwrap_or_default()
    }
}

struct History {
    summary: Option<Room>,
    messages: Vec<Message>,
    participants: Vec<Participant>,
    statuses: Vec<(MessageId, UserId, DeliveryState)>,
}

pub struct ChatSession {
    config: SessionConfig,
    me: UserId,
    credential: Credential,
    connection: Arc<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    directory: Arc<dyn DirectoryService>,
    clock: Arc<dyn Clock>,
    stores: Mutex<Stores>,
    channel_tx: mpsc::UnboundedSender<ChannelEvent>,
    channel_rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
    events: broadcast::Sender<SessionEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatSession {
    pub fn new(
        config: SessionConfig,
        me: UserId,
        credential: Credential,
        connector: Arc<dyn Connector>,
        directory: Arc<dyn DirectoryService>,
    ) -> Result<Arc<Self>, SessionError> {
        Self::with_clock(config, me, credential, connector, directory, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SessionConfig,
        me: UserId,
        credential: Credential,
        connector: Arc<dyn Connector>,
        directory: Arc<dyn DirectoryService>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, SessionError> {
        let host = config.connection.hub_host()?;
        let registry = Arc::new(SubscriptionRegistry::new(config.subscribe_wait));
        let listener: Arc<dyn LinkListener> = registry.clone();
        let connection = ConnectionManager::new(config.connection.clone(), host, connector, listener);
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let stores = Stores {
            log: MessageLog::new(),
            statuses: StatusReconciler::new(),
            presence: PresenceTracker::new(),
            sidebar: SidebarAggregator::new(me),
            reads: ReadTracker::new(duration_millis(config.read_dwell)),
            focused: None,
            focus_token: 0,
        };

        Ok(Arc::new(Self {
            config,
            me,
            credential,
            connection,
            registry,
            directory,
            clock,
            stores: Mutex::new(stores),
            channel_tx,
            channel_rx: Mutex::new(Some(channel_rx)),
            events,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    fn stores(&self) -> MutexGuard<'_, Stores> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Connect, subscribe the session-wide channels and load the room list.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        self.spawn_background();
        self.connection.connect(self.credential.clone()).await?;

        for key in [
            ChannelKey::SessionErrors,
            ChannelKey::GlobalNewRoom,
            ChannelKey::GlobalNotifications,
            ChannelKey::UserPresence(self.me),
        ] {
            self.registry.subscribe(key, self.channel_tx.clone()).await?;
        }

        self.load_rooms().await?;
        tracing::info!("Session started for user {}", self.me);
        Ok(())
    }

    /// Close the connection and stop every background task.
    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.connection.disconnect();
        tracing::info!("Session for user {} shut down", self.me);
    }

    fn spawn_background(self: &Arc<Self>) {
        let Some(mut rx) = self
            .channel_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let weak = Arc::downgrade(self);
        let dispatch = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.apply(event);
            }
        });

        let mut transitions = self.connection.on_status_change();
        let weak = Arc::downgrade(self);
        let forward = tokio::spawn(async move {
            let mut previous = None;
            loop {
                let state = match transitions.recv().await {
                    Ok(state) => state,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.emit(SessionEvent::StateChanged(state));
                if state == SessionState::Connected
                    && matches!(previous, Some(SessionState::Reconnecting(_)))
                {
                    session.resync_focused_room();
                }
                previous = Some(state);
            }
        });

        let weak = Arc::downgrade(self);
        let period = self.config.presence_refresh;
        let refresh = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = session.refresh_presence().await {
                    tracing::warn!("Presence refresh failed: {}", e);
                }
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([dispatch, forward, refresh]);
    }

    async fn load_rooms(&self) -> Result<(), SessionError> {
        let rooms = self.directory.rooms_for_user(self.me).await?;
        let count = rooms.len();
        for room in rooms {
            self.on_room(room);
        }
        tracing::info!("Loaded {} rooms for user {}", count, self.me);
        Ok(())
    }

    /// Focus `room`: hold its channels, backfill its history and watch its
    /// participants' presence. The previously focused room is released.
    pub async fn focus_room(self: &Arc<Self>, room: RoomId) -> Result<(), SessionError> {
        let (previous, token) = {
            let mut stores = self.stores();
            let previous = stores.focused.replace(room).filter(|prev| *prev != room);
            stores.focus_token += 1;
            stores.sidebar.set_focus(Some(room));
            stores.reads.clear();
            if let Some(prev) = previous {
                stores.log.abandon_backfill(prev);
                stores.recompute(prev);
            }
            (previous, stores.focus_token)
        };
        if let Some(prev) = previous {
            self.release_room(prev);
        }

        tracing::info!("Focusing room {}", room);
        for key in ChannelKey::room_channels(room) {
            self.registry.subscribe(key, self.channel_tx.clone()).await?;
        }
        self.backfill(room, token).await
    }

    /// Drop the focus and the focused room's channels.
    pub fn leave_room(&self) {
        let previous = {
            let mut stores = self.stores();
            stores.focus_token += 1;
            stores.sidebar.set_focus(None);
            stores.reads.clear();
            let previous = stores.focused.take();
            if let Some(prev) = previous {
                stores.log.abandon_backfill(prev);
                stores.recompute(prev);
            }
            previous
        };
        if let Some(prev) = previous {
            tracing::info!("Left room {}", prev);
            self.release_room(prev);
        }
    }

    fn release_room(&self, room: RoomId) {
        for key in ChannelKey::room_channels(room) {
            self.registry.unsubscribe(&key);
        }
        let others = self.stores().other_participants(room, self.me);
        for user in others {
            self.registry.unsubscribe(&ChannelKey::UserPresence(user));
        }
    }

    fn resync_focused_room(self: &Arc<Self>) {
        let focus = {
            let stores = self.stores();
            stores.focused.map(|room| (room, stores.focus_token))
        };
        let Some((room, token)) = focus else {
            return;
        };
        tracing::info!("Reconnected; refreshing history of room {}", room);
        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = session.backfill(room, token).await {
                tracing::warn!("Failed to refresh room {}: {}", room, e);
            }
        });
    }

    async fn backfill(&self, room: RoomId, token: u64) -> Result<(), SessionError> {
        let known = {
            let mut stores = self.stores();
            if stores.focus_token != token {
                return Ok(());
            }
            stores.log.begin_backfill(room);
            stores.sidebar.contains(room)
        };

        let history = match self.fetch_history(room, known).await {
            Ok(history) => history,
            Err(e) => {
                let mut stores = self.stores();
                if stores.focus_token == token {
                    stores.log.abandon_backfill(room);
                }
                return Err(e);
            }
        };

        let watched: Vec<UserId> = history
            .participants
            .iter()
            .map(|p| p.user_id)
            .filter(|user| *user != self.me)
            .collect();
        if !self.apply_history(room, token, history) {
            tracing::debug!("Discarding stale history of room {}", room);
            return Ok(());
        }

        let subscriptions = watched.into_iter().map(|user| {
            self.registry
                .subscribe(ChannelKey::UserPresence(user), self.channel_tx.clone())
        });
        for result in join_all(subscriptions).await {
            if let Err(e) = result {
                tracing::warn!("Failed to watch presence: {}", e);
            }
        }
        Ok(())
    }

    async fn fetch_history(&self, room: RoomId, known: bool) -> Result<History, SessionError> {
        let summary = if known {
            None
        } else {
            Some(self.directory.room(room).await?)
        };
        let page = PageRequest::first(self.config.backfill_page_size);
        let (messages, participants) = tokio::join!(
            self.directory.messages(room, page),
            self.directory.participants(room)
        );
        let (messages, participants) = (messages?, participants?);

        // Baseline for our view of others' messages and for others' view of ours.
        let others: Vec<UserId> = participants
            .iter()
            .map(|p| p.user_id)
            .filter(|user| *user != self.me)
            .collect();
        let mut pairs = Vec::new();
        for message in &messages {
            if message.sender_id == self.me {
                pairs.extend(others.iter().map(|viewer| (message.id, *viewer)));
            } else {
                pairs.push((message.id, self.me));
            }
        }

        let directory = &self.directory;
        let lookups = pairs.into_iter().map(|(message, viewer)| async move {
            (message, viewer, directory.message_status(viewer, message).await)
        });
        let mut statuses = Vec::new();
        for (message, viewer, result) in join_all(lookups).await {
            match result {
                Ok(Some(state)) => statuses.push((message, viewer, state)),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    "Failed to fetch status of message {} for user {}: {}",
                    message,
                    viewer,
                    e
                ),
            }
        }

        Ok(History {
            summary,
            messages,
            participants,
            statuses,
        })
    }

    /// Returns false when the focus moved on while the history was fetched.
    fn apply_history(&self, room: RoomId, token: u64, history: History) -> bool {
        let now = self.now();
        let added = {
            let mut stores = self.stores();
            if stores.focus_token != token {
                return false;
            }
            if let Some(summary) = history.summary {
                stores.sidebar.upsert_room(summary);
            }
            for participant in &history.participants {
                stores.presence.update(
                    participant.user_id,
                    participant.online,
                    participant.last_seen,
                );
            }
            stores.sidebar.set_participants(room, history.participants);
            for (message, viewer, state) in history.statuses {
                stores
                    .statuses
                    .update(message, viewer, state, StatusSource::Baseline, now);
            }
            let added = stores.log.ingest_backfill(room, history.messages);
            stores.recompute(room);
            added
        };
        self.emit(SessionEvent::BackfillCompleted {
            room_id: room,
            added,
        });
        self.emit(SessionEvent::SidebarChanged(room));
        true
    }

    /// Re-baseline the focused room's participants.
    ///
    /// Pushes can be missed; this corrects presence left stale by them.
    /// Returns the number of users whose presence changed.
    pub async fn refresh_presence(&self) -> Result<usize, SessionError> {
        if self.connection.status() != SessionState::Connected {
            return Ok(0);
        }
        let focus = {
            let stores = self.stores();
            stores.focused.map(|room| (room, stores.focus_token))
        };
        let Some((room, token)) = focus else {
            return Ok(0);
        };

        let participants = self.directory.participants(room).await?;
        let changed: Vec<(UserId, Presence)> = {
            let mut stores = self.stores();
            if stores.focus_token != token {
                return Ok(0);
            }
            let mut changed = Vec::new();
            for participant in &participants {
                if stores.presence.update(
                    participant.user_id,
                    participant.online,
                    participant.last_seen,
                ) && let Some(presence) = stores.presence.get(participant.user_id)
                {
                    changed.push((participant.user_id, presence));
                }
            }
            stores.sidebar.set_participants(room, participants);
            stores.recompute(room);
            changed
        };

        let count = changed.len();
        for (user_id, presence) in changed {
            self.emit(SessionEvent::PresenceChanged { user_id, presence });
        }
        tracing::debug!("Presence refresh of room {} changed {} users", room, count);
        Ok(count)
    }

    fn apply(self: &Arc<Self>, channel_event: ChannelEvent) {
        let ChannelEvent { key, event } = channel_event;
        match event {
            HubEvent::MessageReceived(message) => self.on_message(message),
            HubEvent::StatusChanged(update) => self.on_status(update),
            HubEvent::PresenceChanged(update) => self.on_presence(update),
            HubEvent::ParticipantAdded(participant) => self.on_participant(participant),
            HubEvent::RoomAvailable(room) => self.on_room(room),
            HubEvent::HubError(reason) => {
                tracing::warn!("Hub reported an error on {}: {}", key, reason);
                self.emit(SessionEvent::HubError(reason));
            }
        }
    }

    fn on_message(self: &Arc<Self>, message: Message) {
        let room = message.room_id;
        let now = self.now();
        let (outcome, known, changed) = {
            let mut stores = self.stores();
            let outcome = stores.log.ingest_live(room, message.clone());
            if outcome != Ingested::Duplicate {
                if message.sender_id == self.me {
                    if let Some(local_key) = stores.log.confirm_outgoing(&message) {
                        tracing::debug!("Message {} confirms outgoing {}", message.id, local_key);
                    }
                    let others = stores.other_participants(room, self.me);
                    for viewer in others {
                        stores.statuses.update(
                            message.id,
                            viewer,
                            DeliveryState::Sent,
                            StatusSource::Local,
                            now,
                        );
                    }
                } else {
                    stores.statuses.update(
                        message.id,
                        self.me,
                        DeliveryState::Delivered,
                        StatusSource::Local,
                        now,
                    );
                }
            }
            let known = stores.sidebar.contains(room);
            let changed = stores.recompute(room);
            (outcome, known, changed)
        };

        if outcome == Ingested::Appended {
            self.emit(SessionEvent::MessageAdded(message));
        }
        if changed {
            self.emit(SessionEvent::SidebarChanged(room));
        }
        if !known {
            let session = Arc::clone(self);
            tokio::spawn(async move {
                match session.directory.room(room).await {
                    Ok(summary) => session.on_room(summary),
                    Err(e) => tracing::warn!("Failed to load room {}: {}", room, e),
                }
            });
        }
    }

    fn on_status(&self, update: StatusUpdate) {
        let (advanced, changed_room) = {
            let mut stores = self.stores();
            let advanced = stores.statuses.update(
                update.message_id,
                update.viewer_id,
                update.state,
                StatusSource::Push,
                update.at,
            );
            let room = update
                .room_id
                .or_else(|| stores.log.room_of(update.message_id));
            let changed_room = room.filter(|room| advanced && stores.recompute(*room));
            (advanced, changed_room)
        };

        if advanced {
            self.emit(SessionEvent::StatusChanged {
                message_id: update.message_id,
                viewer_id: update.viewer_id,
                state: update.state,
            });
        }
        if let Some(room) = changed_room {
            self.emit(SessionEvent::SidebarChanged(room));
        }
    }

    fn on_presence(&self, update: PresenceUpdate) {
        let presence = {
            let mut stores = self.stores();
            if !stores
                .presence
                .update(update.user_id, update.online, update.last_seen)
            {
                return;
            }
            stores.presence.get(update.user_id)
        };
        if let Some(presence) = presence {
            tracing::debug!(
                "{} is now {}",
                update.username,
                if presence.online { "online" } else { "offline" }
            );
            self.emit(SessionEvent::PresenceChanged {
                user_id: update.user_id,
                presence,
            });
        }
    }

    fn on_participant(self: &Arc<Self>, participant: Participant) {
        let room = participant.room_id;
        let user = participant.user_id;
        let (watch, changed) = {
            let mut stores = self.stores();
            stores
                .presence
                .update(user, participant.online, participant.last_seen);
            let added = stores.sidebar.add_participant(participant);
            let watch = added && user != self.me && stores.focused == Some(room);
            (watch, stores.recompute(room))
        };

        if changed {
            self.emit(SessionEvent::SidebarChanged(room));
        }
        if watch {
            let session = Arc::clone(self);
            tokio::spawn(async move {
                let key = ChannelKey::UserPresence(user);
                if let Err(e) = session
                    .registry
                    .subscribe(key, session.channel_tx.clone())
                    .await
                {
                    tracing::warn!("Failed to watch presence of user {}: {}", user, e);
                }
            });
        }
    }

    fn on_room(&self, room: Room) {
        let id = room.id;
        let (added, changed) = {
            let mut stores = self.stores();
            for participant in &room.participants {
                stores.presence.update(
                    participant.user_id,
                    participant.online,
                    participant.last_seen,
                );
            }
            let added = stores.sidebar.upsert_room(room);
            (added, stores.recompute(id))
        };
        if added {
            tracing::info!("Room {} is available", id);
            self.emit(SessionEvent::RoomAdded(id));
        }
        if changed {
            self.emit(SessionEvent::SidebarChanged(id));
        }
    }

    /// Publish a text message. Returns the local key of the staged entry.
    pub fn send_text(&self, room: RoomId, content: &str) -> Result<Uuid, SessionError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SessionError::InvalidPayload("message is empty".to_string()));
        }
        let body = encode(&SendTextPayload { content })?;
        self.publish_staged(room, Destination::SendText(room), content, MessageType::Text, body)
    }

    /// Publish an inline image as base64.
    pub fn send_image(&self, room: RoomId, upload: &ImageUpload) -> Result<Uuid, SessionError> {
        if upload.bytes.is_empty() {
            return Err(SessionError::InvalidPayload("image is empty".to_string()));
        }
        if upload.bytes.len() > self.config.max_image_bytes {
            return Err(SessionError::InvalidPayload(format!(
                "image is {} bytes, the limit is {}",
                upload.bytes.len(),
                self.config.max_image_bytes
            )));
        }
        let body = encode(&SendImageDataPayload {
            image_data: STANDARD.encode(&upload.bytes),
            filename: &upload.filename,
            content_type: &upload.content_type,
        })?;
        self.publish_staged(
            room,
            Destination::SendImage(room),
            &upload.filename,
            MessageType::Image,
            body,
        )
    }

    /// Publish an image by absolute http(s) URL.
    pub fn send_image_url(&self, room: RoomId, url: &str) -> Result<Uuid, SessionError> {
        let url = url.trim();
        let parsed = Url::parse(url)
            .map_err(|e| SessionError::InvalidPayload(format!("invalid image url {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SessionError::InvalidPayload(format!(
                "image url {url} is not http(s)"
            )));
        }
        let body = encode(&SendImageUrlPayload {
            image_url: parsed.as_str(),
        })?;
        self.publish_staged(
            room,
            Destination::SendImage(room),
            parsed.as_str(),
            MessageType::Image,
            body,
        )
    }

    fn publish_staged(
        &self,
        room: RoomId,
        destination: Destination,
        content: &str,
        kind: MessageType,
        body: String,
    ) -> Result<Uuid, SessionError> {
        let now = self.now();
        let local_key = self.stores().log.stage_outgoing(room, content, kind, now);
        if let Err(e) = self.connection.publish(&destination, body) {
            self.stores().log.discard_outgoing(room, local_key);
            tracing::warn!("Failed to send to room {}: {}", room, e);
            return Err(e);
        }
        Ok(local_key)
    }

    /// The message entered the viewport. It is read once it stays visible
    /// for the configured dwell.
    pub fn message_visible(self: &Arc<Self>, message: MessageId) {
        let now = self.clock.now_millis();
        let started = {
            let mut stores = self.stores();
            let already_read = stores
                .log
                .get(message)
                .is_some_and(|m| stores.statuses.is_read_by(m, self.me));
            !already_read && stores.reads.mark_visible(message, now)
        };
        if !started {
            return;
        }

        let weak = Arc::downgrade(self);
        let dwell = self.config.read_dwell;
        tokio::spawn(async move {
            sleep(dwell).await;
            if let Some(session) = weak.upgrade() {
                session.process_due_reads().await;
            }
        });
    }

    pub fn message_hidden(&self, message: MessageId) {
        self.stores().reads.mark_hidden(message);
    }

    /// Mark every message whose dwell has elapsed as READ, report it and
    /// advance the rooms' last-read markers. Returns the messages read.
    pub async fn process_due_reads(&self) -> Vec<MessageId> {
        let now = self.now();
        let (read, last_read, changed_rooms) = {
            let mut stores = self.stores();
            let due = stores.reads.take_due(now.value());
            let mut read = Vec::new();
            let mut last_read: HashMap<RoomId, (Timestamp, MessageId)> = HashMap::new();
            for id in due {
                let Some((sender, room, order)) = stores
                    .log
                    .get(id)
                    .map(|m| (m.sender_id, m.room_id, m.order_key()))
                else {
                    continue;
                };
                if sender == self.me
                    || !stores
                        .statuses
                        .update(id, self.me, DeliveryState::Read, StatusSource::Local, now)
                {
                    continue;
                }
                read.push(id);
                let newest = last_read.entry(room).or_insert(order);
                if order > *newest {
                    *newest = order;
                }
            }
            let rooms: HashSet<RoomId> = last_read.keys().copied().collect();
            let changed_rooms: Vec<RoomId> = rooms
                .into_iter()
                .filter(|room| stores.recompute(*room))
                .collect();
            (read, last_read, changed_rooms)
        };

        for id in &read {
            self.emit(SessionEvent::StatusChanged {
                message_id: *id,
                viewer_id: self.me,
                state: DeliveryState::Read,
            });
        }
        for room in changed_rooms {
            self.emit(SessionEvent::SidebarChanged(room));
        }

        for id in &read {
            if let Err(e) = self
                .directory
                .report_status(self.me, *id, DeliveryState::Read)
                .await
            {
                tracing::warn!("Failed to report message {} as read: {}", id, e);
            }
        }
        for (room, (_, message)) in last_read {
            if let Err(e) = self.directory.update_last_read(self.me, room, message).await {
                tracing::warn!("Failed to update last read of room {}: {}", room, e);
            }
        }
        read
    }

    /// Decide whether a push notification is shown, and show it if so.
    pub fn handle_push(
        &self,
        payload: &PushPayload,
        display: &dyn NotificationDisplay,
    ) -> NotificationDecision {
        let decision = NotificationDecision::for_payload(payload, self.focused_room());
        match decision {
            NotificationDecision::Forward => display.show(payload),
            NotificationDecision::Suppress => {
                tracing::debug!("Suppressing notification for the focused room")
            }
        }
        decision
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.connection.status()
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn focused_room(&self) -> Option<RoomId> {
        self.stores().focused
    }

    pub fn sidebar(&self) -> Vec<SidebarEntry> {
        self.stores().sidebar.rooms()
    }

    pub fn sidebar_filtered(&self, filter: RoomFilter, query: &str) -> Vec<SidebarEntry> {
        self.stores().sidebar.filter(filter, query)
    }

    pub fn room(&self, room: RoomId) -> Option<Room> {
        self.stores().sidebar.room(room).cloned()
    }

    pub fn log(&self, room: RoomId) -> Vec<Message> {
        self.stores().log.log(room).to_vec()
    }

    pub fn outgoing(&self, room: RoomId) -> Vec<OutgoingMessage> {
        self.stores().log.outgoing(room).to_vec()
    }

    pub fn status(&self, message: MessageId, viewer: UserId) -> Option<DeliveryState> {
        self.stores().statuses.get(message, viewer)
    }

    pub fn presence(&self, user: UserId) -> Option<Presence> {
        self.stores().presence.get(user)
    }

    pub fn is_subscribed(&self, key: &ChannelKey) -> bool {
        self.registry.is_registered(key)
    }
}

fn encode(payload: &impl serde::Serialize) -> Result<String, SessionError> {
    serde_json::to_string(payload).map_err(|e| SessionError::InvalidPayload(e.to_string()))
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
