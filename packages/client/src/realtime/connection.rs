//! Connection lifecycle: handshake, heartbeat, bounded reconnection.
//!
//! One driver task owns the link at a time. `connect` either observes an
//! already established link, joins the attempt in flight, or starts the
//! driver; every caller waits on the same lifecycle broadcast, so concurrent
//! callers never open a second link.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, interval, sleep, timeout};

use crate::config::ConnectionConfig;
use crate::domain::{Credential, Destination, SessionState, reconnect};
use crate::error::SessionError;
use crate::infrastructure::stomp::{self, Command, Frame, HEARTBEAT, Heartbeat};
use crate::infrastructure::transport::{Connector, Link};

/// Receives link lifecycle notifications and inbound frames.
///
/// Called from the driver task without any connection lock held.
pub trait LinkListener: Send + Sync {
    /// A link was established; `writer` is valid until the matching
    /// `link_down` with the same generation.
    fn link_up(&self, writer: LinkWriter);
    /// The link of this generation is gone.
    fn link_down(&self, generation: u64);
    /// An inbound MESSAGE or RECEIPT frame.
    fn deliver(&self, frame: Frame);
}

/// Write half of one established link.
#[derive(Debug, Clone)]
pub struct LinkWriter {
    tx: tokio::sync::mpsc::UnboundedSender<String>,
    generation: u64,
}

impl LinkWriter {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<String>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn send(&self, frame: &Frame) -> Result<(), SessionError> {
        self.tx
            .send(frame.encode())
            .map_err(|_| SessionError::Transport("link is closed".to_string()))
    }

    fn send_heartbeat(&self) -> bool {
        self.tx.send(HEARTBEAT.to_string()).is_ok()
    }
}

struct Lifecycle {
    state: SessionState,
    writer: Option<LinkWriter>,
    stop: Option<watch::Sender<bool>>,
    last_error: Option<SessionError>,
    /// Identifies the current driver; bumped by `disconnect` so a driver
    /// that is winding down cannot overwrite a newer lifecycle.
    run_id: u64,
    generation: u64,
}

enum LinkEnd {
    Stopped,
    Dropped(SessionError),
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    host: String,
    connector: Arc<dyn Connector>,
    listener: Arc<dyn LinkListener>,
    lifecycle: Mutex<Lifecycle>,
    transitions: broadcast::Sender<SessionState>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        host: impl Into<String>,
        connector: Arc<dyn Connector>,
        listener: Arc<dyn LinkListener>,
    ) -> Arc<Self> {
        let (transitions, _) = broadcast::channel(64);
        Arc::new(Self {
            config,
            host: host.into(),
            connector,
            listener,
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Disconnected,
                writer: None,
                stop: None,
                last_error: None,
                run_id: 0,
                generation: 0,
            }),
            transitions,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transitions are broadcast while the lifecycle lock is held, so every
    /// observer sees them in order.
    fn set_state(&self, lifecycle: &mut Lifecycle, state: SessionState) {
        if lifecycle.state == state {
            return;
        }
        tracing::debug!("Session state {} -> {}", lifecycle.state, state);
        lifecycle.state = state;
        let _ = self.transitions.send(state);
    }

    pub fn status(&self) -> SessionState {
        self.lock().state
    }

    pub fn on_status_change(&self) -> broadcast::Receiver<SessionState> {
        self.transitions.subscribe()
    }

    /// Establish the session, or join the attempt already in flight.
    ///
    /// Resolves once the lifecycle reaches `Connected` (Ok) or `Failed` /
    /// `Disconnected` (Err with the failure that ended it).
    pub async fn connect(self: &Arc<Self>, credential: Credential) -> Result<(), SessionError> {
        let mut transitions = {
            let mut lifecycle = self.lock();
            match lifecycle.state {
                SessionState::Connected => return Ok(()),
                SessionState::Connecting | SessionState::Reconnecting(_) => {
                    tracing::debug!("connect() joined the attempt in flight");
                    self.transitions.subscribe()
                }
                SessionState::Disconnected | SessionState::Failed => {
                    let transitions = self.transitions.subscribe();
                    let (stop_tx, stop_rx) = watch::channel(false);
                    lifecycle.run_id += 1;
                    lifecycle.stop = Some(stop_tx);
                    lifecycle.last_error = None;
                    let run_id = lifecycle.run_id;
                    self.set_state(&mut lifecycle, SessionState::Connecting);

                    let manager = Arc::clone(self);
                    tokio::spawn(async move {
                        manager.drive(run_id, credential, stop_rx).await;
                    });
                    transitions
                }
            }
        };

        loop {
            let state = match transitions.recv().await {
                Ok(state) => state,
                Err(broadcast::error::RecvError::Lagged(_)) => self.status(),
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SessionError::Transport("session was dropped".to_string()));
                }
            };
            match state {
                SessionState::Connected => return Ok(()),
                SessionState::Failed | SessionState::Disconnected => {
                    return Err(self.lock().last_error.clone().unwrap_or_else(|| {
                        SessionError::Transport("disconnected before the session was established".to_string())
                    }));
                }
                SessionState::Connecting | SessionState::Reconnecting(_) => continue,
            }
        }
    }

    /// Close the link and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        let writer = {
            let mut lifecycle = self.lock();
            lifecycle.run_id += 1;
            if let Some(stop) = lifecycle.stop.take() {
                let _ = stop.send(true);
            }
            lifecycle.last_error = None;
            self.set_state(&mut lifecycle, SessionState::Disconnected);
            lifecycle.writer.take()
        };

        if let Some(writer) = writer {
            let _ = writer.send(&Frame::disconnect());
            self.listener.link_down(writer.generation());
            tracing::info!("Disconnected from hub");
        }
    }

    /// Publish a JSON body to an application destination.
    pub fn publish(&self, destination: &Destination, body: String) -> Result<(), SessionError> {
        let path = destination.path();
        let lifecycle = self.lock();
        match (&lifecycle.state, &lifecycle.writer) {
            (SessionState::Connected, Some(writer)) => writer
                .send(&Frame::send(&path, body))
                .map_err(|e| SessionError::Send {
                    destination: path,
                    state: e.to_string(),
                }),
            (state, _) => Err(SessionError::Send {
                destination: path,
                state: state.to_string(),
            }),
        }
    }

    fn transition(&self, run_id: u64, state: SessionState) -> bool {
        let mut lifecycle = self.lock();
        if lifecycle.run_id != run_id {
            return false;
        }
        self.set_state(&mut lifecycle, state);
        true
    }

    fn finish(&self, run_id: u64, state: SessionState, error: Option<SessionError>) {
        let mut lifecycle = self.lock();
        if lifecycle.run_id != run_id {
            return;
        }
        lifecycle.writer = None;
        lifecycle.stop = None;
        lifecycle.last_error = error;
        self.set_state(&mut lifecycle, state);
    }

    async fn drive(
        self: Arc<Self>,
        run_id: u64,
        credential: Credential,
        mut stop: watch::Receiver<bool>,
    ) {
        let max_attempts = self.config.max_reconnect_attempts;
        let mut attempt: u32 = 0;

        loop {
            let outcome = tokio::select! {
                outcome = self.handshake(&credential) => outcome,
                _ = stopped(&mut stop) => {
                    self.finish(run_id, SessionState::Disconnected, None);
                    return;
                }
            };

            let error = match outcome {
                Ok((link, heartbeat)) => {
                    attempt = 0;
                    match self.run_link(run_id, link, heartbeat, &mut stop).await {
                        LinkEnd::Stopped => {
                            self.finish(run_id, SessionState::Disconnected, None);
                            return;
                        }
                        LinkEnd::Dropped(error) => {
                            tracing::warn!("Connection to hub lost: {}", error);
                            error
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!("Handshake failed: {}", error);
                    error
                }
            };

            if !reconnect::should_attempt_reconnect(&error, attempt, max_attempts) {
                if reconnect::should_exit_immediately(&error) {
                    tracing::error!("Giving up: {}", error);
                } else {
                    tracing::error!("Giving up after {} reconnection attempts: {}", attempt, error);
                }
                self.finish(run_id, SessionState::Failed, Some(error));
                return;
            }

            attempt += 1;
            if !self.transition(run_id, SessionState::Reconnecting(attempt)) {
                return;
            }
            tracing::info!(
                "Reconnecting in {:?} (attempt {}/{})",
                self.config.reconnect_interval,
                attempt,
                max_attempts
            );
            tokio::select! {
                _ = sleep(self.config.reconnect_interval) => {}
                _ = stopped(&mut stop) => {
                    self.finish(run_id, SessionState::Disconnected, None);
                    return;
                }
            }
        }
    }

    async fn handshake(&self, credential: &Credential) -> Result<(Link, Heartbeat), SessionError> {
        timeout(self.config.connect_timeout, self.open_and_negotiate(credential))
            .await
            .map_err(|_| {
                SessionError::Transport(format!(
                    "handshake did not complete within {:?}",
                    self.config.connect_timeout
                ))
            })?
    }

    async fn open_and_negotiate(
        &self,
        credential: &Credential,
    ) -> Result<(Link, Heartbeat), SessionError> {
        let mut link = self.connector.open().await?;
        let offer = duration_millis(self.config.heartbeat_interval);
        link.outbound
            .send(Frame::connect(&self.host, credential, offer, offer).encode())
            .map_err(|_| SessionError::Transport("link closed before CONNECT".to_string()))?;

        loop {
            let raw = match link.inbound.recv().await {
                Some(Ok(raw)) => raw,
                Some(Err(error)) => return Err(error),
                None => {
                    return Err(SessionError::Transport(
                        "link closed during the handshake".to_string(),
                    ));
                }
            };
            let frames = stomp::decode_frames(&raw).map_err(|e| {
                SessionError::Transport(format!("malformed frame during the handshake: {e}"))
            })?;
            for frame in frames {
                match frame.command {
                    Command::Connected => {
                        let heartbeat =
                            stomp::negotiate_heartbeat(offer, offer, frame.get("heart-beat"));
                        tracing::debug!("CONNECTED, negotiated heartbeat {:?}", heartbeat);
                        return Ok((link, heartbeat));
                    }
                    Command::Error => return Err(classify_error_frame(&frame)),
                    other => tracing::debug!("Ignoring {:?} before CONNECTED", other),
                }
            }
        }
    }

    async fn run_link(
        &self,
        run_id: u64,
        link: Link,
        heartbeat: Heartbeat,
        stop: &mut watch::Receiver<bool>,
    ) -> LinkEnd {
        let Link {
            outbound,
            mut inbound,
        } = link;

        let writer = {
            let mut lifecycle = self.lock();
            if lifecycle.run_id != run_id {
                return LinkEnd::Stopped;
            }
            lifecycle.generation += 1;
            let writer = LinkWriter::new(outbound, lifecycle.generation);
            lifecycle.writer = Some(writer.clone());
            writer
        };
        let generation = writer.generation();

        // Replay subscriptions before anyone can observe Connected
        self.listener.link_up(writer.clone());
        if !self.transition(run_id, SessionState::Connected) {
            self.listener.link_down(generation);
            return LinkEnd::Stopped;
        }
        tracing::info!("Connected to hub at {}", self.config.hub_url);

        let idle = Duration::from_secs(3600);
        let outgoing = heartbeat.outgoing_ms.map(Duration::from_millis);
        let incoming = heartbeat.incoming_ms.map(Duration::from_millis);
        let mut send_tick = interval(outgoing.unwrap_or(idle));
        let mut check_tick = interval(incoming.unwrap_or(idle));
        let silence_limit = incoming.unwrap_or(idle) * self.config.heartbeat_tolerance.max(1);
        let mut last_inbound = Instant::now();

        let end = loop {
            tokio::select! {
                _ = stopped(stop) => break LinkEnd::Stopped,
                received = inbound.recv() => match received {
                    Some(Ok(raw)) => {
                        last_inbound = Instant::now();
                        if let Some(error) = self.dispatch(&raw) {
                            break LinkEnd::Dropped(error);
                        }
                    }
                    Some(Err(error)) => break LinkEnd::Dropped(error),
                    None => {
                        break LinkEnd::Dropped(SessionError::Transport(
                            "hub closed the connection".to_string(),
                        ));
                    }
                },
                _ = send_tick.tick(), if outgoing.is_some() => {
                    if !writer.send_heartbeat() {
                        break LinkEnd::Dropped(SessionError::Transport("link is closed".to_string()));
                    }
                }
                _ = check_tick.tick(), if incoming.is_some() => {
                    if last_inbound.elapsed() > silence_limit {
                        break LinkEnd::Dropped(SessionError::Transport(format!(
                            "no heartbeat from hub for {:?}",
                            last_inbound.elapsed()
                        )));
                    }
                }
            }
        };

        // `disconnect` may already have taken the writer and notified
        let owned = {
            let mut lifecycle = self.lock();
            let owned = lifecycle
                .writer
                .as_ref()
                .is_some_and(|current| current.generation() == generation);
            if owned {
                lifecycle.writer = None;
            }
            owned
        };
        if owned {
            self.listener.link_down(generation);
        }
        end
    }

    /// Hand inbound frames to the listener. Returns the error that ends the
    /// link when the hub sent an ERROR frame.
    fn dispatch(&self, raw: &str) -> Option<SessionError> {
        if stomp::is_heartbeat(raw) {
            tracing::trace!("Heartbeat from hub");
            return None;
        }
        let frames = match stomp::decode_frames(raw) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("Dropping undecodable frame: {}", e);
                return None;
            }
        };
        for frame in frames {
            match frame.command {
                Command::Message | Command::Receipt => self.listener.deliver(frame),
                Command::Error => {
                    let error = classify_error_frame(&frame);
                    tracing::warn!("Hub sent ERROR: {}", error);
                    return Some(error);
                }
                other => tracing::debug!("Ignoring unexpected {:?} frame", other),
            }
        }
        None
    }
}

/// Resolves once the stop flag is raised or its sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

fn classify_error_frame(frame: &Frame) -> SessionError {
    let message = frame.get("message").unwrap_or_default();
    let text = format!("{message} {}", frame.body);
    let lowered = text.to_lowercase();
    if lowered.contains("authentication") || lowered.contains("unauthorized") {
        SessionError::Auth(text.trim().to_string())
    } else {
        SessionError::Transport(format!("hub error: {}", text.trim()))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
