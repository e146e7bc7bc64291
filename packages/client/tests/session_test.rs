//! End-to-end tests of the chat session against an in-process STOMP hub.
//!
//! The hub is a small axum WebSocket server that speaks just enough STOMP:
//! it answers CONNECT, records subscriptions, echoes chat sends to the room
//! topic and can drop every connection on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

use kairo_client::domain::{
    Credential, DeliveryState, DirectoryService, Message, MessageId, PageRequest, Participant,
    Role, Room, RoomId, RoomType, SessionState, UserId,
};
use kairo_client::infrastructure::stomp::{Command, Frame, decode_frames};
use kairo_client::infrastructure::transport::WebSocketConnector;
use kairo_client::{ChatSession, DirectoryError, SessionConfig, SessionError, SessionEvent};
use kairo_shared::time::{now_millis, timestamp_to_rfc3339};

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const ROOM: RoomId = RoomId(3);

struct Subscription {
    connection: u64,
    id: String,
    destination: String,
}

/// In-process STOMP hub.
#[derive(Default)]
struct FakeHub {
    reject_auth: bool,
    next_connection: AtomicU64,
    next_message: AtomicI64,
    connections: Mutex<HashMap<u64, mpsc::UnboundedSender<Option<String>>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    received: Mutex<Vec<Frame>>,
}

impl FakeHub {
    fn connection_count(&self) -> u64 {
        self.next_connection.load(Ordering::SeqCst)
    }

    fn is_subscribed(&self, destination: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.destination == destination)
    }

    fn received(&self, command: Command) -> Vec<Frame> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame.command == command)
            .cloned()
            .collect()
    }

    /// Push a MESSAGE to every subscriber of `destination`.
    fn push(&self, destination: &str, body: &Value) {
        let message_id = self.next_message.fetch_add(1, Ordering::SeqCst);
        let connections = self.connections.lock().unwrap();
        for subscription in self.subscriptions.lock().unwrap().iter() {
            if subscription.destination != destination {
                continue;
            }
            let frame = Frame::new(Command::Message)
                .header("subscription", subscription.id.clone())
                .header("destination", destination)
                .header("message-id", message_id.to_string())
                .header("content-type", "application/json")
                .with_body(body.to_string());
            if let Some(tx) = connections.get(&subscription.connection) {
                let _ = tx.send(Some(frame.encode()));
            }
        }
    }

    /// Close every open connection.
    fn drop_connections(&self) {
        let connections: Vec<_> = self.connections.lock().unwrap().drain().collect();
        self.subscriptions.lock().unwrap().clear();
        for (_, tx) in connections {
            let _ = tx.send(None);
        }
    }

    fn handle(&self, connection: u64, tx: &mpsc::UnboundedSender<Option<String>>, frame: Frame) {
        self.received.lock().unwrap().push(frame.clone());
        match frame.command {
            Command::Connect | Command::Stomp => {
                if self.reject_auth {
                    let error = Frame::new(Command::Error)
                        .header("message", "Unauthorized")
                        .with_body("invalid token");
                    let _ = tx.send(Some(error.encode()));
                    let _ = tx.send(None);
                } else {
                    let connected = Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", "0,0");
                    let _ = tx.send(Some(connected.encode()));
                }
            }
            Command::Subscribe => {
                if let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) {
                    self.subscriptions.lock().unwrap().push(Subscription {
                        connection,
                        id: id.to_string(),
                        destination: destination.to_string(),
                    });
                }
            }
            Command::Unsubscribe => {
                if let Some(id) = frame.get("id") {
                    self.subscriptions
                        .lock()
                        .unwrap()
                        .retain(|s| !(s.connection == connection && s.id == id));
                }
            }
            Command::Send => {
                let destination = frame.get("destination").unwrap_or_default();
                if let Some(room) = destination.strip_prefix("/app/chat.sendMessage/") {
                    let body: Value = serde_json::from_str(&frame.body).unwrap();
                    let id = self.next_message.fetch_add(1, Ordering::SeqCst) + 100;
                    let content = body["content"].as_str().unwrap();
                    let echo = chat_message(id, room.parse().unwrap(), ALICE, content);
                    self.push(&format!("/topic/chat/{room}"), &echo);
                }
            }
            _ => {}
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<FakeHub>>) -> Response {
    ws.on_upgrade(move |socket| serve(socket, hub))
}

async fn serve(socket: WebSocket, hub: Arc<FakeHub>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Option<String>>();
    let connection = hub.next_connection.fetch_add(1, Ordering::SeqCst);
    hub.connections.lock().unwrap().insert(connection, tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(Some(text)) = rx.recv().await {
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            WsMessage::Text(text) => {
                for frame in decode_frames(text.as_str()).unwrap_or_default() {
                    hub.handle(connection, &tx, frame);
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    hub.connections.lock().unwrap().remove(&connection);
    hub.subscriptions
        .lock()
        .unwrap()
        .retain(|s| s.connection != connection);
    writer.abort();
}

async fn spawn_hub(hub: FakeHub) -> (String, Arc<FakeHub>) {
    let hub = Arc::new(hub);
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(Arc::clone(&hub));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{}/ws", addr), hub)
}

fn chat_message(id: i64, room: i64, sender: UserId, content: &str) -> Value {
    json!({
        "id": id,
        "chatRoomId": room,
        "senderId": sender.value(),
        "senderUsername": if sender == ALICE { "alice" } else { "bob" },
        "content": content,
        "type": "TEXT",
        "timestamp": timestamp_to_rfc3339(now_millis()),
    })
}

fn participant(user: UserId, name: &str) -> Participant {
    Participant {
        user_id: user,
        room_id: ROOM,
        username: name.to_string(),
        full_name: String::new(),
        role: Role::Member,
        online: true,
        last_seen: None,
    }
}

/// Directory with a single room shared by alice and bob.
struct StaticDirectory;

#[async_trait]
impl DirectoryService for StaticDirectory {
    async fn rooms_for_user(&self, _user_id: UserId) -> Result<Vec<Room>, DirectoryError> {
        Ok(vec![Room {
            id: ROOM,
            name: "general".to_string(),
            kind: RoomType::Group,
            participants: vec![participant(ALICE, "alice"), participant(BOB, "bob")],
            last_message: None,
            unread_baseline: 0,
        }])
    }

    async fn room(&self, room_id: RoomId) -> Result<Room, DirectoryError> {
        Err(DirectoryError::Api(format!("room {room_id} not found")))
    }

    async fn messages(
        &self,
        _room_id: RoomId,
        _page: PageRequest,
    ) -> Result<Vec<Message>, DirectoryError> {
        Ok(vec![])
    }

    async fn participants(&self, _room_id: RoomId) -> Result<Vec<Participant>, DirectoryError> {
        Ok(vec![participant(ALICE, "alice"), participant(BOB, "bob")])
    }

    async fn message_status(
        &self,
        _user_id: UserId,
        _message_id: MessageId,
    ) -> Result<Option<DeliveryState>, DirectoryError> {
        Ok(None)
    }

    async fn report_status(
        &self,
        _user_id: UserId,
        _message_id: MessageId,
        _state: DeliveryState,
    ) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn update_last_read(
        &self,
        _user_id: UserId,
        _room_id: RoomId,
        _message_id: MessageId,
    ) -> Result<(), DirectoryError> {
        Ok(())
    }
}

fn session_for(hub_url: &str) -> Arc<ChatSession> {
    let mut config = SessionConfig::new(hub_url, "http://127.0.0.1:1/api");
    config.connection.reconnect_interval = Duration::from_millis(50);
    config.connection.max_reconnect_attempts = 3;
    config.read_dwell = Duration::from_secs(60);
    config.presence_refresh = Duration::from_secs(3600);
    config.subscribe_wait = Duration::from_secs(2);

    ChatSession::new(
        config,
        ALICE,
        Credential::bearer("secret"),
        Arc::new(WebSocketConnector::new(hub_url)),
        Arc::new(StaticDirectory),
    )
    .unwrap()
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn next_state(events: &mut broadcast::Receiver<SessionEvent>) -> SessionState {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
            .await
            .expect("no state change in time")
            .expect("event stream closed");
        if let SessionEvent::StateChanged(state) = event {
            return state;
        }
    }
}

#[tokio::test]
async fn test_start_subscribes_session_channels() {
    // テスト項目: セッション開始で CONNECT が送られ、セッション全体のチャネルが購読される
    // given (前提条件):
    let (url, hub) = spawn_hub(FakeHub::default()).await;
    let session = session_for(&url);

    // when (操作):
    session.start().await.unwrap();

    // then (期待する結果):
    assert_eq!(session.state(), SessionState::Connected);
    let connect = hub.received(Command::Connect);
    assert_eq!(connect.len(), 1);
    assert_eq!(connect[0].get("Authorization"), Some("Bearer secret"));
    for destination in [
        "/user/queue/errors",
        "/topic/chat-updates",
        "/topic/message-notifications",
        "/topic/user/1/status",
    ] {
        eventually(destination, || hub.is_subscribed(destination)).await;
    }
    assert_eq!(session.sidebar().len(), 1);
    session.shutdown();
}

#[tokio::test]
async fn test_live_message_reaches_focused_room() {
    // テスト項目: フォーカス中のルームに届いたメッセージがログに入り、自分宛ての配信状態が DELIVERED になる
    // given (前提条件):
    let (url, hub) = spawn_hub(FakeHub::default()).await;
    let session = session_for(&url);
    session.start().await.unwrap();
    session.focus_room(ROOM).await.unwrap();
    eventually("room subscription", || hub.is_subscribed("/topic/chat/3")).await;

    // when (操作):
    hub.push("/topic/chat/3", &chat_message(10, 3, BOB, "hello"));

    // then (期待する結果):
    eventually("live message", || session.log(ROOM).len() == 1).await;
    let log = session.log(ROOM);
    assert_eq!(log[0].id, MessageId(10));
    assert_eq!(log[0].content, "hello");
    assert_eq!(
        session.status(MessageId(10), ALICE),
        Some(DeliveryState::Delivered)
    );
    session.shutdown();
}

#[tokio::test]
async fn test_sent_text_is_confirmed_by_echo() {
    // テスト項目: 送信したテキストは送信中として保持され、ハブからのエコーで確定する
    // given (前提条件):
    let (url, hub) = spawn_hub(FakeHub::default()).await;
    let session = session_for(&url);
    session.start().await.unwrap();
    session.focus_room(ROOM).await.unwrap();
    eventually("room subscription", || hub.is_subscribed("/topic/chat/3")).await;

    // when (操作):
    session.send_text(ROOM, "hi bob").unwrap();

    // then (期待する結果):
    eventually("echo", || session.log(ROOM).len() == 1).await;
    let sends = hub.received(Command::Send);
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].get("destination"), Some("/app/chat.sendMessage/3"));
    assert_eq!(
        serde_json::from_str::<Value>(&sends[0].body).unwrap(),
        json!({ "content": "hi bob" })
    );
    let echo = &session.log(ROOM)[0];
    assert_eq!(echo.sender_id, ALICE);
    assert!(session.outgoing(ROOM).is_empty());
    assert_eq!(session.status(echo.id, BOB), Some(DeliveryState::Sent));
    session.shutdown();
}

#[tokio::test]
async fn test_dropped_connection_is_restored_with_subscriptions() {
    // テスト項目: 接続が切れると再接続し、フォーカス中のルームの購読が復元される
    // given (前提条件):
    let (url, hub) = spawn_hub(FakeHub::default()).await;
    let session = session_for(&url);
    session.start().await.unwrap();
    session.focus_room(ROOM).await.unwrap();
    eventually("room subscription", || hub.is_subscribed("/topic/chat/3")).await;
    let mut events = session.events();

    // when (操作):
    hub.drop_connections();

    // then (期待する結果):
    assert_eq!(next_state(&mut events).await, SessionState::Reconnecting(1));
    assert_eq!(next_state(&mut events).await, SessionState::Connected);
    eventually("room subscription replayed", || {
        hub.is_subscribed("/topic/chat/3")
    })
    .await;
    assert_eq!(hub.connection_count(), 2);

    hub.push("/topic/chat/3", &chat_message(20, 3, BOB, "welcome back"));
    eventually("message after reconnect", || {
        session.log(ROOM).iter().any(|m| m.id == MessageId(20))
    })
    .await;
    session.shutdown();
}

#[tokio::test]
async fn test_rejected_credentials_fail_without_retry() {
    // テスト項目: ハブが認証を拒否した場合、再接続せずに Failed になる
    // given (前提条件):
    let (url, hub) = spawn_hub(FakeHub {
        reject_auth: true,
        ..FakeHub::default()
    })
    .await;
    let session = session_for(&url);

    // when (操作):
    let result = session.start().await;

    // then (期待する結果):
    assert!(matches!(result, Err(SessionError::Auth(_))));
    assert_eq!(session.state(), SessionState::Failed);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hub.connection_count(), 1);
}

#[tokio::test]
async fn test_shutdown_sends_disconnect() {
    // テスト項目: シャットダウンで DISCONNECT が送られ、状態が Disconnected になる
    // given (前提条件):
    let (url, hub) = spawn_hub(FakeHub::default()).await;
    let session = session_for(&url);
    session.start().await.unwrap();

    // when (操作):
    session.shutdown();

    // then (期待する結果):
    assert_eq!(session.state(), SessionState::Disconnected);
    eventually("DISCONNECT frame", || {
        !hub.received(Command::Disconnect).is_empty()
    })
    .await;
}
