//! Terminal chat client for the Kairo realtime hub.
//!
//! Connects to the hub over STOMP/WebSocket, loads the room list and lets the
//! user chat in one focused room at a time. Messages arriving for other rooms
//! are shown as notifications.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kairo-client -- --token $TOKEN --user-id 1
//! cargo run --bin kairo-client -- -t $TOKEN -u 1 --room 3
//! ```
//!
//! Commands: `/room <id>`, `/rooms`, `/image <url>`, `/quit`. Any other line
//! is sent as text to the focused room.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::{broadcast, mpsc};

use kairo_client::domain::{Credential, DeliveryState, Message, RoomId, UserId};
use kairo_client::infrastructure::directory::HttpDirectoryService;
use kairo_client::infrastructure::transport::WebSocketConnector;
use kairo_client::ui::{InputCommand, MessageFormatter, prompt_label, redisplay_prompt};
use kairo_client::usecase::{NotificationDisplay, PushPayload};
use kairo_client::{ChatSession, SessionConfig, SessionError, SessionEvent};
use kairo_shared::logger::setup_logger;
use kairo_shared::time::now_millis;

#[derive(Parser, Debug)]
#[command(name = "kairo-client")]
#[command(about = "Terminal chat client for the Kairo realtime hub", long_about = None)]
struct Args {
    /// Bearer token used for the hub and the REST API
    #[arg(short = 't', long)]
    token: String,

    /// Id of the signed-in user
    #[arg(short = 'u', long)]
    user_id: i64,

    /// Name shown in the prompt (defaults to the user id)
    #[arg(long)]
    username: Option<String>,

    /// Room to focus after connecting
    #[arg(short = 'r', long)]
    room: Option<i64>,

    /// WebSocket endpoint of the hub
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    hub_url: String,

    /// Base URL of the REST API
    #[arg(long, default_value = "http://127.0.0.1:8080/api")]
    api_url: String,

    /// Reconnection attempts before giving up
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Delay between reconnection attempts
    #[arg(long, default_value_t = 3000)]
    reconnect_interval_ms: u64,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Prints forwarded notifications above the prompt.
struct TerminalDisplay {
    label: Arc<Mutex<String>>,
}

impl NotificationDisplay for TerminalDisplay {
    fn show(&self, payload: &PushPayload) {
        print!(
            "{}",
            MessageFormatter::format_notification(
                &payload.notification.title,
                &payload.notification.body
            )
        );
        redisplay_prompt(&current_label(&self.label));
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    if let Err(e) = run(args).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), SessionError> {
    let mut config = SessionConfig::new(args.hub_url.clone(), args.api_url.clone());
    config.connection.max_reconnect_attempts = args.max_attempts;
    config.connection.reconnect_interval = Duration::from_millis(args.reconnect_interval_ms);

    let me = UserId(args.user_id);
    let username = args.username.unwrap_or_else(|| me.to_string());
    let credential = Credential::bearer(args.token);
    let connector = Arc::new(WebSocketConnector::new(args.hub_url));
    let directory = Arc::new(HttpDirectoryService::new(args.api_url, credential.clone()));
    let session = ChatSession::new(config, me, credential, connector, directory)?;

    let events = session.events();
    session.start().await?;
    tracing::info!("Connected to the hub as user {}", me);
    print!("{}", MessageFormatter::format_sidebar(&session.sidebar(), None));

    let label = Arc::new(Mutex::new(prompt_label(&username, None)));
    if let Some(room) = args.room {
        focus(&session, RoomId(room), &username, &label).await;
    }

    println!("\nType messages and press Enter to send. /room <id> switches rooms, /quit exits.\n");

    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    let label_for_readline = Arc::clone(&label);
    // rustyline is synchronous, so it gets its own thread
    let _readline_handle = std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline(&current_label(&label_for_readline)) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    let printer = tokio::spawn(print_events(
        Arc::clone(&session),
        events,
        Arc::clone(&label),
    ));

    while let Some(line) = input_rx.recv().await {
        match InputCommand::parse(&line) {
            InputCommand::Quit => break,
            InputCommand::ListRooms => {
                let entries = session.sidebar();
                let focused = session
                    .focused_room()
                    .and_then(|room| entries.iter().position(|entry| entry.room_id == room));
                print!("{}", MessageFormatter::format_sidebar(&entries, focused));
            }
            InputCommand::Focus(room) => focus(&session, room, &username, &label).await,
            InputCommand::ImageUrl(url) => match session.focused_room() {
                Some(room) => report(session.send_image_url(room, &url)),
                None => print!("{}", MessageFormatter::format_error("no room focused")),
            },
            InputCommand::Text(text) => match session.focused_room() {
                Some(room) => report(session.send_text(room, &text)),
                None => print!("{}", MessageFormatter::format_error("no room focused")),
            },
            InputCommand::Invalid(reason) => print!("{}", MessageFormatter::format_error(&reason)),
        }
    }

    printer.abort();
    session.shutdown();
    tracing::info!("Client session ended normally");
    Ok(())
}

/// Focus a room and print its history and its members' presence.
async fn focus(session: &Arc<ChatSession>, room: RoomId, username: &str, label: &Mutex<String>) {
    if let Err(e) = session.focus_room(room).await {
        print!("{}", MessageFormatter::format_error(&e.to_string()));
        return;
    }
    set_label(label, prompt_label(username, Some(room)));

    let me = session.me();
    let Some(details) = session.room(room) else {
        return;
    };
    println!("\n=== {} ===", details.display_name(me));
    let now = now_millis();
    for participant in details.participants.iter().filter(|p| p.user_id != me) {
        println!(
            "  {}: {}",
            participant.display_name(),
            MessageFormatter::format_presence(session.presence(participant.user_id), now)
        );
    }
    for message in session.log(room) {
        print!(
            "{}",
            MessageFormatter::format_message(&message, me, delivery_of(session, &message))
        );
        session.message_visible(message.id);
    }
    for outgoing in session.outgoing(room) {
        print!("{}", MessageFormatter::format_outgoing(&outgoing));
    }
}

async fn print_events(
    session: Arc<ChatSession>,
    mut events: broadcast::Receiver<SessionEvent>,
    label: Arc<Mutex<String>>,
) {
    let display = TerminalDisplay {
        label: Arc::clone(&label),
    };
    let me = session.me();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Display lagged behind by {} events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let output = match event {
            SessionEvent::StateChanged(state) => Some(MessageFormatter::format_state(state)),
            SessionEvent::MessageAdded(message) => {
                if message.sender_id != me {
                    let room_name = session
                        .room(message.room_id)
                        .map(|room| room.display_name(me))
                        .unwrap_or_default();
                    session.handle_push(&PushPayload::from_message(&message, &room_name), &display);
                }
                if session.focused_room() == Some(message.room_id) {
                    session.message_visible(message.id);
                    Some(MessageFormatter::format_message(
                        &message,
                        me,
                        delivery_of(&session, &message),
                    ))
                } else {
                    None
                }
            }
            SessionEvent::RoomAdded(room) => Some(format!("\n+ room {} is available\n", room)),
            SessionEvent::HubError(reason) => Some(MessageFormatter::format_error(&reason)),
            _ => None,
        };

        if let Some(output) = output {
            print!("{}", output);
            redisplay_prompt(&current_label(&label));
        }
    }
}

/// State every other participant has reached for one of my messages.
fn delivery_of(session: &ChatSession, message: &Message) -> Option<DeliveryState> {
    let me = session.me();
    if message.sender_id != me {
        return None;
    }
    let room = session.room(message.room_id)?;
    let reached: Vec<DeliveryState> = room
        .participants
        .iter()
        .filter(|p| p.user_id != me)
        .map(|p| session.status(message.id, p.user_id).unwrap_or(DeliveryState::Sent))
        .collect();
    reached.into_iter().min_by_key(|state| state.rank())
}

fn report(result: Result<uuid::Uuid, SessionError>) {
    match result {
        Ok(client_id) => tracing::debug!("Queued message {}", client_id),
        Err(e) => print!("{}", MessageFormatter::format_error(&e.to_string())),
    }
}

fn current_label(label: &Mutex<String>) -> String {
    match label.lock() {
        Ok(label) => label.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn set_label(label: &Mutex<String>, value: String) {
    match label.lock() {
        Ok(mut label) => *label = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}
