//! Prompt utilities for the terminal client.

use std::io::Write;

use crate::domain::RoomId;

/// Prompt label for the focused room.
pub fn prompt_label(username: &str, room: Option<RoomId>) -> String {
    match room {
        Some(room) => format!("{}@{}> ", username, room),
        None => format!("{}> ", username),
    }
}

/// Redisplay the prompt after printing an incoming event
pub fn redisplay_prompt(label: &str) {
    print!("{}", label);
    std::io::stdout().flush().ok();
}
