//! Parsing of terminal input lines.

use crate::domain::RoomId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    /// `/room <id>`
    Focus(RoomId),
    /// `/rooms`
    ListRooms,
    /// `/image <url>`
    ImageUrl(String),
    /// `/quit`
    Quit,
    /// Any line that is not a command.
    Text(String),
    /// A command with missing or malformed arguments.
    Invalid(String),
}

impl InputCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if !line.starts_with('/') {
            return InputCommand::Text(line.to_string());
        }

        let (command, argument) = match line.split_once(char::is_whitespace) {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };
        match command {
            "/quit" => InputCommand::Quit,
            "/rooms" => InputCommand::ListRooms,
            "/room" => match argument.parse::<i64>() {
                Ok(id) => InputCommand::Focus(RoomId(id)),
                Err(_) => InputCommand::Invalid(format!("usage: /room <id> (got '{argument}')")),
            },
            "/image" if !argument.is_empty() => InputCommand::ImageUrl(argument.to_string()),
            "/image" => InputCommand::Invalid("usage: /image <url>".to_string()),
            other => InputCommand::Invalid(format!("unknown command {other}")),
        }
    }
}
