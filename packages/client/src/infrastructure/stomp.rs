//! STOMP 1.2 frame codec.
//!
//! Frames travel as WebSocket text messages. One message may carry several
//! frames, and a message made only of EOLs is a heartbeat.

use std::fmt::Write as _;

use thiserror::Error;

use crate::domain::Credential;
use crate::error::SessionError;

/// Payload sent as an outgoing heartbeat.
pub const HEARTBEAT: &str = "\n";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame ended before the header block was complete")]
    Incomplete,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("frame body is not NUL-terminated")]
    MissingTerminator,
}

impl From<FrameError> for SessionError {
    fn from(error: FrameError) -> Self {
        SessionError::Parse {
            channel: "frame".to_string(),
            reason: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let command = match line {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(command)
    }

    /// CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header with this name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(host: &str, credential: &Credential, send_ms: u64, receive_ms: u64) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("Authorization", credential.authorization())
            .header("heart-beat", format!("{send_ms},{receive_ms}"))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if self.command.escapes_headers() {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            let _ = writeln!(out, "content-length:{}", self.body.len());
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode every frame carried by one text message.
///
/// Heartbeats (bare EOLs) between or around frames are skipped, so a pure
/// heartbeat decodes to an empty list.
pub fn decode_frames(raw: &str) -> Result<Vec<Frame>, FrameError> {
    let mut frames = Vec::new();
    let mut rest = raw;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, consumed) = decode_one(rest)?;
        frames.push(frame);
        rest = &rest[consumed..];
    }
}

pub fn is_heartbeat(raw: &str) -> bool {
    raw.chars().all(|c| c == '\n' || c == '\r')
}

fn decode_one(input: &str) -> Result<(Frame, usize), FrameError> {
    let mut cursor = 0;
    let command_line = next_line(input, &mut cursor)?;
    let command = Command::parse(command_line)
        .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;

    let mut headers = Vec::new();
    loop {
        let line = next_line(input, &mut cursor)?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if command.escapes_headers() {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(value.clone()))
        })
        .transpose()?;

    let body_start = cursor;
    let (body, consumed) = match content_length {
        Some(length) => {
            let end = body_start
                .checked_add(length)
                .ok_or_else(|| FrameError::InvalidContentLength(length.to_string()))?;
            let body = input
                .get(body_start..end)
                .ok_or_else(|| FrameError::InvalidContentLength(length.to_string()))?;
            if input.as_bytes().get(end) != Some(&0) {
                return Err(FrameError::MissingTerminator);
            }
            (body, end + 1)
        }
        None => {
            let nul = input[body_start..]
                .find('\0')
                .ok_or(FrameError::MissingTerminator)?;
            (&input[body_start..body_start + nul], body_start + nul + 1)
        }
    };

    let frame = Frame {
        command,
        headers,
        body: body.to_string(),
    };
    Ok((frame, consumed))
}

fn next_line<'a>(input: &'a str, cursor: &mut usize) -> Result<&'a str, FrameError> {
    let rest = &input[*cursor..];
    let end = rest.find('\n').ok_or(FrameError::Incomplete)?;
    *cursor += end + 1;
    Ok(rest[..end].trim_end_matches('\r'))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

/// Negotiated heartbeat periods: how often we send, and how often the hub
/// promised to send. `None` disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub outgoing_ms: Option<u64>,
    pub incoming_ms: Option<u64>,
}

/// Negotiate heartbeats from our offer and the `heart-beat` header of the
/// CONNECTED frame.
pub fn negotiate_heartbeat(send_ms: u64, receive_ms: u64, server_header: Option<&str>) -> Heartbeat {
    let (server_send, server_receive) = server_header
        .and_then(|value| value.split_once(','))
        .map(|(sx, sy)| {
            (
                sx.trim().parse::<u64>().unwrap_or(0),
                sy.trim().parse::<u64>().unwrap_or(0),
            )
        })
        .unwrap_or((0, 0));

    let period = |ours: u64, theirs: u64| (ours != 0 && theirs != 0).then(|| ours.max(theirs));
    Heartbeat {
        outgoing_ms: period(send_ms, server_receive),
        incoming_ms: period(receive_ms, server_send),
    }
}
