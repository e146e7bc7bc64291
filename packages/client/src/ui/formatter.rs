//! Message formatting utilities for terminal display.

use kairo_shared::time::{format_date, timestamp_to_rfc3339};

use crate::domain::{DeliveryState, Message, MessageType, Presence, SessionState, UserId};
use crate::store::{OutgoingMessage, SidebarEntry};

const MINUTE_MILLIS: i64 = 60 * 1000;
const HOUR_MILLIS: i64 = 60 * MINUTE_MILLIS;
const DAY_MILLIS: i64 = 24 * HOUR_MILLIS;

/// Message formatter for terminal display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format the room list
    ///
    /// # Arguments
    ///
    /// * `entries` - Sidebar entries, already ordered
    /// * `focused` - Index of the focused room's entry, marked with `*`
    pub fn format_sidebar(entries: &[SidebarEntry], focused: Option<usize>) -> String {
        let mut output = String::new();
        output.push_str("\n============================================================\n");
        output.push_str("Rooms:\n");

        if entries.is_empty() {
            output.push_str("(No rooms)\n");
        } else {
            for (index, entry) in entries.iter().enumerate() {
                let marker = if focused == Some(index) { "*" } else { " " };
                let unread = if entry.unread_count > 0 {
                    format!(" ({})", entry.unread_count)
                } else {
                    String::new()
                };
                output.push_str(&format!(
                    "{} [{}] {}{}\n",
                    marker, entry.room_id, entry.name, unread
                ));
                if !entry.preview_text.is_empty() {
                    output.push_str(&format!("      {}\n", entry.preview_text));
                }
            }
        }

        output.push_str("============================================================\n");
        output
    }

    /// Format a chat message
    ///
    /// # Arguments
    ///
    /// * `message` - The message to display
    /// * `me` - The current user, whose messages are shown as "me"
    /// * `status` - Delivery state shown next to own messages
    pub fn format_message(message: &Message, me: UserId, status: Option<DeliveryState>) -> String {
        let sender = if message.sender_id == me {
            "me"
        } else {
            message.sender_name.as_str()
        };
        let body = match message.kind {
            MessageType::Image | MessageType::File if !message.attachments.is_empty() => {
                message.attachments.join(" ")
            }
            _ => message.content.clone(),
        };
        let status = match (message.sender_id == me, status) {
            (true, Some(state)) => format!(" [{}]", Self::format_status(state)),
            _ => String::new(),
        };
        format!(
            "\n@{}: {}\nsent at {}{}\n",
            sender,
            body,
            timestamp_to_rfc3339(message.created_at.value()),
            status
        )
    }

    pub fn format_outgoing(message: &OutgoingMessage) -> String {
        format!("sending: {}\n", message.content)
    }

    pub fn format_status(state: DeliveryState) -> &'static str {
        match state {
            DeliveryState::Sent => "sent",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Read => "read",
        }
    }

    pub fn format_state(state: SessionState) -> String {
        format!("\n-- {} --\n", state)
    }

    pub fn format_notification(title: &str, body: &str) -> String {
        format!("\n! {}: {}\n", title, body)
    }

    pub fn format_error(reason: &str) -> String {
        format!("\n× {}\n", reason)
    }

    /// Human-readable presence.
    ///
    /// Older than a week falls back to a bare `dd/mm/yyyy` date.
    pub fn format_presence(presence: Option<Presence>, now_millis: i64) -> String {
        const LONG_AGO: &str = "Last seen long ago";
        let Some(presence) = presence else {
            return LONG_AGO.to_string();
        };
        if presence.online {
            return "Online".to_string();
        }
        let Some(last_seen) = presence.last_seen else {
            return LONG_AGO.to_string();
        };

        let elapsed = (now_millis - last_seen.value()).max(0);
        if elapsed < MINUTE_MILLIS {
            "Last seen just now".to_string()
        } else if elapsed < HOUR_MILLIS {
            format!("Last seen {}", plural(elapsed / MINUTE_MILLIS, "minute"))
        } else if elapsed < DAY_MILLIS {
            format!("Last seen {}", plural(elapsed / HOUR_MILLIS, "hour"))
        } else if elapsed < 7 * DAY_MILLIS {
            format!("Last seen {}", plural(elapsed / DAY_MILLIS, "day"))
        } else {
            format_date(last_seen.value())
        }
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, RoomId, RoomType, Timestamp};

    fn message(sender: i64) -> Message {
        Message {
            id: MessageId(1),
            room_id: RoomId(1),
            sender_id: UserId(sender),
            sender_name: "bob".to_string(),
            content: "Hello, world!".to_string(),
            kind: MessageType::Text,
            created_at: Timestamp::new(1672531200000),
            attachments: vec![],
        }
    }

    fn offline(last_seen: i64) -> Option<Presence> {
        Some(Presence {
            online: false,
            last_seen: Some(Timestamp::new(last_seen)),
        })
    }

    #[test]
    fn test_format_sidebar_with_no_rooms() {
        // テスト項目: ルームがない場合、適切なメッセージが表示される
        // given (前提条件):
        let entries = vec![];

        // when (操作):
        let result = MessageFormatter::format_sidebar(&entries, None);

        // then (期待する結果):
        assert!(result.contains("Rooms:"));
        assert!(result.contains("(No rooms)"));
    }

    #[test]
    fn test_format_sidebar_marks_focus_and_unread() {
        // テスト項目: フォーカス中のルームに印が付き、未読数が表示される
        // given (前提条件):
        let entries = vec![
            SidebarEntry {
                room_id: RoomId(3),
                name: "general".to_string(),
                kind: RoomType::Group,
                preview_text: "hi".to_string(),
                unread_count: 2,
                last_activity_at: None,
            },
            SidebarEntry {
                room_id: RoomId(4),
                name: "random".to_string(),
                kind: RoomType::Group,
                preview_text: String::new(),
                unread_count: 0,
                last_activity_at: None,
            },
        ];

        // when (操作):
        let result = MessageFormatter::format_sidebar(&entries, Some(1));

        // then (期待する結果):
        assert!(result.contains("  [3] general (2)"));
        assert!(result.contains("      hi"));
        assert!(result.contains("* [4] random\n"));
    }

    #[test]
    fn test_format_own_message_shows_status() {
        // テスト項目: 自分のメッセージには "me" と配信状態が表示される
        // given (前提条件):
        let message = message(1);

        // when (操作):
        let result = MessageFormatter::format_message(&message, UserId(1), Some(DeliveryState::Read));

        // then (期待する結果):
        assert!(result.contains("@me: Hello, world!"));
        assert!(result.contains("[read]"));
        assert!(result.contains("2023-01-01"));
    }

    #[test]
    fn test_format_other_message_hides_status() {
        // テスト項目: 他人のメッセージには送信者名が表示され、配信状態は表示されない
        // given (前提条件):
        let message = message(2);

        // when (操作):
        let result =
            MessageFormatter::format_message(&message, UserId(1), Some(DeliveryState::Delivered));

        // then (期待する結果):
        assert!(result.contains("@bob: Hello, world!"));
        assert!(!result.contains("[delivered]"));
    }

    #[test]
    fn test_format_presence_labels() {
        // テスト項目: 最終オンライン時刻からの経過時間に応じた表示になる
        // given (前提条件):
        let now = 30 * DAY_MILLIS;

        // when (操作):
        let online = MessageFormatter::format_presence(
            Some(Presence {
                online: true,
                last_seen: None,
            }),
            now,
        );
        let just_now = MessageFormatter::format_presence(offline(now - 30_000), now);
        let minute = MessageFormatter::format_presence(offline(now - MINUTE_MILLIS), now);
        let minutes = MessageFormatter::format_presence(offline(now - 5 * MINUTE_MILLIS), now);
        let hours = MessageFormatter::format_presence(offline(now - 3 * HOUR_MILLIS), now);
        let days = MessageFormatter::format_presence(offline(now - 2 * DAY_MILLIS), now);
        let unknown = MessageFormatter::format_presence(None, now);
        let never_seen = MessageFormatter::format_presence(
            Some(Presence {
                online: false,
                last_seen: None,
            }),
            now,
        );

        // then (期待する結果):
        assert_eq!(online, "Online");
        assert_eq!(just_now, "Last seen just now");
        assert_eq!(minute, "Last seen 1 minute ago");
        assert_eq!(minutes, "Last seen 5 minutes ago");
        assert_eq!(hours, "Last seen 3 hours ago");
        assert_eq!(days, "Last seen 2 days ago");
        assert_eq!(unknown, "Last seen long ago");
        assert_eq!(never_seen, "Last seen long ago");
    }

    #[test]
    fn test_format_presence_falls_back_to_date() {
        // テスト項目: 1 週間以上前の最終オンラインは日付だけで表示される
        // given (前提条件):
        // 2023-01-01 00:00:00 UTC
        let last_seen = 1672531200000;
        let now = last_seen + 10 * DAY_MILLIS;

        // when (操作):
        let result = MessageFormatter::format_presence(offline(last_seen), now);

        // then (期待する結果):
        assert_eq!(result, "01/01/2023");
    }
}
