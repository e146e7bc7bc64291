//! Per-room message logs: deduplication, ordering and backfill merge.
//!
//! A room's log is ordered by (creation time, id) and holds each message id
//! once. While a backfill is in flight, live messages are held aside and
//! merged with the fetched page when it lands, so a live message can never
//! end up positioned before older history.
//!
//! Optimistic outgoing messages have no server id yet; they live in a
//! separate outbox keyed by a client-side UUID and never enter the log.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::domain::{Message, MessageId, MessageType, RoomId, Timestamp};

/// Outcome of ingesting one live message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    Appended,
    /// Held until the room's backfill completes.
    Held,
    Duplicate,
}

/// A message sent by this client that the hub has not echoed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub local_key: Uuid,
    pub room_id: RoomId,
    pub content: String,
    pub kind: MessageType,
    pub staged_at: Timestamp,
}

#[derive(Debug, Default)]
struct RoomLog {
    entries: Vec<Message>,
    ids: HashSet<MessageId>,
    held: Vec<Message>,
    backfill_in_flight: bool,
    backfilled: bool,
    outgoing: Vec<OutgoingMessage>,
}

impl RoomLog {
    fn merge(&mut self, batch: Vec<Message>) -> usize {
        let before = self.entries.len();
        let held = std::mem::take(&mut self.held);
        for message in batch.into_iter().chain(held) {
            if self.ids.insert(message.id) {
                self.entries.push(message);
            }
        }
        self.entries.sort_by_key(Message::order_key);
        self.entries.len() - before
    }
}

#[derive(Debug, Default)]
pub struct MessageLog {
    rooms: HashMap<RoomId, RoomLog>,
    index: HashMap<MessageId, RoomId>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start holding live messages for `room` until the backfill lands.
    pub fn begin_backfill(&mut self, room: RoomId) {
        self.rooms.entry(room).or_default().backfill_in_flight = true;
    }

    /// Merge a fetched history page with the log and any held live
    /// messages. Returns the number of messages added.
    pub fn ingest_backfill(&mut self, room: RoomId, batch: Vec<Message>) -> usize {
        let log = self.rooms.entry(room).or_default();
        let added = log.merge(batch);
        log.backfill_in_flight = false;
        log.backfilled = true;
        for message in &log.entries {
            self.index.insert(message.id, room);
        }
        tracing::debug!("Backfilled room {} with {} new messages", room, added);
        added
    }

    /// The backfill failed or was superseded: release held messages into
    /// the log in order.
    pub fn abandon_backfill(&mut self, room: RoomId) {
        let Some(log) = self.rooms.get_mut(&room) else {
            return;
        };
        if !log.backfill_in_flight {
            return;
        }
        log.merge(Vec::new());
        log.backfill_in_flight = false;
        for message in &log.entries {
            self.index.insert(message.id, room);
        }
    }

    pub fn ingest_live(&mut self, room: RoomId, message: Message) -> Ingested {
        let log = self.rooms.entry(room).or_default();
        if log.ids.contains(&message.id) || log.held.iter().any(|m| m.id == message.id) {
            return Ingested::Duplicate;
        }
        if log.backfill_in_flight {
            log.held.push(message);
            return Ingested::Held;
        }
        self.index.insert(message.id, room);
        log.ids.insert(message.id);
        log.entries.push(message);
        Ingested::Appended
    }

    pub fn log(&self, room: RoomId) -> &[Message] {
        self.rooms
            .get(&room)
            .map(|log| log.entries.as_slice())
            .unwrap_or_default()
    }

    pub fn newest(&self, room: RoomId) -> Option<&Message> {
        self.rooms.get(&room).and_then(|log| log.entries.last())
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        let room = self.index.get(&id)?;
        self.log(*room).iter().find(|m| m.id == id)
    }

    pub fn room_of(&self, id: MessageId) -> Option<RoomId> {
        self.index.get(&id).copied()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn is_backfilled(&self, room: RoomId) -> bool {
        self.rooms.get(&room).is_some_and(|log| log.backfilled)
    }

    pub fn stage_outgoing(
        &mut self,
        room: RoomId,
        content: impl Into<String>,
        kind: MessageType,
        now: Timestamp,
    ) -> Uuid {
        let local_key = Uuid::new_v4();
        self.rooms.entry(room).or_default().outgoing.push(OutgoingMessage {
            local_key,
            room_id: room,
            content: content.into(),
            kind,
            staged_at: now,
        });
        local_key
    }

    pub fn discard_outgoing(&mut self, room: RoomId, local_key: Uuid) -> bool {
        let Some(log) = self.rooms.get_mut(&room) else {
            return false;
        };
        let before = log.outgoing.len();
        log.outgoing.retain(|m| m.local_key != local_key);
        log.outgoing.len() != before
    }

    /// Drop the oldest staged message matching the hub's echo of our own
    /// message. Returns its local key.
    pub fn confirm_outgoing(&mut self, echo: &Message) -> Option<Uuid> {
        let log = self.rooms.get_mut(&echo.room_id)?;
        let position = log.outgoing.iter().position(|staged| match staged.kind {
            MessageType::Image => echo.kind == MessageType::Image,
            _ => staged.kind == echo.kind && staged.content == echo.content,
        })?;
        Some(log.outgoing.remove(position).local_key)
    }

    pub fn outgoing(&self, room: RoomId) -> &[OutgoingMessage] {
        self.rooms
            .get(&room)
            .map(|log| log.outgoing.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserId;

    fn message(id: i64, at: i64) -> Message {
        Message {
            id: MessageId(id),
            room_id: RoomId(1),
            sender_id: UserId(2),
            sender_name: "bob".to_string(),
            content: format!("message {id}"),
            kind: MessageType::Text,
            created_at: Timestamp::new(at),
            attachments: vec![],
        }
    }

    fn ids(log: &MessageLog) -> Vec<i64> {
        log.log(RoomId(1)).iter().map(|m| m.id.value()).collect()
    }

    #[test]
    fn test_live_during_backfill_is_merged_in_order() {
        // テスト項目: バックフィル中に届いたライブメッセージが履歴と時刻順に統合される
        // given (前提条件):
        let mut log = MessageLog::new();
        log.begin_backfill(RoomId(1));

        // when (操作):
        let held = log.ingest_live(RoomId(1), message(4, 400));
        log.ingest_backfill(RoomId(1), vec![message(1, 100), message(2, 200), message(3, 300)]);

        // then (期待する結果):
        assert_eq!(held, Ingested::Held);
        assert_eq!(ids(&log), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_live_older_than_history_is_positioned_by_time() {
        // テスト項目: バックフィル中に届いた古いライブメッセージも正しい位置に入る
        // given (前提条件):
        let mut log = MessageLog::new();
        log.begin_backfill(RoomId(1));

        // when (操作):
        log.ingest_live(RoomId(1), message(9, 150));
        log.ingest_backfill(RoomId(1), vec![message(1, 100), message(2, 200)]);

        // then (期待する結果):
        assert_eq!(ids(&log), vec![1, 9, 2]);
    }

    #[test]
    fn test_live_duplicate_of_backfill_appears_once() {
        // テスト項目: バックフィルと重複するライブメッセージは 1 度だけ現れる
        // given (前提条件):
        let mut log = MessageLog::new();
        log.begin_backfill(RoomId(1));
        log.ingest_live(RoomId(1), message(2, 200));

        // when (操作):
        let added = log.ingest_backfill(RoomId(1), vec![message(1, 100), message(2, 200)]);
        let again = log.ingest_live(RoomId(1), message(2, 200));

        // then (期待する結果):
        assert_eq!(added, 2);
        assert_eq!(again, Ingested::Duplicate);
        assert_eq!(ids(&log), vec![1, 2]);
    }

    #[test]
    fn test_equal_timestamps_are_ordered_by_id() {
        // テスト項目: 同時刻のメッセージは ID 順に並ぶ
        // given (前提条件):
        let mut log = MessageLog::new();

        // when (操作):
        log.ingest_backfill(RoomId(1), vec![message(7, 100), message(5, 100), message(6, 100)]);

        // then (期待する結果):
        assert_eq!(ids(&log), vec![5, 6, 7]);
    }

    #[test]
    fn test_live_after_backfill_appends() {
        // テスト項目: バックフィル完了後のライブメッセージは末尾に追加される
        // given (前提条件):
        let mut log = MessageLog::new();
        log.ingest_backfill(RoomId(1), vec![message(1, 100)]);

        // when (操作):
        let result = log.ingest_live(RoomId(1), message(2, 200));

        // then (期待する結果):
        assert_eq!(result, Ingested::Appended);
        assert_eq!(ids(&log), vec![1, 2]);
        assert_eq!(log.room_of(MessageId(2)), Some(RoomId(1)));
        assert_eq!(log.newest(RoomId(1)).map(|m| m.id), Some(MessageId(2)));
    }

    #[test]
    fn test_backfill_batch_duplicates_are_collapsed() {
        // テスト項目: バックフィルのバッチ内の重複 ID は 1 つにまとめられる
        // given (前提条件):
        let mut log = MessageLog::new();

        // when (操作):
        log.ingest_backfill(RoomId(1), vec![message(1, 100), message(1, 100)]);

        // then (期待する結果):
        assert_eq!(ids(&log), vec![1]);
    }

    #[test]
    fn test_abandoned_backfill_releases_held_messages() {
        // テスト項目: バックフィルを破棄すると保留中のメッセージがログに入る
        // given (前提条件):
        let mut log = MessageLog::new();
        log.begin_backfill(RoomId(1));
        log.ingest_live(RoomId(1), message(3, 300));
        log.ingest_live(RoomId(1), message(2, 200));

        // when (操作):
        log.abandon_backfill(RoomId(1));

        // then (期待する結果):
        assert_eq!(ids(&log), vec![2, 3]);
        assert!(!log.is_backfilled(RoomId(1)));
    }

    #[test]
    fn test_outgoing_is_kept_outside_the_log_until_echo() {
        // テスト項目: 送信中のメッセージはログの外に保持され、エコーで取り除かれる
        // given (前提条件):
        let mut log = MessageLog::new();
        let key = log.stage_outgoing(RoomId(1), "message 5", MessageType::Text, Timestamp::new(10));
        assert_eq!(log.outgoing(RoomId(1)).len(), 1);
        assert!(log.log(RoomId(1)).is_empty());

        // when (操作):
        let confirmed = log.confirm_outgoing(&message(5, 500));

        // then (期待する結果):
        assert_eq!(confirmed, Some(key));
        assert!(log.outgoing(RoomId(1)).is_empty());
    }

    #[test]
    fn test_discard_outgoing() {
        // テスト項目: 送信失敗時に送信中のメッセージが破棄される
        // given (前提条件):
        let mut log = MessageLog::new();
        let key = log.stage_outgoing(RoomId(1), "hi", MessageType::Text, Timestamp::new(10));

        // when (操作):
        let removed = log.discard_outgoing(RoomId(1), key);

        // then (期待する結果):
        assert!(removed);
        assert!(log.outgoing(RoomId(1)).is_empty());
    }
}
