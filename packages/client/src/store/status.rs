//! Delivery-state reconciliation and read detection.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::domain::{DeliveryState, Message, MessageId, StatusSource, Timestamp, UserId};

/// Stored state for one (message, viewer) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRow {
    pub state: DeliveryState,
    pub updated_at: Timestamp,
    pub source: StatusSource,
}

/// Merges status observations from every source into one monotonic view.
///
/// The stored state only ever moves up the SENT < DELIVERED < READ ladder,
/// whatever order the observations arrive in.
#[derive(Debug, Default)]
pub struct StatusReconciler {
    rows: HashMap<(MessageId, UserId), StatusRow>,
}

impl StatusReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an observation. Returns true when the stored state advanced.
    pub fn update(
        &mut self,
        message: MessageId,
        viewer: UserId,
        state: DeliveryState,
        source: StatusSource,
        at: Timestamp,
    ) -> bool {
        let row = StatusRow {
            state,
            updated_at: at,
            source,
        };
        match self.rows.entry((message, viewer)) {
            Entry::Vacant(vacant) => {
                vacant.insert(row);
                true
            }
            Entry::Occupied(mut occupied) => {
                if state > occupied.get().state {
                    occupied.insert(row);
                    true
                } else {
                    tracing::trace!(
                        "Ignoring {:?} for message {} / viewer {}: already {:?}",
                        state,
                        message,
                        viewer,
                        occupied.get().state
                    );
                    false
                }
            }
        }
    }

    pub fn get(&self, message: MessageId, viewer: UserId) -> Option<DeliveryState> {
        self.rows.get(&(message, viewer)).map(|row| row.state)
    }

    pub fn row(&self, message: MessageId, viewer: UserId) -> Option<&StatusRow> {
        self.rows.get(&(message, viewer))
    }

    /// Whether `viewer` has read `message`. Own messages count as read.
    pub fn is_read_by(&self, message: &Message, viewer: UserId) -> bool {
        message.sender_id == viewer || self.get(message.id, viewer) == Some(DeliveryState::Read)
    }

    /// Messages from others that `viewer` has not read.
    pub fn unread_count<'a>(
        &self,
        messages: impl IntoIterator<Item = &'a Message>,
        viewer: UserId,
    ) -> usize {
        messages
            .into_iter()
            .filter(|message| !self.is_read_by(message, viewer))
            .count()
    }
}

/// Tracks how long messages have been visible.
///
/// A message counts as read once it has stayed visible for the dwell
/// period; hiding it earlier resets its timer.
#[derive(Debug)]
pub struct ReadTracker {
    dwell_ms: i64,
    visible_since: HashMap<MessageId, i64>,
}

impl ReadTracker {
    pub fn new(dwell_ms: i64) -> Self {
        Self {
            dwell_ms,
            visible_since: HashMap::new(),
        }
    }

    /// Returns true when the message was not visible before.
    pub fn mark_visible(&mut self, message: MessageId, now_millis: i64) -> bool {
        match self.visible_since.entry(message) {
            Entry::Vacant(vacant) => {
                vacant.insert(now_millis);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn mark_hidden(&mut self, message: MessageId) -> bool {
        self.visible_since.remove(&message).is_some()
    }

    pub fn is_visible(&self, message: MessageId) -> bool {
        self.visible_since.contains_key(&message)
    }

    /// Remove and return every message whose dwell has elapsed.
    pub fn take_due(&mut self, now_millis: i64) -> Vec<MessageId> {
        let dwell = self.dwell_ms;
        let mut due: Vec<(i64, MessageId)> = self
            .visible_since
            .iter()
            .filter(|(_, since)| now_millis - **since >= dwell)
            .map(|(id, since)| (*since, *id))
            .collect();
        due.sort();
        for (_, id) in &due {
            self.visible_since.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    pub fn clear(&mut self) {
        self.visible_since.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageType, RoomId};

    const ME: UserId = UserId(1);

    fn message(id: i64, sender: i64) -> Message {
        Message {
            id: MessageId(id),
            room_id: RoomId(1),
            sender_id: UserId(sender),
            sender_name: String::new(),
            content: String::new(),
            kind: MessageType::Text,
            created_at: Timestamp::new(id * 100),
            attachments: vec![],
        }
    }

    #[test]
    fn test_status_never_regresses() {
        // テスト項目: 配信状態は順序に関係なく後退しない
        // given (前提条件):
        let mut statuses = StatusReconciler::new();
        statuses.update(MessageId(1), ME, DeliveryState::Read, StatusSource::Push, Timestamp::new(5));

        // when (操作):
        let changed = statuses.update(
            MessageId(1),
            ME,
            DeliveryState::Delivered,
            StatusSource::Baseline,
            Timestamp::new(9),
        );

        // then (期待する結果):
        assert!(!changed);
        assert_eq!(statuses.get(MessageId(1), ME), Some(DeliveryState::Read));
        assert_eq!(
            statuses.row(MessageId(1), ME).map(|r| r.updated_at),
            Some(Timestamp::new(5))
        );
    }

    #[test]
    fn test_status_advances_and_records_source() {
        // テスト項目: より高い状態への更新は反映され、更新元と時刻が記録される
        // given (前提条件):
        let mut statuses = StatusReconciler::new();
        statuses.update(MessageId(1), ME, DeliveryState::Sent, StatusSource::Local, Timestamp::new(1));

        // when (操作):
        let changed = statuses.update(
            MessageId(1),
            ME,
            DeliveryState::Delivered,
            StatusSource::Push,
            Timestamp::new(2),
        );

        // then (期待する結果):
        assert!(changed);
        let row = statuses.row(MessageId(1), ME).unwrap();
        assert_eq!(row.state, DeliveryState::Delivered);
        assert_eq!(row.source, StatusSource::Push);
        assert_eq!(row.updated_at, Timestamp::new(2));
    }

    #[test]
    fn test_same_state_is_not_a_change() {
        // テスト項目: 同じ状態の再適用は変更として扱われない
        // given (前提条件):
        let mut statuses = StatusReconciler::new();
        statuses.update(MessageId(1), ME, DeliveryState::Delivered, StatusSource::Push, Timestamp::new(1));

        // when (操作):
        let changed = statuses.update(
            MessageId(1),
            ME,
            DeliveryState::Delivered,
            StatusSource::Local,
            Timestamp::new(2),
        );

        // then (期待する結果):
        assert!(!changed);
    }

    #[test]
    fn test_unread_count_ignores_own_messages() {
        // テスト項目: 未読数は自分以外のメッセージのうち READ でないものを数える
        // given (前提条件):
        let mut statuses = StatusReconciler::new();
        let messages = vec![message(1, 2), message(2, 1), message(3, 2), message(4, 3)];
        statuses.update(MessageId(1), ME, DeliveryState::Read, StatusSource::Local, Timestamp::new(1));
        statuses.update(MessageId(3), ME, DeliveryState::Delivered, StatusSource::Local, Timestamp::new(1));

        // when (操作):
        let unread = statuses.unread_count(&messages, ME);

        // then (期待する結果):
        assert_eq!(unread, 2);
    }

    #[test]
    fn test_read_requires_full_dwell() {
        // テスト項目: 表示時間が既定値に達するまで既読にならない
        // given (前提条件):
        let mut reads = ReadTracker::new(500);
        reads.mark_visible(MessageId(1), 1000);

        // when (操作):
        let early = reads.take_due(1499);
        let due = reads.take_due(1500);

        // then (期待する結果):
        assert!(early.is_empty());
        assert_eq!(due, vec![MessageId(1)]);
        assert!(!reads.is_visible(MessageId(1)));
    }

    #[test]
    fn test_hiding_resets_dwell() {
        // テスト項目: 既定時間前に非表示になると計測がリセットされる
        // given (前提条件):
        let mut reads = ReadTracker::new(500);
        reads.mark_visible(MessageId(1), 1000);
        reads.mark_hidden(MessageId(1));

        // when (操作):
        reads.mark_visible(MessageId(1), 1400);
        let due = reads.take_due(1600);

        // then (期待する結果):
        assert!(due.is_empty());
        assert_eq!(reads.take_due(1900), vec![MessageId(1)]);
    }

    #[test]
    fn test_repeated_visibility_keeps_first_timestamp() {
        // テスト項目: 表示中の再通知は計測開始時刻を変えない
        // given (前提条件):
        let mut reads = ReadTracker::new(500);
        assert!(reads.mark_visible(MessageId(1), 1000));

        // when (操作):
        let newly = reads.mark_visible(MessageId(1), 1300);

        // then (期待する結果):
        assert!(!newly);
        assert_eq!(reads.take_due(1500), vec![MessageId(1)]);
    }
}
