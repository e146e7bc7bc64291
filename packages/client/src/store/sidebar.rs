//! Room list derived from the other stores.
//!
//! The aggregator owns the known rooms (from the room list baseline and
//! live announcements) and a cached [`SidebarEntry`] per room. Entries are
//! recomputed from the message log and status reconciler when a room's
//! newest message or unread count may have changed.

use std::collections::HashMap;

use crate::domain::{
    Message, MessageId, MessageType, Participant, Room, RoomId, RoomType, Timestamp, UserId,
};

use super::ingest::MessageLog;
use super::status::StatusReconciler;

const PREVIEW_MAX_CHARS: usize = 50;

/// One row of the room list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarEntry {
    pub room_id: RoomId,
    pub name: String,
    pub kind: RoomType,
    pub preview_text: String,
    pub unread_count: usize,
    pub last_activity_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomFilter {
    #[default]
    All,
    Personal,
    Group,
    Channel,
}

impl RoomFilter {
    fn accepts(self, kind: RoomType) -> bool {
        match self {
            RoomFilter::All => true,
            RoomFilter::Personal => kind == RoomType::Personal,
            RoomFilter::Group => kind == RoomType::Group,
            RoomFilter::Channel => kind == RoomType::Channel,
        }
    }
}

/// Short text shown under a room name for its newest message.
pub fn preview_text(kind: MessageType, content: &str, attachment_count: usize) -> String {
    let text = match kind {
        MessageType::Image if attachment_count > 1 => format!("📷 {attachment_count} photos"),
        MessageType::Image => "📷 Photo".to_string(),
        MessageType::File if attachment_count > 1 => format!("📎 {attachment_count} files"),
        MessageType::File => "📎 File".to_string(),
        MessageType::System if content.is_empty() => "System message".to_string(),
        MessageType::System | MessageType::Text => content.to_string(),
    };
    truncate(&text)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
    truncated.push_str("...");
    truncated
}

#[derive(Debug)]
pub struct SidebarAggregator {
    me: UserId,
    rooms: HashMap<RoomId, Room>,
    entries: HashMap<RoomId, SidebarEntry>,
    focused: Option<RoomId>,
    /// Order key of the newest message I have read while the room was focused.
    read_marks: HashMap<RoomId, (Timestamp, MessageId)>,
}

impl SidebarAggregator {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            rooms: HashMap::new(),
            entries: HashMap::new(),
            focused: None,
            read_marks: HashMap::new(),
        }
    }

    /// Add or refresh a room. Returns true when the room was not known.
    ///
    /// A room announced again keeps its participants if the announcement
    /// carries none.
    pub fn upsert_room(&mut self, mut room: Room) -> bool {
        let id = room.id;
        let known = match self.rooms.get(&id) {
            Some(existing) => {
                if room.participants.is_empty() {
                    room.participants = existing.participants.clone();
                }
                true
            }
            None => false,
        };
        self.rooms.insert(id, room);
        !known
    }

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn contains(&self, id: RoomId) -> bool {
        self.rooms.contains_key(&id)
    }

    pub fn set_participants(&mut self, id: RoomId, participants: Vec<Participant>) {
        if let Some(room) = self.rooms.get_mut(&id) {
            room.participants = participants;
        }
    }

    /// Returns true when the participant was not in the room yet.
    pub fn add_participant(&mut self, participant: Participant) -> bool {
        let Some(room) = self.rooms.get_mut(&participant.room_id) else {
            return false;
        };
        if room.participants.iter().any(|p| p.user_id == participant.user_id) {
            return false;
        }
        room.participants.push(participant);
        true
    }

    pub fn set_focus(&mut self, focused: Option<RoomId>) {
        self.focused = focused;
    }

    pub fn focused(&self) -> Option<RoomId> {
        self.focused
    }

    pub fn read_mark(&self, id: RoomId) -> Option<(Timestamp, MessageId)> {
        self.read_marks.get(&id).copied()
    }

    /// Advance the read mark of the focused room when its newest message is
    /// READ by me. The mark never moves backwards.
    fn advance_read_mark(&mut self, id: RoomId, log: &MessageLog, statuses: &StatusReconciler) {
        if self.focused != Some(id) {
            return;
        }
        let Some(newest) = log.newest(id).filter(|m| statuses.is_read_by(m, self.me)) else {
            return;
        };
        let key = newest.order_key();
        let mark = self.read_marks.entry(id).or_insert(key);
        if *mark < key {
            *mark = key;
        }
    }

    /// Rebuild the entry of `id`. Returns true when it changed.
    pub fn recompute(&mut self, id: RoomId, log: &MessageLog, statuses: &StatusReconciler) -> bool {
        if !self.rooms.contains_key(&id) {
            return false;
        }
        self.advance_read_mark(id, log, statuses);
        let Some(room) = self.rooms.get(&id) else {
            return false;
        };
        let entry = self.build_entry(room, log, statuses);
        if self.entries.get(&id) == Some(&entry) {
            return false;
        }
        tracing::debug!(
            "Sidebar entry for room {} now has {} unread",
            id,
            entry.unread_count
        );
        self.entries.insert(id, entry);
        true
    }

    pub fn recompute_all(&mut self, log: &MessageLog, statuses: &StatusReconciler) {
        let ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        for id in ids {
            self.recompute(id, log, statuses);
        }
    }

    pub fn entry(&self, id: RoomId) -> Option<&SidebarEntry> {
        self.entries.get(&id)
    }

    /// Entries ordered by most recent activity, rooms without activity last.
    pub fn rooms(&self) -> Vec<SidebarEntry> {
        let mut entries: Vec<SidebarEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        entries
    }

    /// [`rooms`](Self::rooms) restricted by type and a case-insensitive
    /// name query.
    pub fn filter(&self, filter: RoomFilter, query: &str) -> Vec<SidebarEntry> {
        let query = query.trim().to_lowercase();
        self.rooms()
            .into_iter()
            .filter(|entry| filter.accepts(entry.kind))
            .filter(|entry| query.is_empty() || entry.name.to_lowercase().contains(&query))
            .collect()
    }

    fn build_entry(&self, room: &Room, log: &MessageLog, statuses: &StatusReconciler) -> SidebarEntry {
        let messages = log.log(room.id);
        let newest = messages.last();
        let baseline = room.last_message.as_ref();

        let (preview_text, last_activity_at) = match (newest, baseline) {
            (Some(message), Some(summary)) if summary.at > message.created_at => (
                preview_text(summary.kind, &summary.content, summary.attachment_count),
                Some(summary.at),
            ),
            (Some(message), _) => (
                preview_text(message.kind, &message.content, message.attachments.len()),
                Some(message.created_at),
            ),
            (None, Some(summary)) => (
                preview_text(summary.kind, &summary.content, summary.attachment_count),
                Some(summary.at),
            ),
            (None, None) => (String::new(), None),
        };

        let mark = self.read_marks.get(&room.id).copied();
        let after_mark = |m: &&Message| mark.is_none_or(|key| m.order_key() > key);
        let newest_read = newest.is_some_and(|m| statuses.is_read_by(m, self.me));
        let unread_count = if self.focused == Some(room.id) && newest_read {
            0
        } else if log.is_backfilled(room.id) {
            statuses.unread_count(messages.iter().filter(after_mark), self.me)
        } else {
            // Only messages newer than the baseline summary are not already
            // included in the baseline count.
            let since = baseline.map(|summary| summary.at);
            let live_unread = statuses.unread_count(
                messages
                    .iter()
                    .filter(|m| since.is_none_or(|at| m.created_at > at))
                    .filter(after_mark),
                self.me,
            );
            // A read mark at or past the summary covers the baseline count.
            let baseline_unread = match (mark, since) {
                (Some((read_at, _)), Some(at)) if read_at >= at => 0,
                (Some(_), None) => 0,
                _ => room.unread_baseline,
            };
            baseline_unread + live_unread
        };

        SidebarEntry {
            room_id: room.id,
            name: room.display_name(self.me),
            kind: room.kind,
            preview_text,
            unread_count,
            last_activity_at,
        }
    }
}
