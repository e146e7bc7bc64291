//! Last known online state per user.

use std::collections::HashMap;

use crate::domain::{Presence, Timestamp, UserId};

/// Last-writer-wins store keyed by user, ordered by `last_seen`.
///
/// A timestamped observation replaces the stored one only when its
/// `last_seen` is strictly newer, and a tie keeps what is stored, so a stale
/// baseline arriving after a live push cannot overwrite it. An observation
/// without `last_seen` cannot be ordered against one that has it: it flips
/// the online flag but keeps the stored `last_seen`, so any later
/// timestamped observation is still ordered against the hub's own clock.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    entries: HashMap<UserId, Presence>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the stored presence changed.
    pub fn update(&mut self, user: UserId, online: bool, last_seen: Option<Timestamp>) -> bool {
        let incoming = match (self.entries.get(&user), last_seen) {
            (None, _) => Presence { online, last_seen },
            (Some(current), Some(_)) if last_seen > current.last_seen => {
                Presence { online, last_seen }
            }
            (Some(_), Some(_)) => return false,
            (Some(current), None) if current.online != online => Presence {
                online,
                last_seen: current.last_seen,
            },
            (Some(_), None) => return false,
        };
        self.entries.insert(user, incoming);
        true
    }

    pub fn get(&self, user: UserId) -> Option<Presence> {
        self.entries.get(&user).copied()
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.entries.get(&user).is_some_and(|p| p.online)
    }
}
