//! Reactive stores fed by hub events and directory baselines.
//!
//! None of these types perform I/O. They absorb duplicate, out-of-order and
//! partial input without corruption: the message log deduplicates by id, the
//! status reconciler only moves states up, and presence is ordered by the
//! observation's own timestamp.

pub mod ingest;
pub mod presence;
pub mod sidebar;
pub mod status;

pub use ingest::{Ingested, MessageLog, OutgoingMessage};
pub use presence::PresenceTracker;
pub use sidebar::{RoomFilter, SidebarAggregator, SidebarEntry, preview_text};
pub use status::{ReadTracker, StatusRow, StatusReconciler};
