//! Forwarding counters for the periodic status snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::types::RelayStatus;

/// Monotonic counters, shared by reference across the pipeline and the
/// status reporter.
#[derive(Debug, Default)]
pub struct RelayStats {
    events_seen: AtomicU64,
    forwarded: AtomicU64,
    excluded: AtomicU64,
    edits_applied: AtomicU64,
    edits_dropped: AtomicU64,
    replayed: AtomicU64,
    attachment_failures: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_event(&self) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_excluded(&self) {
        self.excluded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_edit_applied(&self) {
        self.edits_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_edit_dropped(&self) {
        self.edits_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_replayed(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_attachment_failure(&self) {
        self.attachment_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, connection_health: String) -> RelayStatus {
        RelayStatus {
            events_seen: self.events_seen.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
            edits_applied: self.edits_applied.load(Ordering::Relaxed),
            edits_dropped: self.edits_dropped.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            attachment_failures: self.attachment_failures.load(Ordering::Relaxed),
            connection_health,
        }
    }
}
