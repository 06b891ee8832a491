//! The rollback buffer: a bounded ring of snapshots keyed by frame.
//!
//! Each tick saves the pre-tick snapshot for its frame. When a late input
//! arrives, the coordinator restores the snapshot at the rollback frame and
//! resimulates forward. The ring is pruned when a new player joins
//! ([`RollbackBuffer::clear_before`]) so the engine never rolls back to a
//! world that lacks them.

use std::collections::VecDeque;

use unison_ecs::prelude::WorldSnapshot;

/// Bounded, frame-keyed snapshot ring.
#[derive(Debug, Default)]
pub struct RollbackBuffer {
    capacity: usize,
    /// Entries ordered ascending by frame.
    entries: VecDeque<(u32, WorldSnapshot)>,
}

impl RollbackBuffer {
    /// Create a buffer retaining at most `capacity` snapshots.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Insert a snapshot for `frame`, replacing any existing entry for the
    /// same frame and evicting the oldest entry beyond capacity.
    pub fn save(&mut self, frame: u32, snapshot: WorldSnapshot) {
        match self.entries.binary_search_by_key(&frame, |(f, _)| *f) {
            Ok(idx) => self.entries[idx] = (frame, snapshot),
            Err(idx) => self.entries.insert(idx, (frame, snapshot)),
        }
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Borrow the snapshot saved for `frame`.
    pub fn get(&self, frame: u32) -> Option<&WorldSnapshot> {
        self.entries
            .binary_search_by_key(&frame, |(f, _)| *f)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    /// Drop all snapshots older than `frame`.
    pub fn clear_before(&mut self, frame: u32) {
        while matches!(self.entries.front(), Some((f, _)) if *f < frame) {
            self.entries.pop_front();
        }
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The oldest retained frame.
    pub fn oldest_frame(&self) -> Option<u32> {
        self.entries.front().map(|(f, _)| *f)
    }

    /// The newest retained frame.
    pub fn latest_frame(&self) -> Option<u32> {
        self.entries.back().map(|(f, _)| *f)
    }

    /// Number of retained snapshots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
