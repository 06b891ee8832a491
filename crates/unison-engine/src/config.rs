//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunable knobs for the sync coordinator.
///
/// Values that shape the deterministic protocol (`partition_target`,
/// `partition_redundancy`) must be identical on every peer in a room; the
/// host is expected to distribute one configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Snapshots retained in the rollback ring.
    pub rollback_capacity: usize,
    /// Maximum frames a late input may roll back; beyond this the peer
    /// escalates to a desync resync.
    pub max_rollback_distance: u32,
    /// Target entities per broadcast partition.
    pub partition_target: usize,
    /// Redundant senders per partition.
    pub partition_redundancy: usize,
    /// Frames between periodic authoritative snapshots.
    pub snapshot_interval: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            rollback_capacity: 120,
            max_rollback_distance: 30,
            partition_target: 16,
            partition_redundancy: 2,
            snapshot_interval: 100,
        }
    }
}

impl SyncConfig {
    /// Milliseconds per tick.
    pub fn tick_interval_ms(&self) -> u64 {
        1_000 / u64::from(self.tick_rate.max(1))
    }
}
