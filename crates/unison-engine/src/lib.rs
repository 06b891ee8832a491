//! Unison Engine -- the distributed sync layer over the deterministic ECS.
//!
//! This crate owns everything that turns a deterministic world into a
//! replicated one:
//!
//! * [`rollback`] -- the frame-keyed snapshot ring.
//! * [`input`] -- per-client, per-frame input buffering with repeat-last
//!   prediction and late-input rollback marking.
//! * [`delta`] -- structural snapshot diffs (creates + deletes + hashes);
//!   surviving entities need no field updates because every peer computes
//!   them deterministically.
//! * [`partition`] -- the deterministic assignment of broadcast
//!   responsibility across peers.
//! * [`collision`] -- ordered collision pair dispatch by entity type.
//! * [`drift`] -- field-level divergence diagnosis for desync logging.
//! * [`transport`] -- the pluggable transport, clock, and renderer seams.
//! * [`game`] -- the sync coordinator that ties it all together.

#![deny(unsafe_code)]

pub mod collision;
pub mod config;
pub mod delta;
pub mod drift;
pub mod game;
pub mod input;
pub mod partition;
pub mod rollback;
pub mod transport;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the sync layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A rollback target is older than the oldest retained snapshot.
    #[error("cannot roll back to frame {frame}: oldest retained snapshot is {oldest:?}")]
    RollbackOutOfRange {
        /// Requested frame.
        frame: u32,
        /// Oldest snapshot available, if any.
        oldest: Option<u32>,
    },

    /// Partition payloads for different frames cannot be assembled.
    #[error("partition frames disagree: {first} vs {second}")]
    PartitionFrameMismatch {
        /// Frame of the first payload.
        first: u32,
        /// Frame of the mismatching payload.
        second: u32,
    },

    /// A delta could not be applied to the world.
    #[error("delta apply failed: {details}")]
    DeltaApplyFailed {
        /// What went wrong.
        details: String,
    },

    /// Wire-level decode failure.
    #[error(transparent)]
    Wire(#[from] unison_wire::WireError),

    /// ECS-level failure.
    #[error(transparent)]
    Ecs(#[from] unison_ecs::EcsError),
}

/// Install a tracing subscriber reading `RUST_LOG`, for hosts and
/// integration tests. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Convenience re-exports.
pub mod prelude {
    pub use crate::collision::CollisionRegistry;
    pub use crate::config::SyncConfig;
    pub use crate::delta::SnapshotDelta;
    pub use crate::drift::{diagnose, DriftReport};
    pub use crate::game::{Game, GameHooks, GameState};
    pub use crate::input::InputBuffer;
    pub use crate::partition::{assign_senders, entity_partition, partition_count};
    pub use crate::rollback::RollbackBuffer;
    pub use crate::transport::{Clock, NullTransport, Renderer, Transport, TransportEvent};
    pub use crate::EngineError;
}
