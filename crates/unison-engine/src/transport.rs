//! The pluggable seams: transport, clock, renderer.
//!
//! The coordinator is single-threaded and non-reentrant; transport
//! callbacks do not call into it directly but enqueue [`TransportEvent`]s
//! that the coordinator drains at the next tick boundary. Outgoing traffic
//! goes through the [`Transport`] trait.

use unison_ecs::world::World;
use unison_wire::InputRecord;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Outgoing message sink. Implementations wrap whatever carries bytes
/// (WebSocket gateway, in-process channel in tests).
pub trait Transport {
    /// Send a local input record.
    fn send_input(&mut self, bytes: &[u8]);
    /// Publish an authoritative snapshot.
    fn send_snapshot(&mut self, bytes: &[u8], hash: u32, seq: u32, frame: u32);
    /// Publish one partition of a frame's delta.
    fn send_partition(&mut self, partition: usize, bytes: &[u8], frame: u32);
    /// Submit the local state hash for a frame.
    fn send_state_hash(&mut self, frame: u32, hash: u32);
}

/// Incoming events, marshalled onto the simulation thread's queue.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// `JOIN_ROOM` acknowledgement.
    Connect {
        /// Authoritative snapshot bytes, absent when the room is fresh.
        snapshot: Option<Vec<u8>>,
        /// Inputs pending after the snapshot (or since room creation).
        inputs: Vec<InputRecord>,
        /// Current server frame to catch up to.
        frame: u32,
        /// Server tick rate.
        fps: u32,
        /// The client id assigned to this peer.
        client_id: String,
    },
    /// One ordered server tick with its confirmed inputs.
    Tick {
        /// The frame the inputs are confirmed for.
        frame: u32,
        /// Confirmed inputs.
        inputs: Vec<InputRecord>,
    },
    /// An authoritative binary snapshot broadcast.
    BinarySnapshot(Vec<u8>),
    /// The majority state hash for a frame.
    MajorityHash {
        /// The frame the majority was computed for.
        frame: u32,
        /// The majority hash.
        hash: u32,
    },
    /// One partition of a remote peer's delta broadcast.
    Partition {
        /// Partition index.
        partition: usize,
        /// Encoded [`SnapshotDelta`](crate::delta::SnapshotDelta) slice.
        bytes: Vec<u8>,
        /// The frame the delta belongs to.
        frame: u32,
    },
    /// Updated per-client reliability scores.
    Reliability(Vec<(String, f64)>),
    /// The transport dropped.
    Disconnect,
}

/// A transport that drops everything. Local-only sessions and tests.
#[derive(Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send_input(&mut self, _bytes: &[u8]) {}
    fn send_snapshot(&mut self, _bytes: &[u8], _hash: u32, _seq: u32, _frame: u32) {}
    fn send_partition(&mut self, _partition: usize, _bytes: &[u8], _frame: u32) {}
    fn send_state_hash(&mut self, _frame: u32, _hash: u32) {}
}

// ---------------------------------------------------------------------------
// Clock / Renderer
// ---------------------------------------------------------------------------

/// Wall-clock source for render interpolation. Never read by simulation
/// code.
pub trait Clock {
    /// Milliseconds from an arbitrary epoch.
    fn now_millis(&self) -> u64;
}

/// A clock pinned to zero. Headless peers and tests.
#[derive(Debug, Default)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.0
    }
}

/// Presentation sink. Receives the world read-only plus the interpolation
/// alpha in `[0, 1)` between the previous and current tick.
pub trait Renderer {
    /// Draw one frame. Must not mutate simulation state (and cannot: the
    /// world arrives behind a shared reference).
    fn render(&mut self, world: &World, alpha: f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_transport_accepts_everything() {
        let mut t = NullTransport;
        t.send_input(b"x");
        t.send_snapshot(b"y", 1, 2, 3);
        t.send_partition(0, b"z", 4);
        t.send_state_hash(5, 6);
    }

    #[test]
    fn fixed_clock_is_fixed() {
        let clock = FixedClock(1234);
        assert_eq!(clock.now_millis(), 1234);
        assert_eq!(clock.now_millis(), 1234);
    }
}
