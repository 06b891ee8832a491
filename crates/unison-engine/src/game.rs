//! The sync coordinator.
//!
//! [`Game`] owns the lifecycle of a replicated session: the world, the
//! scheduler, the input buffer, the rollback ring, and the transport seams.
//! Its states are `Uninitialized -> LocalOnly <-> Connecting -> Live ->
//! Disconnected`.
//!
//! Every peer runs the same tick loop:
//!
//! 1. drain transport events (inputs, ticks, snapshots, hashes);
//! 2. perform any pending rollback and resimulate;
//! 3. save the pre-tick snapshot, gather (and predict) this frame's
//!    inputs, run the simulation phases, dispatch collisions;
//! 4. submit the frame's state hash and publish the partitions of the
//!    frame's delta this peer is responsible for;
//! 5. on the authority, publish a full snapshot periodically and after a
//!    join;
//! 6. render (clients only) with an alpha interpolated from the wall clock.
//!
//! Authority is never negotiated: every peer observes the same ordered
//! join/leave stream, so "the first joiner still present" is the same value
//! everywhere, at every frame.

use std::collections::{BTreeMap, HashMap, VecDeque};

use unison_ecs::entity::EntityId;
use unison_ecs::hash::{snapshot_hash, state_hash};
use unison_ecs::prelude::{Phase, Scheduler, WorldSnapshot};
use unison_ecs::snapshot::{capture_snapshot, restore_snapshot};
use unison_ecs::world::World;
use unison_wire::snapshot::{decode_snapshot_binary, encode_snapshot_binary};
use unison_wire::{ControlKind, InputData, InputRecord};

use crate::collision::CollisionRegistry;
use crate::config::SyncConfig;
use crate::delta::{self, SnapshotDelta};
use crate::drift;
use crate::input::InputBuffer;
use crate::partition::{assign_senders, get_partition, partition_count};
use crate::rollback::RollbackBuffer;
use crate::transport::{Clock, FixedClock, NullTransport, Renderer, Transport, TransportEvent};

// ---------------------------------------------------------------------------
// GameState / hooks / stats
// ---------------------------------------------------------------------------

/// Coordinator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    /// Constructed, not yet started.
    Uninitialized,
    /// Simulating without a transport.
    LocalOnly,
    /// Transport attached, waiting for the join acknowledgement.
    Connecting,
    /// Replicating.
    Live,
    /// Transport gone; local state preserved.
    Disconnected,
}

/// Host callbacks. All run on the simulation thread between ticks.
#[derive(Default)]
pub struct GameHooks {
    /// Called once when this peer creates a fresh room.
    pub on_room_create: Option<Box<dyn FnMut(&mut World)>>,
    /// Called when a client joins (argument: interned client id).
    pub on_connect: Option<Box<dyn FnMut(&mut World, u32)>>,
    /// Called when a client leaves or drops.
    pub on_disconnect: Option<Box<dyn FnMut(&mut World, u32)>>,
    /// Called after a snapshot restore completes catchup, with the restored
    /// entities, so the host can re-hydrate client-local state.
    pub on_snapshot: Option<Box<dyn FnMut(&mut World, &[EntityId])>>,
}

/// Rolling synchronization diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Majority-hash checks that matched.
    pub hash_checks_passed: u64,
    /// Majority-hash checks that did not match.
    pub hash_checks_failed: u64,
    /// The most recent frame whose hash diverged from the majority.
    pub last_divergent_frame: Option<u32>,
    /// Rollback-resimulations performed.
    pub rollbacks: u64,
    /// Hard resets from authoritative snapshots.
    pub resyncs: u64,
}

#[derive(Debug, Clone)]
struct ClientInfo {
    name: String,
    id: u32,
    reliability: f64,
    active: bool,
}

/// Provides candidate collision pairs after physics integration.
pub type CandidateFn = Box<dyn Fn(&World) -> Vec<(EntityId, EntityId)>>;

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// The sync coordinator. One per peer per room.
pub struct Game {
    world: World,
    scheduler: Scheduler,
    collisions: CollisionRegistry,
    candidate_fn: Option<CandidateFn>,
    config: SyncConfig,
    state: GameState,
    hooks: GameHooks,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    renderer: Option<Box<dyn Renderer>>,
    headless: bool,

    events: VecDeque<TransportEvent>,
    input_buffer: InputBuffer,
    rollback: RollbackBuffer,

    /// Clients in join order. Authority is the first active entry.
    clients: Vec<ClientInfo>,
    local_client: Option<u32>,
    server_frame: u32,

    /// Post-tick snapshot of the previous frame; base for the next delta
    /// and the older endpoint of render interpolation.
    last_snapshot: Option<WorldSnapshot>,
    render_prev: Option<WorldSnapshot>,

    /// Our recent per-frame hashes, for majority comparison.
    recent_hashes: BTreeMap<u32, u32>,
    /// Incoming delta partitions by frame, for verification.
    partition_inbox: HashMap<u32, Vec<SnapshotDelta>>,

    resync_pending: bool,
    pending_snapshot_upload: bool,
    stats: SyncStats,
    last_tick_millis: u64,
    /// Highest input sequence routed, control records included. Stamped
    /// into snapshots as "effects up to here are included".
    highest_seq: u32,
}

impl Game {
    /// Create a coordinator over a prepared world (components and entity
    /// types registered).
    pub fn new(world: World, config: SyncConfig) -> Self {
        let capacity = config.rollback_capacity;
        Self {
            world,
            scheduler: Scheduler::new(),
            collisions: CollisionRegistry::new(),
            candidate_fn: None,
            config,
            state: GameState::Uninitialized,
            hooks: GameHooks::default(),
            transport: Box::new(NullTransport),
            clock: Box::new(FixedClock(0)),
            renderer: None,
            headless: true,
            events: VecDeque::new(),
            input_buffer: InputBuffer::new(),
            rollback: RollbackBuffer::new(capacity),
            clients: Vec::new(),
            local_client: None,
            server_frame: 0,
            last_snapshot: None,
            render_prev: None,
            recent_hashes: BTreeMap::new(),
            partition_inbox: HashMap::new(),
            resync_pending: false,
            pending_snapshot_upload: false,
            stats: SyncStats::default(),
            last_tick_millis: 0,
            highest_seq: 0,
        }
    }

    // -- wiring -------------------------------------------------------------

    /// Replace the transport.
    pub fn set_transport(&mut self, transport: Box<dyn Transport>) {
        self.transport = transport;
    }

    /// Replace the clock.
    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = clock;
    }

    /// Attach a renderer; the peer is no longer headless.
    pub fn set_renderer(&mut self, renderer: Box<dyn Renderer>) {
        self.renderer = Some(renderer);
        self.headless = false;
    }

    /// Host callbacks.
    pub fn hooks_mut(&mut self) -> &mut GameHooks {
        &mut self.hooks
    }

    /// The system scheduler, for registration at startup.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// The collision handler registry.
    pub fn collisions_mut(&mut self) -> &mut CollisionRegistry {
        &mut self.collisions
    }

    /// Provide the candidate collision pair source for the physics phase.
    pub fn set_collision_candidates(&mut self, f: impl Fn(&World) -> Vec<(EntityId, EntityId)> + 'static) {
        self.candidate_fn = Some(Box::new(f));
    }

    // -- accessors ----------------------------------------------------------

    /// The current lifecycle state.
    pub fn state(&self) -> GameState {
        self.state
    }

    /// Read-only world access.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable world access, for setup and tests.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Synchronization diagnostics.
    pub fn sync_stats(&self) -> &SyncStats {
        &self.stats
    }

    /// The interned id of this peer's client, once connected.
    pub fn local_client(&self) -> Option<u32> {
        self.local_client
    }

    /// The authority: the first client in join order still present.
    pub fn authority(&self) -> Option<u32> {
        self.clients.iter().find(|c| c.active).map(|c| c.id)
    }

    /// Whether this peer is the authority.
    pub fn is_authority(&self) -> bool {
        self.local_client.is_some() && self.local_client == self.authority()
    }

    /// Whether this peer has been flagged desynced and awaits a snapshot.
    pub fn resync_pending(&self) -> bool {
        self.resync_pending
    }

    /// The last two post-tick snapshots, for render interpolation.
    pub fn render_snapshots(&self) -> (Option<&WorldSnapshot>, Option<&WorldSnapshot>) {
        (self.render_prev.as_ref(), self.last_snapshot.as_ref())
    }

    // -- lifecycle ----------------------------------------------------------

    /// Start simulating without a transport.
    pub fn start_local(&mut self) {
        assert!(
            matches!(self.state, GameState::Uninitialized),
            "start_local from {:?}",
            self.state
        );
        if let Some(hook) = self.hooks.on_room_create.as_mut() {
            hook(&mut self.world);
        }
        self.world.canonicalize_storages();
        self.state = GameState::LocalOnly;
    }

    /// Attach to a room: wait for the `Connect` acknowledgement.
    pub fn connect(&mut self, transport: Box<dyn Transport>) {
        self.transport = transport;
        self.state = GameState::Connecting;
    }

    /// After a disconnect, resume simulating locally with preserved state.
    pub fn resume_local(&mut self) {
        assert!(
            matches!(self.state, GameState::Disconnected),
            "resume_local from {:?}",
            self.state
        );
        self.state = GameState::LocalOnly;
    }

    /// Enqueue a transport event. Callable from the transport's marshalling
    /// queue; processed at the next tick boundary.
    pub fn push_event(&mut self, event: TransportEvent) {
        self.events.push_back(event);
    }

    /// Stop the coordinator at a tick boundary: drain the queue so no event
    /// is silently lost, then stop ticking. All mutation happens between
    /// ticks, so no partial state is observable afterwards.
    pub fn shutdown(&mut self) {
        self.drain_events();
        self.state = GameState::Disconnected;
        tracing::info!(frame = self.world.current_frame(), "coordinator shut down");
    }

    /// Export the current world as binary snapshot bytes, for host-driven
    /// save points. The engine itself persists nothing.
    pub fn export_snapshot(&self) -> anyhow::Result<Vec<u8>> {
        let snapshot = capture_snapshot(&self.world, self.effective_seq(), false);
        encode_snapshot_binary(&snapshot)
            .map_err(|e| anyhow::anyhow!("snapshot encode failed: {e}"))
    }

    /// Import binary snapshot bytes produced by
    /// [`export_snapshot`](Self::export_snapshot), replacing the world. The
    /// rollback ring is cleared: nothing older than the import is a valid
    /// rewind target.
    pub fn import_snapshot(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let snapshot = decode_snapshot_binary(bytes)
            .map_err(|e| anyhow::anyhow!("snapshot decode failed: {e}"))?;
        restore_snapshot(&mut self.world, &snapshot)
            .map_err(|e| anyhow::anyhow!("snapshot restore failed: {e}"))?;
        self.rollback.clear();
        self.input_buffer.prune_before(self.world.current_frame());
        self.recent_hashes.clear();
        self.last_snapshot = None;
        self.render_prev = None;
        Ok(())
    }

    /// Inject an input from the local host (LocalOnly sessions and tests).
    pub fn inject_local_input(&mut self, value: unison_wire::Value) {
        let client = match self.local_client {
            Some(id) => id,
            None => {
                let id = self.world.intern_client("local");
                self.ensure_client("local");
                self.local_client = Some(id);
                id
            }
        };
        let frame = self.world.current_frame();
        let seq = self.input_buffer.max_seq() + 1;
        self.input_buffer.insert(frame, client, seq, value, frame);
    }

    // -- tick loop ----------------------------------------------------------

    /// Run one tick: drain events, roll back if needed, simulate one frame,
    /// publish, render.
    pub fn tick(&mut self) {
        match self.state {
            GameState::Uninitialized | GameState::Disconnected => return,
            GameState::Connecting => {
                // No simulation until the join acknowledgement arrives.
                self.drain_events();
                return;
            }
            GameState::LocalOnly | GameState::Live => {}
        }

        self.drain_events();
        if matches!(self.state, GameState::Disconnected) {
            return;
        }

        if let Some(frame) = self.input_buffer.take_pending_rollback() {
            self.rollback_to(frame);
        }

        self.step_frame(false, true);
        self.render();
    }

    /// Simulate the current frame.
    ///
    /// `resimulating` disables client-only systems; `publish` gates all
    /// transport sends (off during rollback resimulation and catchup).
    fn step_frame(&mut self, resimulating: bool, publish: bool) {
        let frame = self.world.current_frame();

        // 1. Pre-tick snapshot for rollback.
        let seq = self.effective_seq();
        self.rollback.save(frame, capture_snapshot(&self.world, seq, false));

        // 2. Inputs, ascending (client, seq).
        let clients = self.active_client_ids();
        let gathered = self.input_buffer.gather(frame, &clients);
        for (client, value) in gathered {
            let json = serde_json::Value::from(value);
            self.world.apply_client_input(client, &json);
        }

        // 3. Simulation phases. The collision hook runs after physics
        //    integration, before post-physics reactions.
        let skip_client_only = resimulating || self.headless;
        for phase in [Phase::Input, Phase::Update, Phase::PrePhysics, Phase::Physics] {
            self.scheduler.run_phase(&mut self.world, phase, skip_client_only);
        }
        if let Some(candidate_fn) = &self.candidate_fn {
            let pairs = candidate_fn(&self.world);
            self.collisions.dispatch(&mut self.world, &pairs);
            self.world.flush_destroyed();
        }
        self.scheduler.run_phase(&mut self.world, Phase::PostPhysics, skip_client_only);

        // 4. State hash.
        let hash = state_hash(&self.world, frame);
        self.recent_hashes.insert(frame, hash);
        while self.recent_hashes.len() > self.config.rollback_capacity.max(256) {
            self.recent_hashes.pop_first();
        }
        if publish && matches!(self.state, GameState::Live) {
            self.transport.send_state_hash(frame, hash);
        }

        // 5. Post-tick snapshot, delta, partitions, authority snapshot.
        let curr = capture_snapshot(&self.world, self.effective_seq(), true);
        if publish && matches!(self.state, GameState::Live) {
            self.publish(&curr, frame);
        }
        self.verify_partitions(frame, hash);
        self.render_prev = self.last_snapshot.take();
        self.last_snapshot = Some(curr);

        // 6. Advance and prune.
        self.world.advance_frame();
        if let Some(oldest) = self.rollback.oldest_frame() {
            self.input_buffer.prune_before(oldest);
        }
    }

    /// Publish this frame's partition payloads and, on the authority, the
    /// periodic or join-triggered full snapshot.
    fn publish(&mut self, curr: &WorldSnapshot, frame: u32) {
        let delta = delta::compute(self.last_snapshot.as_ref(), curr, &self.world);

        let active: Vec<(u32, f64)> = self.active_clients_ranked_input();
        if !active.is_empty() {
            let num_partitions =
                partition_count(curr.entity_count(), active.len(), self.config.partition_target);
            let senders = assign_senders(&active, frame, num_partitions, self.config.partition_redundancy);
            if let Some(local) = self.local_client {
                for (partition, partition_senders) in senders.iter().enumerate() {
                    if !partition_senders.contains(&local) {
                        continue;
                    }
                    let slice = get_partition(&delta, partition, num_partitions);
                    if slice.is_empty() {
                        continue;
                    }
                    match slice.encode() {
                        Ok(bytes) => self.transport.send_partition(partition, &bytes, frame),
                        Err(e) => tracing::warn!(frame, partition, error = %e, "partition encode failed"),
                    }
                }
            }
        }

        let periodic = self.config.snapshot_interval > 0
            && frame > 0
            && frame % self.config.snapshot_interval == 0;
        if self.is_authority() && (periodic || self.pending_snapshot_upload) {
            match encode_snapshot_binary(curr) {
                Ok(bytes) => {
                    self.transport.send_snapshot(&bytes, delta.result_hash, curr.seq, frame);
                    self.pending_snapshot_upload = false;
                }
                Err(e) => tracing::warn!(frame, error = %e, "snapshot encode failed"),
            }
        }
    }

    /// Verify buffered partition payloads for `frame` against our hash.
    /// Verification only -- deterministic local state is never overwritten
    /// here; a desynced peer recovers through the authoritative snapshot.
    fn verify_partitions(&mut self, frame: u32, local_hash: u32) {
        if let Some(parts) = self.partition_inbox.remove(&frame) {
            match crate::partition::assemble(&parts) {
                Ok(assembled) => {
                    if assembled.result_hash != local_hash {
                        tracing::warn!(
                            frame,
                            local = format_args!("{local_hash:08x}"),
                            remote = format_args!("{:08x}", assembled.result_hash),
                            "peer delta disagrees with local state"
                        );
                    }
                }
                Err(e) => tracing::warn!(frame, error = %e, "partition assembly failed"),
            }
        }
        self.partition_inbox.retain(|&f, _| f + 8 > frame);
    }

    /// Present a frame. Render never mutates simulation state; the renderer
    /// receives the world behind a shared reference.
    fn render(&mut self) {
        if self.headless {
            return;
        }
        self.scheduler.run_phase(&mut self.world, Phase::Render, false);
        let now = self.clock.now_millis();
        let interval = self.config.tick_interval_ms().max(1);
        let alpha = ((now.saturating_sub(self.last_tick_millis)) as f32 / interval as f32).clamp(0.0, 1.0);
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.render(&self.world, alpha);
        }
        self.last_tick_millis = now;
    }

    // -- rollback -----------------------------------------------------------

    /// Restore the pre-tick snapshot at `frame` and resimulate to the
    /// present with the corrected input buffer.
    fn rollback_to(&mut self, frame: u32) {
        let current = self.world.current_frame();
        if frame >= current {
            return;
        }
        let distance = current - frame;
        if distance > self.config.max_rollback_distance {
            tracing::warn!(frame, current, distance, "rollback distance exceeded; escalating to resync");
            self.escalate_desync(frame);
            return;
        }
        let Some(snapshot) = self.rollback.get(frame).cloned() else {
            tracing::warn!(frame, oldest = ?self.rollback.oldest_frame(), "rollback target not retained; escalating to resync");
            self.escalate_desync(frame);
            return;
        };

        if let Err(e) = restore_snapshot(&mut self.world, &snapshot) {
            tracing::warn!(frame, error = %e, "rollback restore failed; escalating to resync");
            self.escalate_desync(frame);
            return;
        }
        self.stats.rollbacks += 1;
        tracing::debug!(frame, to = current, "rolling back and resimulating");

        // The restored pre-tick state doubles as the delta base until the
        // first resimulated frame replaces it.
        self.last_snapshot = Some(snapshot);

        while self.world.current_frame() < current {
            self.step_frame(true, false);
        }

        // Re-submit corrected hashes for the resimulated frames.
        if matches!(self.state, GameState::Live) {
            for f in frame..current {
                if let Some(&hash) = self.recent_hashes.get(&f) {
                    self.transport.send_state_hash(f, hash);
                }
            }
        }
    }

    /// The highest input sequence whose effect the world includes.
    fn effective_seq(&self) -> u32 {
        self.highest_seq.max(self.input_buffer.max_seq())
    }

    fn escalate_desync(&mut self, frame: u32) {
        self.resync_pending = true;
        self.stats.last_divergent_frame = Some(frame);
    }

    // -- event handling -----------------------------------------------------

    fn drain_events(&mut self) {
        while let Some(event) = self.events.pop_front() {
            match event {
                TransportEvent::Connect {
                    snapshot,
                    inputs,
                    frame,
                    fps,
                    client_id,
                } => self.handle_connect(snapshot, inputs, frame, fps, &client_id),
                TransportEvent::Tick { frame, inputs } => {
                    self.server_frame = self.server_frame.max(frame);
                    for input in inputs {
                        self.route_input(input, Some(frame));
                    }
                }
                TransportEvent::BinarySnapshot(bytes) => self.handle_binary_snapshot(&bytes),
                TransportEvent::MajorityHash { frame, hash } => self.handle_majority_hash(frame, hash),
                TransportEvent::Partition { bytes, frame, .. } => {
                    match SnapshotDelta::decode(&bytes, &self.world) {
                        Ok(delta) => self.partition_inbox.entry(frame).or_default().push(delta),
                        Err(e) => tracing::warn!(frame, error = %e, "partition decode failed; dropped"),
                    }
                }
                TransportEvent::Reliability(scores) => {
                    for (name, score) in scores {
                        if let Some(info) = self.clients.iter_mut().find(|c| c.name == name) {
                            info.reliability = score;
                        }
                    }
                }
                TransportEvent::Disconnect => {
                    tracing::info!("transport disconnected; preserving local state");
                    self.state = GameState::Disconnected;
                }
            }
        }
    }

    /// Route one input record: control records maintain the client registry
    /// and authority chain; game inputs land in the input buffer.
    fn route_input(&mut self, record: InputRecord, tick_frame: Option<u32>) {
        self.highest_seq = self.highest_seq.max(record.seq);
        match record.data {
            InputData::Control(control) => {
                let id = self.world.intern_client(&control.client);
                match control.kind {
                    ControlKind::Join => {
                        self.ensure_client(&control.client);
                        // Never roll back to a world that lacks the joiner.
                        self.rollback.clear_before(self.world.current_frame());
                        if let Some(hook) = self.hooks.on_connect.as_mut() {
                            hook(&mut self.world, id);
                        }
                        self.world.canonicalize_storages();
                        if self.is_authority() {
                            self.pending_snapshot_upload = true;
                        }
                    }
                    ControlKind::Leave | ControlKind::Disconnect => {
                        if let Some(info) = self.clients.iter_mut().find(|c| c.id == id) {
                            info.active = false;
                        }
                        if let Some(hook) = self.hooks.on_disconnect.as_mut() {
                            hook(&mut self.world, id);
                        }
                        self.world.canonicalize_storages();
                    }
                }
            }
            InputData::Game(value) => {
                let client = self.world.intern_client(&record.client);
                let current = self.world.current_frame();
                let frame = record.frame.or(tick_frame).unwrap_or(current);

                if frame < current {
                    let distance = current - frame;
                    if distance > self.config.max_rollback_distance {
                        tracing::warn!(frame, current, "late input beyond rollback cap; escalating");
                        self.escalate_desync(frame);
                        return;
                    }
                    if self.rollback.oldest_frame().is_none_or(|oldest| frame < oldest) {
                        tracing::warn!(frame, oldest = ?self.rollback.oldest_frame(), "late input older than retained snapshots; dropped");
                        return;
                    }
                }
                self.input_buffer.insert(frame, client, record.seq, value, current);
            }
        }
    }

    fn handle_majority_hash(&mut self, frame: u32, majority: u32) {
        match self.recent_hashes.get(&frame) {
            Some(&local) if local == majority => {
                self.stats.hash_checks_passed += 1;
            }
            Some(&local) => {
                self.stats.hash_checks_failed += 1;
                self.stats.last_divergent_frame = Some(frame);
                self.resync_pending = true;
                tracing::warn!(
                    frame,
                    local = format_args!("{local:08x}"),
                    majority = format_args!("{majority:08x}"),
                    "state hash diverged from majority; awaiting authoritative snapshot"
                );
            }
            None => {
                tracing::debug!(frame, "majority hash for a frame we no longer retain");
            }
        }
    }

    /// An authoritative snapshot broadcast. For a healthy peer this is a
    /// verification input; for a desynced peer it is the recovery point.
    fn handle_binary_snapshot(&mut self, bytes: &[u8]) {
        let snapshot = match decode_snapshot_binary(bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "authoritative snapshot decode failed; dropped");
                return;
            }
        };

        if !self.resync_pending {
            // Healthy: verify and move on.
            let remote_hash = snapshot_hash(&snapshot, &self.world);
            if let Some(&local) = self.recent_hashes.get(&snapshot.frame) {
                if local != remote_hash {
                    tracing::warn!(
                        frame = snapshot.frame,
                        "authoritative snapshot disagrees with local state; flagging resync"
                    );
                    self.escalate_desync(snapshot.frame);
                } else {
                    return;
                }
            } else {
                return;
            }
        }

        // Field-level drift diagnosis against the local same-frame snapshot,
        // logging only.
        let local_same_frame = self
            .last_snapshot
            .as_ref()
            .filter(|s| s.frame == snapshot.frame && s.post_tick == snapshot.post_tick)
            .cloned();
        if let Some(local) = local_same_frame {
            let report = drift::diagnose(&local, &snapshot, &self.world);
            tracing::warn!(
                frame = snapshot.frame,
                matching = report.matching_fields,
                total = report.total_fields,
                drifted = report.drifted.len(),
                "field drift against authoritative snapshot"
            );
            for field in report.drifted.iter().take(16) {
                tracing::warn!(
                    entity = %field.entity,
                    entity_type = %field.entity_type,
                    field = %field.field,
                    local = ?field.local,
                    server = ?field.server,
                    "drifted field"
                );
            }
        }

        // Hard reset: restore, clear rollback, resume.
        if let Err(e) = restore_snapshot(&mut self.world, &snapshot) {
            tracing::warn!(error = %e, "authoritative snapshot restore failed");
            return;
        }
        if snapshot.post_tick {
            self.world.set_frame(snapshot.frame + 1);
        }
        self.rollback.clear();
        self.input_buffer.prune_before(self.world.current_frame());
        self.recent_hashes.clear();
        self.highest_seq = self.highest_seq.max(snapshot.seq);
        self.last_snapshot = Some(snapshot);
        self.render_prev = None;
        self.resync_pending = false;
        self.stats.resyncs += 1;
        tracing::info!(frame = self.world.current_frame(), "hard reset from authoritative snapshot");

        // Catch back up to the server frame with the retained inputs.
        while self.world.current_frame() < self.server_frame {
            self.step_frame(true, false);
        }
    }

    /// The `JOIN_ROOM` acknowledgement: restore or create, replay pending
    /// inputs, catch up to the server frame.
    fn handle_connect(
        &mut self,
        snapshot_bytes: Option<Vec<u8>>,
        inputs: Vec<InputRecord>,
        frame: u32,
        fps: u32,
        client_id: &str,
    ) {
        if fps > 0 {
            self.config.tick_rate = fps;
        }
        self.server_frame = self.server_frame.max(frame);

        let snapshot = snapshot_bytes.and_then(|bytes| match decode_snapshot_binary(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                // A bad snapshot during catchup degrades to the fresh-room
                // path rather than failing the join.
                tracing::warn!(error = %e, "join snapshot decode failed; creating room locally");
                None
            }
        });

        match snapshot {
            Some(snapshot) => {
                let snapshot_seq = snapshot.seq;
                let post_tick = snapshot.post_tick;
                if let Err(e) = restore_snapshot(&mut self.world, &snapshot) {
                    tracing::warn!(error = %e, "join snapshot restore failed; creating room locally");
                    self.create_room(&inputs, frame);
                } else {
                    if post_tick {
                        self.world.set_frame(snapshot.frame + 1);
                    }
                    self.highest_seq = self.highest_seq.max(snapshot_seq);
                    self.last_snapshot = Some(snapshot);

                    // Control inputs first: they rebuild the client registry
                    // and authority chain as of the snapshot. Joins whose
                    // effect is already inside the snapshot only rebuild the
                    // chain -- their `on_connect` spawns were restored, so
                    // the hook must not run again.
                    let mut ordered = inputs;
                    ordered.sort_by_key(|i| i.seq);
                    for record in ordered.iter().filter(|i| matches!(i.data, InputData::Control(_))) {
                        if record.seq <= snapshot_seq {
                            if let InputData::Control(control) = &record.data {
                                match control.kind {
                                    ControlKind::Join => self.ensure_client(&control.client),
                                    ControlKind::Leave | ControlKind::Disconnect => {
                                        let id = self.world.intern_client(&control.client);
                                        if let Some(info) =
                                            self.clients.iter_mut().find(|c| c.id == id)
                                        {
                                            info.active = false;
                                        }
                                    }
                                }
                            }
                        } else {
                            self.route_input(record.clone(), None);
                        }
                    }

                    // Then replay game inputs newer than the snapshot.
                    for record in ordered.into_iter().filter(|i| {
                        matches!(i.data, InputData::Game(_)) && i.seq > snapshot_seq
                    }) {
                        if let Some(target) = record.frame {
                            while self.world.current_frame() < target {
                                self.step_frame(true, false);
                            }
                        }
                        self.route_input(record, None);
                    }
                    while self.world.current_frame() < frame {
                        self.step_frame(true, false);
                    }

                    let entities = self.world.entities_sorted();
                    if let Some(hook) = self.hooks.on_snapshot.as_mut() {
                        hook(&mut self.world, &entities);
                    }
                    self.world.canonicalize_storages();
                }
            }
            None => self.create_room(&inputs, frame),
        }

        // Interned after any restore, so the id comes from the restored
        // string tables rather than a pre-restore allocation.
        self.local_client = Some(self.world.intern_client(client_id));
        self.state = GameState::Live;
        tracing::info!(
            frame = self.world.current_frame(),
            client = client_id,
            authority = self.is_authority(),
            "joined room"
        );
    }

    /// Fresh-room path: run the creation hook and apply the input history.
    fn create_room(&mut self, inputs: &[InputRecord], frame: u32) {
        if let Some(hook) = self.hooks.on_room_create.as_mut() {
            hook(&mut self.world);
        }
        self.world.canonicalize_storages();
        let mut ordered: Vec<InputRecord> = inputs.to_vec();
        ordered.sort_by_key(|i| i.seq);
        for record in ordered {
            if let Some(target) = record.frame {
                while self.world.current_frame() < target {
                    self.step_frame(true, false);
                }
            }
            self.route_input(record, None);
        }
        while self.world.current_frame() < frame {
            self.step_frame(true, false);
        }
    }

    // -- client registry ----------------------------------------------------

    fn ensure_client(&mut self, name: &str) {
        let id = self.world.intern_client(name);
        if let Some(info) = self.clients.iter_mut().find(|c| c.id == id) {
            if !info.active {
                info.active = true;
                // A rejoining client re-enters at the end of the authority
                // chain.
                let pos = self.clients.iter().position(|c| c.id == id).unwrap();
                let info = self.clients.remove(pos);
                self.clients.push(info);
            }
            return;
        }
        self.clients.push(ClientInfo {
            name: name.to_owned(),
            id,
            reliability: 1.0,
            active: true,
        });
    }

    /// Active client ids, ascending. The canonical input ordering.
    fn active_client_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.clients.iter().filter(|c| c.active).map(|c| c.id).collect();
        ids.sort_unstable();
        ids
    }

    /// Active `(id, reliability)` pairs sorted ascending by id, the input
    /// to partition assignment.
    fn active_clients_ranked_input(&self) -> Vec<(u32, f64)> {
        let mut pairs: Vec<(u32, f64)> = self
            .clients
            .iter()
            .filter(|c| c.active)
            .map(|c| (c.id, c.reliability))
            .collect();
        pairs.sort_by_key(|&(id, _)| id);
        pairs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
