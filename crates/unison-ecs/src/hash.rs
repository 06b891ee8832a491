//! Canonical per-frame state hash.
//!
//! Every peer submits `state_hash(world, frame)` each tick; the transport
//! computes the majority hash per frame and flags minority peers as
//! desynced. Two peers with identical simulation state MUST produce
//! identical hashes, so the hash is defined over a canonical order that is
//! independent of insertion history:
//!
//! 1. the frame, then the entity count;
//! 2. entities ascending by id: the raw id, then
//! 3. the entity's components in ascending component-name order, each field
//!    in schema declaration order, as a canonical little-endian `u32`
//!    (sign-extended for signed kinds, masked for narrow unsigned kinds).
//!
//! Non-synced fields and `f32` fields never enter the hash.
//!
//! The hash function is xxhash32 seeded with 0.

use xxhash_rust::xxh32::Xxh32;

use crate::schema::ComponentTypeId;
use crate::snapshot::WorldSnapshot;
use crate::world::{SyncPolicy, World};

/// Seed for all state hashing.
const HASH_SEED: u32 = 0;

// ---------------------------------------------------------------------------
// World hashing
// ---------------------------------------------------------------------------

/// Compute the canonical state hash of the live world for `frame`.
///
/// Entities whose type declares `SyncPolicy::None` are client-local and are
/// excluded, as are non-synced and float fields.
pub fn state_hash(world: &World, frame: u32) -> u32 {
    let mut hasher = Xxh32::new(HASH_SEED);
    hasher.update(&frame.to_le_bytes());

    let entities: Vec<_> = world
        .entities_sorted()
        .into_iter()
        .filter(|&e| {
            world
                .type_of(e)
                .is_some_and(|ty| !matches!(ty.sync, SyncPolicy::None))
        })
        .collect();
    hasher.update(&(entities.len() as u32).to_le_bytes());

    let comp_order = world.schemas().ids_by_name();
    for entity in entities {
        hasher.update(&entity.raw().to_le_bytes());
        let Some(ty) = world.type_of(entity) else { continue };
        for &comp_id in &comp_order {
            let storage = world.storage(comp_id);
            if !storage.contains(entity) {
                continue;
            }
            let schema = world.schemas().schema(comp_id);
            for (field_idx, field_def) in schema.fields.iter().enumerate() {
                if !ty.sync.includes(&schema.name, &field_def.name) {
                    continue;
                }
                let Some(value) = storage.value(entity, field_idx) else { continue };
                if let Some(canonical) = value.as_canonical_u32() {
                    hasher.update(&canonical.to_le_bytes());
                }
            }
        }
    }

    hasher.digest()
}

// ---------------------------------------------------------------------------
// Snapshot hashing
// ---------------------------------------------------------------------------

/// Compute the canonical state hash of a snapshot.
///
/// Produces the same value as [`state_hash`] on the world the snapshot was
/// captured from. `world` supplies the schema and entity type registries,
/// which are registration-time data and not part of the snapshot itself.
pub fn snapshot_hash(snapshot: &WorldSnapshot, world: &World) -> u32 {
    let mut hasher = Xxh32::new(HASH_SEED);
    hasher.update(&snapshot.frame.to_le_bytes());
    hasher.update(&(snapshot.entities.len() as u32).to_le_bytes());

    // Per-(component, field) cursors into the packed columns. Columns pack
    // values in the snapshot's entity order, which is exactly the order the
    // outer loop below consumes them in.
    let mut cursors: Vec<Vec<usize>> = snapshot
        .columns
        .iter()
        .map(|c| vec![0usize; c.fields.len()])
        .collect();

    // Component traversal order is ascending by name, same as state_hash.
    let comp_order: Vec<ComponentTypeId> = world.schemas().ids_by_name();
    let column_of = |comp_id: ComponentTypeId| {
        snapshot.columns.iter().position(|c| c.type_id == comp_id)
    };

    let types = world.entity_types();
    for meta in &snapshot.entities {
        hasher.update(&meta.id.raw().to_le_bytes());
        let Some(ty) = types.get(meta.type_id as usize) else { continue };
        for &comp_id in &comp_order {
            if !ty.components.contains(&comp_id) {
                continue;
            }
            let Some(col_idx) = column_of(comp_id) else { continue };
            let column = &snapshot.columns[col_idx];
            let schema = world.schemas().schema(comp_id);
            for (f_idx, field_col) in column.fields.iter().enumerate() {
                let field_def = &schema.fields[field_col.field as usize];
                if !ty.sync.includes(&schema.name, &field_def.name) {
                    continue;
                }
                let cursor = &mut cursors[col_idx][f_idx];
                let Some(value) = field_col.values.get(*cursor) else { continue };
                *cursor += 1;
                if let Some(canonical) = value.as_canonical_u32() {
                    hasher.update(&canonical.to_le_bytes());
                }
            }
        }
    }

    hasher.digest()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
