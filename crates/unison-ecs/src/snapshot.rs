//! Sparse world snapshots: capture and restore.
//!
//! A [`WorldSnapshot`] is a self-describing capture of everything the
//! deterministic simulation depends on: allocator state, string tables, PRNG
//! words, the body label counter, per-entity meta `(id, type, owner)` sorted
//! ascending by id, and packed component columns aligned to that entity
//! order.
//!
//! Sync policy shapes the capture: entity types declaring
//! [`SyncPolicy::None`] are omitted entirely (client-local entities are
//! recreated by the host), and [`SyncPolicy::Only`] types contribute only
//! the listed fields -- unlisted fields take prefab defaults on restore.
//!
//! Restore is the inverse: clear the world, restore allocator/strings/PRNG,
//! recreate each entity by its exact id from its type's prefab, overwrite
//! the captured columns, then run each restored type's `on_restore` hook in
//! ascending entity order.

use serde::{Deserialize, Serialize};

use crate::entity::{AllocatorState, EntityId};
use crate::schema::{ComponentTypeId, FieldValue};
use crate::strings::StringRegistryState;
use crate::world::{SyncPolicy, World};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Per-entity meta in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetaSnapshot {
    /// The entity's exact id (index + generation).
    pub id: EntityId,
    /// Dense entity type id.
    pub type_id: u32,
    /// Owning client's interned id, if any.
    pub client: Option<u32>,
}

/// One packed field column: values for every participating entity, in the
/// snapshot's entity order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldColumnData {
    /// Field index within the component schema.
    pub field: u32,
    /// Packed values.
    pub values: Vec<FieldValue>,
}

/// Packed columns for one component type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentColumnData {
    /// The component type.
    pub type_id: ComponentTypeId,
    /// Field columns in schema field order.
    pub fields: Vec<FieldColumnData>,
}

/// A complete, self-describing capture of world state at a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// The frame this snapshot belongs to.
    pub frame: u32,
    /// Highest input sequence whose effect is included.
    pub seq: u32,
    /// Whether the effect of `tick(frame)` is included.
    pub post_tick: bool,
    /// Entity allocator state.
    pub allocator: AllocatorState,
    /// String registry state.
    pub strings: StringRegistryState,
    /// PRNG `(s0, s1)` words.
    pub rng: (u32, u32),
    /// Body label counter.
    pub body_counter: u32,
    /// Entities sorted ascending by id. Types with `SyncPolicy::None` are
    /// absent.
    pub entities: Vec<EntityMetaSnapshot>,
    /// Packed component columns aligned to `entities`.
    pub columns: Vec<ComponentColumnData>,
}

impl WorldSnapshot {
    /// Number of entities captured.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Whether the snapshot contains an entity with this id.
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.binary_search_by_key(&id, |m| m.id).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Whether `field` of `component` on an entity of type `policy` is captured.
fn participates(policy: &SyncPolicy, component: &str, field: &str) -> bool {
    policy.includes(component, field)
}

/// Capture a snapshot of the world.
///
/// `seq` is the highest input sequence applied; `post_tick` records whether
/// the current frame's tick effect is included.
pub fn capture_snapshot(world: &World, seq: u32, post_tick: bool) -> WorldSnapshot {
    let mut entities: Vec<EntityMetaSnapshot> = Vec::new();
    for id in world.entities_sorted() {
        let Some(meta) = world.entity_meta(id) else { continue };
        let ty = &world.entity_types()[meta.type_id as usize];
        if matches!(ty.sync, SyncPolicy::None) {
            continue;
        }
        entities.push(EntityMetaSnapshot {
            id,
            type_id: meta.type_id,
            client: meta.client,
        });
    }

    let mut columns: Vec<ComponentColumnData> = Vec::new();
    for comp_index in 0..world.schemas().len() {
        let comp_id = ComponentTypeId::from_index(comp_index);
        let schema = world.schemas().schema(comp_id);
        let storage = world.storage(comp_id);
        let mut fields: Vec<FieldColumnData> = Vec::new();
        for (field_idx, field_def) in schema.fields.iter().enumerate() {
            let mut values = Vec::new();
            for meta in &entities {
                let ty = &world.entity_types()[meta.type_id as usize];
                if !storage.contains(meta.id) {
                    continue;
                }
                if !participates(&ty.sync, &schema.name, &field_def.name) {
                    continue;
                }
                if let Some(value) = storage.value(meta.id, field_idx) {
                    values.push(value);
                }
            }
            if !values.is_empty() {
                fields.push(FieldColumnData {
                    field: field_idx as u32,
                    values,
                });
            }
        }
        if !fields.is_empty() {
            columns.push(ComponentColumnData {
                type_id: comp_id,
                fields,
            });
        }
    }

    WorldSnapshot {
        frame: world.current_frame(),
        seq,
        post_tick,
        allocator: world.allocator_state(),
        strings: world.strings_state(),
        rng: world.rng_state(),
        body_counter: world.body_label_counter(),
        entities,
        columns,
    }
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

/// Restore the world from a snapshot.
///
/// Entities whose type id is unknown to this world are skipped with a
/// warning; such a peer is guaranteed to desync and will be hard-reset from
/// the next authoritative snapshot.
///
/// # Errors
///
/// Returns [`EcsError::RestoreFailed`] when a column's packed length does
/// not line up with the participating entities (and no entity was skipped
/// for an unknown type, which legitimately disturbs alignment).
pub fn restore_snapshot(world: &mut World, snapshot: &WorldSnapshot) -> Result<(), EcsError> {
    world.clear_entities();
    world.restore_allocator(&snapshot.allocator);
    world.restore_strings(&snapshot.strings);
    world.restore_rng(snapshot.rng);
    world.set_body_label_counter(snapshot.body_counter);
    world.set_frame(snapshot.frame);

    // Recreate entities from their prefabs, keeping exact ids.
    let known_types = world.entity_types().len() as u32;
    let mut skipped_unknown = 0usize;
    for meta in &snapshot.entities {
        if meta.type_id >= known_types {
            tracing::warn!(
                entity = %meta.id,
                type_id = meta.type_id,
                "snapshot references unknown entity type; skipping (desync expected)"
            );
            skipped_unknown += 1;
            continue;
        }
        world.attach_prefab(meta.id, meta.type_id, meta.client)?;
    }

    // Overwrite captured column values in packing order.
    for column in &snapshot.columns {
        if column.type_id.index() >= world.schemas().len() {
            tracing::warn!(
                type_id = ?column.type_id,
                "snapshot references unknown component type; skipping column"
            );
            continue;
        }
        let schema_name = world.schemas().schema(column.type_id).name.clone();
        for field_col in &column.fields {
            let field_idx = field_col.field as usize;
            let field_name = world.schemas().schema(column.type_id).fields[field_idx].name.clone();
            let mut cursor = 0usize;
            for meta in &snapshot.entities {
                if meta.type_id >= known_types {
                    continue;
                }
                let ty = &world.entity_types()[meta.type_id as usize];
                if !participates(&ty.sync, &schema_name, &field_name) {
                    continue;
                }
                if !world.storage(column.type_id).contains(meta.id) {
                    continue;
                }
                let Some(&value) = field_col.values.get(cursor) else {
                    break;
                };
                cursor += 1;
                world.storage_mut(column.type_id).set_value(meta.id, field_idx, value)?;
            }
            if cursor != field_col.values.len() && skipped_unknown == 0 {
                return Err(EcsError::RestoreFailed {
                    details: format!(
                        "column {schema_name}.{field_name}: consumed {cursor} of {} values",
                        field_col.values.len()
                    ),
                });
            }
        }
    }

    world.canonicalize_storages();

    // Run restore hooks in ascending entity order.
    let hooks: Vec<(EntityId, crate::world::RestoreHook)> = snapshot
        .entities
        .iter()
        .filter(|m| m.type_id < known_types)
        .filter_map(|m| {
            world.entity_types()[m.type_id as usize]
                .on_restore
                .clone()
                .map(|h| (m.id, h))
        })
        .collect();
    for (entity, hook) in hooks {
        hook(world, entity);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ComponentSchema, FieldDef};
    use crate::world::EntityTypeDef;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup_world() -> World {
        let mut world = World::new("snap-test");
        world
            .register_component(ComponentSchema::new(
                "position",
                vec![
                    FieldDef::new("x", FieldValue::I32(0)),
                    FieldDef::new("y", FieldValue::I32(0)),
                ],
            ))
            .unwrap();
        world
            .register_component(ComponentSchema::new(
                "health",
                vec![FieldDef::new("hp", FieldValue::U16(100))],
            ))
            .unwrap();
        world
            .register_entity_type(
                EntityTypeDef::new("food").with_component("position"),
            )
            .unwrap();
        world
            .register_entity_type(
                EntityTypeDef::new("player")
                    .with_component("position")
                    .with_component("health"),
            )
            .unwrap();
        world
    }

    fn worlds_agree(a: &World, b: &World) -> bool {
        if a.entities_sorted() != b.entities_sorted() {
            return false;
        }
        for e in a.entities_sorted() {
            for comp in ["position", "health"] {
                for field in ["x", "y", "hp"] {
                    if a.field(e, comp, field) != b.field(e, comp, field) {
                        return false;
                    }
                }
            }
        }
        a.rng_state() == b.rng_state() && a.current_frame() == b.current_frame()
    }

    #[test]
    fn roundtrip_restores_identical_world() {
        let mut world = setup_world();
        world.spawn("food", &[("position", "x", FieldValue::I32(10))]).unwrap();
        world.spawn("player", &[("health", "hp", FieldValue::U16(80))]).unwrap();
        world.set_frame(7);

        let snap = capture_snapshot(&world, 3, true);
        assert_eq!(snap.frame, 7);
        assert_eq!(snap.seq, 3);
        assert!(snap.post_tick);

        let mut restored = setup_world();
        restore_snapshot(&mut restored, &snap).unwrap();

        assert!(worlds_agree(&world, &restored));
    }

    #[test]
    fn restore_preserves_exact_ids_and_allocation() {
        let mut world = setup_world();
        let ids: Vec<EntityId> = (0..5).map(|_| world.spawn("food", &[]).unwrap()).collect();
        world.destroy(ids[1]);
        world.destroy(ids[3]);
        world.flush_destroyed();

        let snap = capture_snapshot(&world, 0, false);
        let mut restored = setup_world();
        restore_snapshot(&mut restored, &snap).unwrap();

        // Future allocations continue identically.
        assert_eq!(
            world.spawn("food", &[]).unwrap(),
            restored.spawn("food", &[]).unwrap()
        );
        assert_eq!(
            world.spawn("food", &[]).unwrap(),
            restored.spawn("food", &[]).unwrap()
        );
    }

    #[test]
    fn entities_are_sorted_ascending_in_snapshot() {
        let mut world = setup_world();
        for _ in 0..6 {
            world.spawn("food", &[]).unwrap();
        }
        let snap = capture_snapshot(&world, 0, false);
        assert!(snap.entities.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn sync_none_entities_are_omitted() {
        let mut world = setup_world();
        world
            .register_component(ComponentSchema::new(
                "particle",
                vec![FieldDef::new("ttl", FieldValue::U8(30))],
            ))
            .unwrap();
        world
            .register_entity_type(
                EntityTypeDef::new("spark").with_component("particle").sync_none(),
            )
            .unwrap();

        let food = world.spawn("food", &[]).unwrap();
        let spark = world.spawn("spark", &[]).unwrap();

        let snap = capture_snapshot(&world, 0, false);
        assert!(snap.contains(food));
        assert!(!snap.contains(spark));
    }

    #[test]
    fn sync_only_restores_unlisted_fields_to_defaults() {
        let mut world = setup_world();
        world
            .register_entity_type(
                EntityTypeDef::new("puck")
                    .with_component("position")
                    .sync_only(&[("position", "x")]),
            )
            .unwrap();
        let puck = world
            .spawn("puck", &[
                ("position", "x", FieldValue::I32(42)),
                ("position", "y", FieldValue::I32(99)),
            ])
            .unwrap();

        let snap = capture_snapshot(&world, 0, false);
        let mut restored = setup_world();
        restored
            .register_entity_type(
                EntityTypeDef::new("puck")
                    .with_component("position")
                    .sync_only(&[("position", "x")]),
            )
            .unwrap();
        restore_snapshot(&mut restored, &snap).unwrap();

        // Synced field came through; unlisted field fell back to the default.
        assert_eq!(restored.field(puck, "position", "x"), Some(FieldValue::I32(42)));
        assert_eq!(restored.field(puck, "position", "y"), Some(FieldValue::I32(0)));
    }

    #[test]
    fn on_restore_hooks_run_in_entity_order() {
        let order: Rc<RefCell<Vec<EntityId>>> = Rc::new(RefCell::new(Vec::new()));

        let build = |order: Rc<RefCell<Vec<EntityId>>>| {
            let mut world = setup_world();
            world
                .register_component(ComponentSchema::new(
                    "body",
                    vec![FieldDef::new("label", FieldValue::U32(0))],
                ))
                .unwrap();
            world
                .register_entity_type(
                    EntityTypeDef::new("crate")
                        .with_component("body")
                        .with_on_restore(move |_w, e| order.borrow_mut().push(e)),
                )
                .unwrap();
            world
        };

        let mut world = build(order.clone());
        let a = world.spawn("crate", &[]).unwrap();
        let b = world.spawn("crate", &[]).unwrap();
        let snap = capture_snapshot(&world, 0, false);

        let mut restored = build(order.clone());
        order.borrow_mut().clear();
        restore_snapshot(&mut restored, &snap).unwrap();

        assert_eq!(*order.borrow(), vec![a, b]);
    }

    #[test]
    fn unknown_entity_type_is_skipped_not_fatal() {
        let mut world = setup_world();
        world
            .register_component(ComponentSchema::new(
                "exotic",
                vec![FieldDef::new("v", FieldValue::I32(0))],
            ))
            .unwrap();
        world
            .register_entity_type(EntityTypeDef::new("alien").with_component("exotic"))
            .unwrap();
        let food = world.spawn("food", &[]).unwrap();
        world.spawn("alien", &[]).unwrap();

        let snap = capture_snapshot(&world, 0, false);

        // Restore into a world that never registered "alien".
        let mut restored = setup_world();
        restore_snapshot(&mut restored, &snap).unwrap();
        assert!(restored.is_valid(food));
        assert_eq!(restored.entity_count(), 1);
    }

    #[test]
    fn rng_and_counters_roundtrip() {
        let mut world = setup_world();
        world.next_body_label();
        world.next_body_label();
        world.rng().next_u32();

        let snap = capture_snapshot(&world, 0, false);
        let mut restored = setup_world();
        restore_snapshot(&mut restored, &snap).unwrap();

        assert_eq!(restored.rng_state(), world.rng_state());
        assert_eq!(restored.next_body_label(), world.next_body_label());
    }
}
