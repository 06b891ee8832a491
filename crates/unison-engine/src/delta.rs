//! Structural snapshot deltas.
//!
//! A delta between two snapshots carries only structural change: entities
//! created since the base (with their full field values) and entities
//! deleted since the base, plus the base and result hashes. Field updates
//! for surviving entities are deliberately absent -- the simulation is
//! deterministic, so every peer already computes them; the `result_hash` is
//! what verifies they did.

use unison_ecs::entity::EntityId;
use unison_ecs::hash::snapshot_hash;
use unison_ecs::prelude::{FieldValue, World, WorldSnapshot};
use unison_wire::{decode_exact, encode, Value, WireError};

use crate::EngineError;

// ---------------------------------------------------------------------------
// Delta types
// ---------------------------------------------------------------------------

/// A created entity with its full component values.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedEntity {
    /// The exact entity id assigned by the creating peer.
    pub id: EntityId,
    /// Dense entity type id.
    pub type_id: u32,
    /// Owning client's interned id, if any.
    pub client: Option<u32>,
    /// `component name -> [(field name, value)]`, both in canonical order.
    pub components: Vec<(String, Vec<(String, FieldValue)>)>,
}

/// A structural diff between two snapshots of the same room.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDelta {
    /// The frame of the `curr` snapshot.
    pub frame: u32,
    /// Canonical hash of the base snapshot (0 when there was none).
    pub base_hash: u32,
    /// Canonical hash of the result snapshot.
    pub result_hash: u32,
    /// Entities present in `curr` but not the base, ascending by id.
    pub created: Vec<CreatedEntity>,
    /// Entities present in the base but not `curr`, ascending by id.
    pub deleted: Vec<EntityId>,
}

impl SnapshotDelta {
    /// Whether the delta carries no structural change.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Compute
// ---------------------------------------------------------------------------

/// Extract every entity's field values from a snapshot's packed columns.
///
/// Returns, per entity id, `component name -> [(field, value)]` in
/// component registration order. Walks each column with a cursor; columns
/// pack values in entity order, so one pass suffices.
fn explode_columns(
    snapshot: &WorldSnapshot,
    world: &World,
) -> std::collections::BTreeMap<EntityId, Vec<(String, Vec<(String, FieldValue)>)>> {
    let mut out: std::collections::BTreeMap<EntityId, Vec<(String, Vec<(String, FieldValue)>)>> =
        snapshot.entities.iter().map(|m| (m.id, Vec::new())).collect();

    let types = world.entity_types();
    for column in &snapshot.columns {
        if column.type_id.index() >= world.schemas().len() {
            continue;
        }
        let schema = world.schemas().schema(column.type_id);
        let mut cursors = vec![0usize; column.fields.len()];
        for meta in &snapshot.entities {
            let Some(ty) = types.get(meta.type_id as usize) else { continue };
            if !ty.components.contains(&column.type_id) {
                continue;
            }
            let mut fields = Vec::new();
            for (i, field_col) in column.fields.iter().enumerate() {
                let field_def = &schema.fields[field_col.field as usize];
                if !ty.sync.includes(&schema.name, &field_def.name) {
                    continue;
                }
                if let Some(&value) = field_col.values.get(cursors[i]) {
                    cursors[i] += 1;
                    fields.push((field_def.name.clone(), value));
                }
            }
            if !fields.is_empty() {
                if let Some(entry) = out.get_mut(&meta.id) {
                    entry.push((schema.name.clone(), fields));
                }
            }
        }
    }
    out
}

/// Compute the delta from `prev` to `curr`.
///
/// `world` supplies the schema and entity type registries for hashing and
/// value extraction; it is registration-time data, not simulation state.
pub fn compute(prev: Option<&WorldSnapshot>, curr: &WorldSnapshot, world: &World) -> SnapshotDelta {
    let base_hash = prev.map_or(0, |p| snapshot_hash(p, world));
    let result_hash = snapshot_hash(curr, world);

    let mut created = Vec::new();
    let mut deleted = Vec::new();

    let mut values = explode_columns(curr, world);
    for meta in &curr.entities {
        let existed = prev.is_some_and(|p| p.contains(meta.id));
        if !existed {
            created.push(CreatedEntity {
                id: meta.id,
                type_id: meta.type_id,
                client: meta.client,
                components: values.remove(&meta.id).unwrap_or_default(),
            });
        }
    }
    if let Some(prev) = prev {
        for meta in &prev.entities {
            if !curr.contains(meta.id) {
                deleted.push(meta.id);
            }
        }
    }

    // Snapshot entity lists are ascending, so these already are; keep the
    // contract explicit.
    created.sort_by_key(|c| c.id);
    deleted.sort();

    SnapshotDelta {
        frame: curr.frame,
        base_hash,
        result_hash,
        created,
        deleted,
    }
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Apply a delta's structural changes to the live world.
///
/// Deletes are applied first, then creates with their exact ids and field
/// values. The caller verifies `state_hash` against
/// [`SnapshotDelta::result_hash`] afterwards.
pub fn apply(world: &mut World, delta: &SnapshotDelta) -> Result<(), EngineError> {
    for &id in &delta.deleted {
        if world.is_valid(id) {
            world.despawn_now(id);
        } else {
            tracing::warn!(entity = %id, "delta deletes an entity this peer does not have");
        }
    }

    for create in &delta.created {
        world
            .spawn_exact(create.id, create.type_id, create.client)
            .map_err(|e| EngineError::DeltaApplyFailed {
                details: format!("create {}: {e}", create.id),
            })?;
        for (component, fields) in &create.components {
            for (field, value) in fields {
                world
                    .set_field(create.id, component, field, *value)
                    .map_err(|e| EngineError::DeltaApplyFailed {
                        details: format!("create {}: {component}.{field}: {e}", create.id),
                    })?;
            }
        }
    }
    world.canonicalize_storages();
    Ok(())
}

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

impl SnapshotDelta {
    /// The delta as a codec value.
    pub fn to_value(&self) -> Value {
        let created = Value::Array(
            self.created
                .iter()
                .map(|c| {
                    let components = Value::Object(
                        c.components
                            .iter()
                            .map(|(comp, fields)| {
                                (
                                    comp.clone(),
                                    Value::Object(
                                        fields
                                            .iter()
                                            .map(|(f, v)| {
                                                let wire = match v {
                                                    FieldValue::F32(f32v) => {
                                                        Value::Float(f64::from(*f32v))
                                                    }
                                                    other => {
                                                        Value::Int(other.as_i64().unwrap_or(0))
                                                    }
                                                };
                                                (f.clone(), wire)
                                            })
                                            .collect(),
                                    ),
                                )
                            })
                            .collect(),
                    );
                    Value::object(vec![
                        ("id", Value::Int(i64::from(c.id.raw()))),
                        ("type", Value::Int(i64::from(c.type_id))),
                        ("client", c.client.map_or(Value::Null, |v| Value::Int(i64::from(v)))),
                        ("components", components),
                    ])
                })
                .collect(),
        );
        Value::object(vec![
            ("frame", Value::Int(i64::from(self.frame))),
            ("baseHash", Value::Int(i64::from(self.base_hash))),
            ("resultHash", Value::Int(i64::from(self.result_hash))),
            ("created", created),
            (
                "deleted",
                Value::Array(
                    self.deleted
                        .iter()
                        .map(|id| Value::Int(i64::from(id.raw())))
                        .collect(),
                ),
            ),
        ])
    }

    /// Parse a delta from its codec value. `world` supplies field kinds.
    pub fn from_value(value: &Value, world: &World) -> Result<Self, WireError> {
        let get_u32 = |v: &Value, what: &str| -> Result<u32, WireError> {
            v.as_i64()
                .and_then(|i| u32::try_from(i).ok())
                .ok_or_else(|| WireError::Malformed {
                    details: format!("delta: {what} is not a u32"),
                })
        };
        let frame = get_u32(value.get("frame").unwrap_or(&Value::Null), "frame")?;
        let base_hash = get_u32(value.get("baseHash").unwrap_or(&Value::Null), "baseHash")?;
        let result_hash = get_u32(value.get("resultHash").unwrap_or(&Value::Null), "resultHash")?;

        let mut created = Vec::new();
        for entry in value
            .get("created")
            .and_then(Value::as_array)
            .unwrap_or(&[])
        {
            let id = EntityId::from_raw(get_u32(entry.get("id").unwrap_or(&Value::Null), "id")?);
            let type_id = get_u32(entry.get("type").unwrap_or(&Value::Null), "type")?;
            let client = match entry.get("client") {
                None | Some(Value::Null) => None,
                Some(v) => Some(get_u32(v, "client")?),
            };
            let mut components = Vec::new();
            if let Some(pairs) = entry.get("components").and_then(Value::as_object) {
                for (comp_name, fields_value) in pairs {
                    let comp_id =
                        world
                            .component_id(comp_name)
                            .ok_or_else(|| WireError::Malformed {
                                details: format!("delta: unknown component '{comp_name}'"),
                            })?;
                    let schema = world.schemas().schema(comp_id);
                    let mut fields = Vec::new();
                    for (field_name, field_value) in
                        fields_value.as_object().unwrap_or(&[]).iter()
                    {
                        let field_idx = schema.field_index(field_name).ok_or_else(|| {
                            WireError::Malformed {
                                details: format!("delta: unknown field '{comp_name}.{field_name}'"),
                            }
                        })?;
                        let kind = schema.fields[field_idx].kind();
                        let typed = match field_value {
                            Value::Float(f) => FieldValue::F32(*f as f32),
                            Value::Int(i) => {
                                FieldValue::from_i64(kind, *i).ok_or_else(|| WireError::Malformed {
                                    details: format!(
                                        "delta: {comp_name}.{field_name}: {i} out of range"
                                    ),
                                })?
                            }
                            other => {
                                return Err(WireError::Malformed {
                                    details: format!(
                                        "delta: {comp_name}.{field_name}: unexpected {other:?}"
                                    ),
                                })
                            }
                        };
                        fields.push((field_name.clone(), typed));
                    }
                    components.push((comp_name.clone(), fields));
                }
            }
            created.push(CreatedEntity {
                id,
                type_id,
                client,
                components,
            });
        }

        let deleted = value
            .get("deleted")
            .and_then(Value::as_array)
            .unwrap_or(&[])
            .iter()
            .map(|v| get_u32(v, "deleted id").map(EntityId::from_raw))
            .collect::<Result<Vec<EntityId>, WireError>>()?;

        Ok(Self {
            frame,
            base_hash,
            result_hash,
            created,
            deleted,
        })
    }

    /// Encode to codec bytes.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        encode(&self.to_value())
    }

    /// Decode from codec bytes.
    pub fn decode(bytes: &[u8], world: &World) -> Result<Self, WireError> {
        Self::from_value(&decode_exact(bytes)?, world)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use unison_ecs::hash::state_hash;
    use unison_ecs::prelude::*;

    fn setup_world() -> World {
        let mut world = World::new("delta-test");
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
            .register_entity_type(EntityTypeDef::new("food").with_component("position"))
            .unwrap();
        world
    }

    #[test]
    fn empty_delta_for_identical_snapshots() {
        let mut world = setup_world();
        world.spawn("food", &[]).unwrap();
        let snap = capture_snapshot(&world, 0, true);
        let delta = compute(Some(&snap), &snap, &world);
        assert!(delta.is_empty());
        assert_eq!(delta.base_hash, delta.result_hash);
    }

    #[test]
    fn creates_and_deletes_are_detected_sorted() {
        let mut world = setup_world();
        let keep = world.spawn("food", &[]).unwrap();
        let gone = world.spawn("food", &[]).unwrap();
        let prev = capture_snapshot(&world, 0, true);

        world.despawn_now(gone);
        let new_a = world.spawn("food", &[("position", "x", FieldValue::I32(7))]).unwrap();
        let new_b = world.spawn("food", &[]).unwrap();
        world.set_frame(4);
        let curr = capture_snapshot(&world, 1, true);

        let delta = compute(Some(&prev), &curr, &world);
        assert_eq!(delta.frame, 4);
        assert_eq!(delta.deleted, vec![gone]);
        let created_ids: Vec<EntityId> = delta.created.iter().map(|c| c.id).collect();
        assert_eq!(created_ids, vec![new_a, new_b]);
        assert!(delta.created.windows(2).all(|w| w[0].id < w[1].id));
        assert!(world.is_valid(keep));

        // Created entries carry the field values.
        let a = &delta.created[0];
        let (_, fields) = a.components.iter().find(|(c, _)| c == "position").unwrap();
        assert!(fields.contains(&("x".to_owned(), FieldValue::I32(7))));
    }

    #[test]
    fn no_base_means_everything_created() {
        let mut world = setup_world();
        world.spawn("food", &[]).unwrap();
        world.spawn("food", &[]).unwrap();
        let curr = capture_snapshot(&world, 0, true);

        let delta = compute(None, &curr, &world);
        assert_eq!(delta.base_hash, 0);
        assert_eq!(delta.created.len(), 2);
        assert!(delta.deleted.is_empty());
    }

    #[test]
    fn apply_reproduces_structure_and_hash() {
        let mut world = setup_world();
        let e0 = world.spawn("food", &[]).unwrap();
        world.spawn("food", &[]).unwrap();
        let prev = capture_snapshot(&world, 0, true);

        // Peer world starts from the same base.
        let mut peer = setup_world();
        unison_ecs::snapshot::restore_snapshot(&mut peer, &prev).unwrap();

        // Source world evolves structurally.
        world.despawn_now(e0);
        world.spawn("food", &[("position", "y", FieldValue::I32(-3))]).unwrap();
        world.set_frame(9);
        let curr = capture_snapshot(&world, 2, true);
        let delta = compute(Some(&prev), &curr, &world);

        peer.set_frame(9);
        apply(&mut peer, &delta).unwrap();

        assert_eq!(peer.entities_sorted(), world.entities_sorted());
        assert_eq!(state_hash(&peer, 9), delta.result_hash);
    }

    #[test]
    fn wire_roundtrip() {
        let mut world = setup_world();
        world.spawn("food", &[("position", "x", FieldValue::I32(11))]).unwrap();
        let curr = capture_snapshot(&world, 0, true);
        let delta = compute(None, &curr, &world);

        let bytes = delta.encode().unwrap();
        let back = SnapshotDelta::decode(&bytes, &world).unwrap();
        assert_eq!(back, delta);
    }

    #[test]
    fn apply_unknown_component_fails_cleanly() {
        let world = setup_world();
        let delta = SnapshotDelta {
            frame: 0,
            base_hash: 0,
            result_hash: 0,
            created: vec![CreatedEntity {
                id: EntityId::from_raw(0),
                type_id: 99,
                client: None,
                components: Vec::new(),
            }],
            deleted: Vec::new(),
        };
        let mut target = World::new("delta-apply");
        let _ = &world;
        assert!(apply(&mut target, &delta).is_err());
    }
}
