//! Field-level drift diagnosis.
//!
//! When a desynced peer receives an authoritative snapshot, comparing it to
//! the local same-frame snapshot field-by-field pinpoints *what* diverged
//! long before anyone stares at a hash. The report is for logging only; the
//! recovery path (hard reset from the authoritative snapshot) does not
//! consult it.

use serde::Serialize;

use unison_ecs::entity::EntityId;
use unison_ecs::prelude::{FieldValue, World, WorldSnapshot};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// One drifted field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftedField {
    /// Entity type name (or `"#<id>"` when unknown locally).
    pub entity_type: String,
    /// The entity.
    pub entity: EntityId,
    /// `component.field`.
    pub field: String,
    /// The local value, if the entity/field exists locally.
    pub local: Option<FieldValue>,
    /// The authoritative value, if the entity/field exists there.
    pub server: Option<FieldValue>,
}

/// The outcome of a field-by-field comparison.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriftReport {
    /// Fields compared and found equal.
    pub matching_fields: usize,
    /// Total fields compared.
    pub total_fields: usize,
    /// The divergent fields, in canonical order.
    pub drifted: Vec<DriftedField>,
}

impl DriftReport {
    /// Whether nothing drifted.
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Diagnosis
// ---------------------------------------------------------------------------

/// Flatten a snapshot into `(entity, component.field) -> value` in canonical
/// order, using the world's registries to name things.
fn flatten(
    snapshot: &WorldSnapshot,
    world: &World,
) -> Vec<(EntityId, String, String, FieldValue)> {
    let mut out = Vec::new();
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
            for (i, field_col) in column.fields.iter().enumerate() {
                let field_def = &schema.fields[field_col.field as usize];
                if !ty.sync.includes(&schema.name, &field_def.name) {
                    continue;
                }
                if let Some(&value) = field_col.values.get(cursors[i]) {
                    cursors[i] += 1;
                    out.push((meta.id, schema.name.clone(), field_def.name.clone(), value));
                }
            }
        }
    }
    // Canonical order: entity, then component name, then field position.
    out.sort_by(|a, b| (a.0, &a.1, &a.2).cmp(&(b.0, &b.1, &b.2)));
    out
}

/// Compare the local snapshot against the authoritative one.
pub fn diagnose(local: &WorldSnapshot, authoritative: &WorldSnapshot, world: &World) -> DriftReport {
    let local_fields = flatten(local, world);
    let server_fields = flatten(authoritative, world);

    let type_name = |type_id: u32| -> String {
        world
            .entity_types()
            .get(type_id as usize)
            .map_or_else(|| format!("#{type_id}"), |t| t.name.clone())
    };
    let type_of = |snap: &WorldSnapshot, id: EntityId| -> String {
        snap.entities
            .iter()
            .find(|m| m.id == id)
            .map_or_else(|| "?".to_owned(), |m| type_name(m.type_id))
    };

    let mut report = DriftReport::default();
    let mut li = 0usize;
    let mut si = 0usize;
    while li < local_fields.len() || si < server_fields.len() {
        let order = match (local_fields.get(li), server_fields.get(si)) {
            (Some(l), Some(s)) => (l.0, &l.1, &l.2).cmp(&(s.0, &s.1, &s.2)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => break,
        };
        match order {
            std::cmp::Ordering::Equal => {
                let l = &local_fields[li];
                let s = &server_fields[si];
                report.total_fields += 1;
                if l.3 == s.3 {
                    report.matching_fields += 1;
                } else {
                    report.drifted.push(DriftedField {
                        entity_type: type_of(authoritative, l.0),
                        entity: l.0,
                        field: format!("{}.{}", l.1, l.2),
                        local: Some(l.3),
                        server: Some(s.3),
                    });
                }
                li += 1;
                si += 1;
            }
            std::cmp::Ordering::Less => {
                let l = &local_fields[li];
                report.total_fields += 1;
                report.drifted.push(DriftedField {
                    entity_type: type_of(local, l.0),
                    entity: l.0,
                    field: format!("{}.{}", l.1, l.2),
                    local: Some(l.3),
                    server: None,
                });
                li += 1;
            }
            std::cmp::Ordering::Greater => {
                let s = &server_fields[si];
                report.total_fields += 1;
                report.drifted.push(DriftedField {
                    entity_type: type_of(authoritative, s.0),
                    entity: s.0,
                    field: format!("{}.{}", s.1, s.2),
                    local: None,
                    server: Some(s.3),
                });
                si += 1;
            }
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use unison_ecs::prelude::*;

    fn setup_world() -> World {
        let mut world = World::new("drift-test");
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
    fn identical_snapshots_are_clean() {
        let mut world = setup_world();
        world.spawn("food", &[("position", "x", FieldValue::I32(10))]).unwrap();
        let snap = capture_snapshot(&world, 0, true);

        let report = diagnose(&snap, &snap, &world);
        assert!(report.is_clean());
        assert_eq!(report.matching_fields, report.total_fields);
        assert_eq!(report.total_fields, 2);
    }

    #[test]
    fn value_drift_is_reported_with_both_sides() {
        let mut a = setup_world();
        let e = a.spawn("food", &[("position", "x", FieldValue::I32(10))]).unwrap();
        let local = capture_snapshot(&a, 0, true);

        a.set_field(e, "position", "x", FieldValue::I32(11)).unwrap();
        let server = capture_snapshot(&a, 0, true);

        let report = diagnose(&local, &server, &a);
        assert_eq!(report.drifted.len(), 1);
        let drift = &report.drifted[0];
        assert_eq!(drift.field, "position.x");
        assert_eq!(drift.local, Some(FieldValue::I32(10)));
        assert_eq!(drift.server, Some(FieldValue::I32(11)));
        assert_eq!(drift.entity_type, "food");
        assert_eq!(report.matching_fields, 1);
        assert_eq!(report.total_fields, 2);
    }

    #[test]
    fn missing_entity_fields_count_as_drift() {
        let mut a = setup_world();
        a.spawn("food", &[]).unwrap();
        let local = capture_snapshot(&a, 0, true);
        a.spawn("food", &[]).unwrap();
        let server = capture_snapshot(&a, 0, true);

        let report = diagnose(&local, &server, &a);
        // The second entity's two fields exist only on the server side.
        assert_eq!(report.drifted.len(), 2);
        assert!(report.drifted.iter().all(|d| d.local.is_none()));
    }
}
