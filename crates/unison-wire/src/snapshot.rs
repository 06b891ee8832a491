//! Snapshot encoding: [`WorldSnapshot`] to and from wire form.
//!
//! Two layers:
//!
//! * [`snapshot_to_value`] / [`snapshot_from_value`] -- the self-describing
//!   codec form used inside snapshot messages.
//! * [`encode_snapshot_binary`] / [`decode_snapshot_binary`] -- the
//!   sectioned binary form: a 4-byte frame, a 2-byte entity count, then
//!   length-prefixed header/entity/column sections. This is the payload of
//!   authoritative snapshot broadcasts.
//!
//! Field columns carry their kind on the wire, so decoding needs no schema
//! registry; the world validates names and kinds when the snapshot is
//! applied.

use byteorder::{ByteOrder, LittleEndian};

use unison_ecs::entity::{AllocatorState, EntityId};
use unison_ecs::prelude::{ComponentTypeId, FieldKind, FieldValue, WorldSnapshot};
use unison_ecs::snapshot::{ComponentColumnData, EntityMetaSnapshot, FieldColumnData};
use unison_ecs::strings::StringRegistryState;

use crate::codec::{decode_exact, encode};
use crate::value::Value;
use crate::WireError;

// ---------------------------------------------------------------------------
// FieldValue <-> Value
// ---------------------------------------------------------------------------

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::I8 => "i8",
        FieldKind::I16 => "i16",
        FieldKind::I32 => "i32",
        FieldKind::U8 => "u8",
        FieldKind::U16 => "u16",
        FieldKind::U32 => "u32",
        FieldKind::F32 => "f32",
    }
}

fn kind_from_name(name: &str) -> Option<FieldKind> {
    match name {
        "i8" => Some(FieldKind::I8),
        "i16" => Some(FieldKind::I16),
        "i32" => Some(FieldKind::I32),
        "u8" => Some(FieldKind::U8),
        "u16" => Some(FieldKind::U16),
        "u32" => Some(FieldKind::U32),
        "f32" => Some(FieldKind::F32),
        _ => None,
    }
}

fn field_to_value(value: FieldValue) -> Value {
    match value {
        FieldValue::F32(f) => Value::Float(f64::from(f)),
        other => Value::Int(other.as_i64().unwrap_or(0)),
    }
}

fn field_from_value(kind: FieldKind, value: &Value) -> Result<FieldValue, WireError> {
    match (kind, value) {
        (FieldKind::F32, Value::Float(f)) => Ok(FieldValue::F32(*f as f32)),
        (FieldKind::F32, Value::Int(i)) => Ok(FieldValue::F32(*i as f32)),
        (_, Value::Int(i)) => FieldValue::from_i64(kind, *i).ok_or_else(|| WireError::Malformed {
            details: format!("value {i} out of range for {kind:?}"),
        }),
        _ => Err(WireError::Malformed {
            details: format!("expected {kind:?} value, got {value:?}"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Snapshot -> Value
// ---------------------------------------------------------------------------

fn allocator_to_value(state: &AllocatorState) -> Value {
    Value::object(vec![
        (
            "generations",
            Value::Array(state.generations.iter().map(|&g| Value::Int(i64::from(g))).collect()),
        ),
        (
            "alive",
            Value::Array(state.alive.iter().map(|&a| Value::Bool(a)).collect()),
        ),
        (
            "free",
            Value::Array(state.free.iter().map(|&f| Value::Int(i64::from(f))).collect()),
        ),
    ])
}

fn strings_to_value(state: &StringRegistryState) -> Value {
    Value::Object(
        state
            .namespaces
            .iter()
            .map(|(ns, names)| {
                (
                    ns.clone(),
                    Value::Array(names.iter().map(|n| Value::Str(n.clone())).collect()),
                )
            })
            .collect(),
    )
}

/// Convert a snapshot to its self-describing codec value.
pub fn snapshot_to_value(snapshot: &WorldSnapshot) -> Value {
    let entities = Value::Array(
        snapshot
            .entities
            .iter()
            .map(|m| {
                Value::Array(vec![
                    Value::Int(i64::from(m.id.raw())),
                    Value::Int(i64::from(m.type_id)),
                    m.client.map_or(Value::Null, |c| Value::Int(i64::from(c))),
                ])
            })
            .collect(),
    );

    let columns = Value::Array(
        snapshot
            .columns
            .iter()
            .map(|col| {
                Value::object(vec![
                    ("type", Value::Int(col.type_id.index() as i64)),
                    (
                        "fields",
                        Value::Array(
                            col.fields
                                .iter()
                                .map(|f| {
                                    let kind = f
                                        .values
                                        .first()
                                        .map_or(FieldKind::I32, |v| v.kind());
                                    Value::object(vec![
                                        ("field", Value::Int(i64::from(f.field))),
                                        ("kind", Value::from(kind_name(kind))),
                                        (
                                            "values",
                                            Value::Array(
                                                f.values.iter().map(|&v| field_to_value(v)).collect(),
                                            ),
                                        ),
                                    ])
                                })
                                .collect(),
                        ),
                    ),
                ])
            })
            .collect(),
    );

    Value::object(vec![
        ("frame", Value::Int(i64::from(snapshot.frame))),
        ("seq", Value::Int(i64::from(snapshot.seq))),
        ("postTick", Value::Bool(snapshot.post_tick)),
        ("allocator", allocator_to_value(&snapshot.allocator)),
        ("strings", strings_to_value(&snapshot.strings)),
        (
            "rng",
            Value::Array(vec![
                Value::Int(i64::from(snapshot.rng.0)),
                Value::Int(i64::from(snapshot.rng.1)),
            ]),
        ),
        ("bodyCounter", Value::Int(i64::from(snapshot.body_counter))),
        ("entities", entities),
        ("columns", columns),
    ])
}

// ---------------------------------------------------------------------------
// Value -> Snapshot
// ---------------------------------------------------------------------------

fn expect_u32(value: &Value, what: &str) -> Result<u32, WireError> {
    value
        .as_i64()
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| WireError::Malformed {
            details: format!("{what}: expected u32, got {value:?}"),
        })
}

fn expect_array<'a>(value: &'a Value, what: &str) -> Result<&'a [Value], WireError> {
    value.as_array().ok_or_else(|| WireError::Malformed {
        details: format!("{what}: expected array"),
    })
}

fn field_key<'a>(value: &'a Value, key: &str, what: &str) -> Result<&'a Value, WireError> {
    value.get(key).ok_or_else(|| WireError::Malformed {
        details: format!("{what}: missing key '{key}'"),
    })
}

fn allocator_from_value(value: &Value) -> Result<AllocatorState, WireError> {
    let generations = expect_array(field_key(value, "generations", "allocator")?, "generations")?
        .iter()
        .map(|v| {
            v.as_i64()
                .and_then(|i| u16::try_from(i).ok())
                .ok_or_else(|| WireError::Malformed {
                    details: "allocator generation out of range".to_owned(),
                })
        })
        .collect::<Result<Vec<u16>, WireError>>()?;
    let alive = expect_array(field_key(value, "alive", "allocator")?, "alive")?
        .iter()
        .map(|v| {
            v.as_bool().ok_or_else(|| WireError::Malformed {
                details: "allocator alive flag is not a bool".to_owned(),
            })
        })
        .collect::<Result<Vec<bool>, WireError>>()?;
    let free = expect_array(field_key(value, "free", "allocator")?, "free")?
        .iter()
        .map(|v| expect_u32(v, "allocator free index"))
        .collect::<Result<Vec<u32>, WireError>>()?;
    Ok(AllocatorState {
        generations,
        alive,
        free,
    })
}

fn strings_from_value(value: &Value) -> Result<StringRegistryState, WireError> {
    let pairs = value.as_object().ok_or_else(|| WireError::Malformed {
        details: "strings: expected object".to_owned(),
    })?;
    let mut namespaces = std::collections::BTreeMap::new();
    for (ns, names_value) in pairs {
        let names = expect_array(names_value, "strings namespace")?
            .iter()
            .map(|v| {
                v.as_str().map(str::to_owned).ok_or_else(|| WireError::Malformed {
                    details: format!("strings namespace '{ns}': non-string entry"),
                })
            })
            .collect::<Result<Vec<String>, WireError>>()?;
        namespaces.insert(ns.clone(), names);
    }
    Ok(StringRegistryState { namespaces })
}

/// Reconstruct a snapshot from its codec value.
pub fn snapshot_from_value(value: &Value) -> Result<WorldSnapshot, WireError> {
    let frame = expect_u32(field_key(value, "frame", "snapshot")?, "frame")?;
    let seq = expect_u32(field_key(value, "seq", "snapshot")?, "seq")?;
    let post_tick = field_key(value, "postTick", "snapshot")?
        .as_bool()
        .ok_or_else(|| WireError::Malformed {
            details: "snapshot: postTick is not a bool".to_owned(),
        })?;
    let allocator = allocator_from_value(field_key(value, "allocator", "snapshot")?)?;
    let strings = strings_from_value(field_key(value, "strings", "snapshot")?)?;

    let rng_parts = expect_array(field_key(value, "rng", "snapshot")?, "rng")?;
    if rng_parts.len() != 2 {
        return Err(WireError::Malformed {
            details: "snapshot: rng must have two words".to_owned(),
        });
    }
    let rng = (
        expect_u32(&rng_parts[0], "rng.s0")?,
        expect_u32(&rng_parts[1], "rng.s1")?,
    );
    let body_counter = expect_u32(field_key(value, "bodyCounter", "snapshot")?, "bodyCounter")?;

    let mut entities = Vec::new();
    for entry in expect_array(field_key(value, "entities", "snapshot")?, "entities")? {
        let parts = expect_array(entry, "entity meta")?;
        if parts.len() != 3 {
            return Err(WireError::Malformed {
                details: "entity meta must be [id, type, client]".to_owned(),
            });
        }
        let client = match &parts[2] {
            Value::Null => None,
            other => Some(expect_u32(other, "entity client")?),
        };
        entities.push(EntityMetaSnapshot {
            id: EntityId::from_raw(expect_u32(&parts[0], "entity id")?),
            type_id: expect_u32(&parts[1], "entity type")?,
            client,
        });
    }

    let mut columns = Vec::new();
    for entry in expect_array(field_key(value, "columns", "snapshot")?, "columns")? {
        let type_index = expect_u32(field_key(entry, "type", "column")?, "column type")?;
        let mut fields = Vec::new();
        for field_entry in expect_array(field_key(entry, "fields", "column")?, "column fields")? {
            let field = expect_u32(field_key(field_entry, "field", "field column")?, "field index")?;
            let kind_str = field_key(field_entry, "kind", "field column")?
                .as_str()
                .ok_or_else(|| WireError::Malformed {
                    details: "field column: kind is not a string".to_owned(),
                })?;
            let kind = kind_from_name(kind_str).ok_or_else(|| WireError::Malformed {
                details: format!("field column: unknown kind '{kind_str}'"),
            })?;
            let values = expect_array(field_key(field_entry, "values", "field column")?, "values")?
                .iter()
                .map(|v| field_from_value(kind, v))
                .collect::<Result<Vec<FieldValue>, WireError>>()?;
            fields.push(FieldColumnData { field, values });
        }
        columns.push(ComponentColumnData {
            type_id: ComponentTypeId::from_index(type_index as usize),
            fields,
        });
    }

    Ok(WorldSnapshot {
        frame,
        seq,
        post_tick,
        allocator,
        strings,
        rng,
        body_counter,
        entities,
        columns,
    })
}

// ---------------------------------------------------------------------------
// Sectioned binary form
// ---------------------------------------------------------------------------

/// Encode the sectioned binary snapshot form.
///
/// Layout: `frame: u32 LE`, `entity_count: u16 LE`, then one
/// `len: u32 LE` + codec-bytes section for the header, the entity list,
/// and the columns.
pub fn encode_snapshot_binary(snapshot: &WorldSnapshot) -> Result<Vec<u8>, WireError> {
    let full = snapshot_to_value(snapshot);

    let section = |keys: &[&str]| -> Value {
        Value::Object(
            full.as_object()
                .map(|pairs| {
                    pairs
                        .iter()
                        .filter(|(k, _)| keys.contains(&k.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        )
    };

    let header = encode(&section(&["seq", "postTick", "allocator", "strings", "rng", "bodyCounter"]))?;
    let entities = encode(&section(&["entities"]))?;
    let columns = encode(&section(&["columns"]))?;

    let mut out = Vec::with_capacity(4 + 2 + 12 + header.len() + entities.len() + columns.len());
    out.extend_from_slice(&snapshot.frame.to_le_bytes());
    out.extend_from_slice(&(snapshot.entities.len() as u16).to_le_bytes());
    for sect in [&header, &entities, &columns] {
        out.extend_from_slice(&(sect.len() as u32).to_le_bytes());
        out.extend_from_slice(sect);
    }
    Ok(out)
}

/// Decode the sectioned binary snapshot form. Truncated input at any point
/// is a decode error.
pub fn decode_snapshot_binary(bytes: &[u8]) -> Result<WorldSnapshot, WireError> {
    let mut offset = 0usize;
    let take = |offset: &mut usize, n: usize| -> Result<&[u8], WireError> {
        if *offset + n > bytes.len() {
            return Err(WireError::Truncated { offset: *offset });
        }
        let slice = &bytes[*offset..*offset + n];
        *offset += n;
        Ok(slice)
    };

    let frame = LittleEndian::read_u32(take(&mut offset, 4)?);
    let entity_count = LittleEndian::read_u16(take(&mut offset, 2)?);

    let mut sections = Vec::with_capacity(3);
    for _ in 0..3 {
        let len = LittleEndian::read_u32(take(&mut offset, 4)?) as usize;
        sections.push(take(&mut offset, len)?);
    }
    if offset != bytes.len() {
        return Err(WireError::TrailingBytes {
            len: bytes.len() - offset,
        });
    }

    // Merge the three section objects back into one snapshot value.
    let mut pairs: Vec<(String, Value)> = vec![("frame".to_owned(), Value::Int(i64::from(frame)))];
    for sect in sections {
        match decode_exact(sect)? {
            Value::Object(sect_pairs) => pairs.extend(sect_pairs),
            _ => {
                return Err(WireError::Malformed {
                    details: "snapshot section is not an object".to_owned(),
                })
            }
        }
    }
    let snapshot = snapshot_from_value(&Value::Object(pairs))?;

    if snapshot.entities.len() != usize::from(entity_count) {
        return Err(WireError::Malformed {
            details: format!(
                "entity count header says {entity_count}, sections carry {}",
                snapshot.entities.len()
            ),
        });
    }
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use unison_ecs::prelude::*;

    fn sample_snapshot() -> WorldSnapshot {
        let mut world = World::new("wire-snap");
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
        world.spawn("food", &[("position", "x", FieldValue::I32(100))]).unwrap();
        world.spawn("food", &[("position", "y", FieldValue::I32(-5))]).unwrap();
        world.set_frame(12);
        capture_snapshot(&world, 4, true)
    }

    #[test]
    fn value_roundtrip() {
        let snap = sample_snapshot();
        let value = snapshot_to_value(&snap);
        let back = snapshot_from_value(&value).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn binary_roundtrip() {
        let snap = sample_snapshot();
        let bytes = encode_snapshot_binary(&snap).unwrap();
        let back = decode_snapshot_binary(&bytes).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn binary_frame_and_count_prefix() {
        let snap = sample_snapshot();
        let bytes = encode_snapshot_binary(&snap).unwrap();
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), 12);
        assert_eq!(LittleEndian::read_u16(&bytes[4..6]), 2);
    }

    #[test]
    fn truncation_anywhere_is_rejected() {
        let snap = sample_snapshot();
        let bytes = encode_snapshot_binary(&snap).unwrap();
        // Every strict prefix must fail to decode.
        for cut in 0..bytes.len() {
            assert!(
                decode_snapshot_binary(&bytes[..cut]).is_err(),
                "prefix of {cut} bytes decoded successfully"
            );
        }
    }

    #[test]
    fn negative_values_survive_the_wire() {
        let snap = sample_snapshot();
        let bytes = encode_snapshot_binary(&snap).unwrap();
        let back = decode_snapshot_binary(&bytes).unwrap();
        let col = back
            .columns
            .iter()
            .find(|c| c.type_id.index() == 0)
            .unwrap();
        let y = col.fields.iter().find(|f| f.field == 1).unwrap();
        assert!(y.values.contains(&FieldValue::I32(-5)));
    }
}
