//! Component field schemas and the schema registry.
//!
//! A component type is a registered schema: a unique name plus an ordered
//! list of named fields, each with a numeric primitive kind and a default
//! value. Field order is declaration order and is load-bearing -- snapshots
//! pack columns in it and the state hash consumes fields in it.
//!
//! `f32` fields exist for client-side presentation data only; the world
//! rejects them from any sync mask and the hash never sees them.

use serde::{Deserialize, Serialize};

use crate::EcsError;

// ---------------------------------------------------------------------------
// FieldKind / FieldValue
// ---------------------------------------------------------------------------

/// The numeric primitive kinds a component field may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Signed 8-bit.
    I8,
    /// Signed 16-bit.
    I16,
    /// Signed 32-bit (also the representation of 16.16 fixed-point).
    I32,
    /// Unsigned 8-bit.
    U8,
    /// Unsigned 16-bit.
    U16,
    /// Unsigned 32-bit.
    U32,
    /// 32-bit float. Never participates in deterministic simulation state.
    F32,
}

impl FieldKind {
    /// Whether values of this kind may participate in snapshots and hashing.
    pub fn is_deterministic(self) -> bool {
        !matches!(self, FieldKind::F32)
    }
}

/// A single field value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Signed 8-bit value.
    I8(i8),
    /// Signed 16-bit value.
    I16(i16),
    /// Signed 32-bit value.
    I32(i32),
    /// Unsigned 8-bit value.
    U8(u8),
    /// Unsigned 16-bit value.
    U16(u16),
    /// Unsigned 32-bit value.
    U32(u32),
    /// 32-bit float value (presentation only).
    F32(f32),
}

impl FieldValue {
    /// The kind of this value.
    pub fn kind(self) -> FieldKind {
        match self {
            FieldValue::I8(_) => FieldKind::I8,
            FieldValue::I16(_) => FieldKind::I16,
            FieldValue::I32(_) => FieldKind::I32,
            FieldValue::U8(_) => FieldKind::U8,
            FieldValue::U16(_) => FieldKind::U16,
            FieldValue::U32(_) => FieldKind::U32,
            FieldValue::F32(_) => FieldKind::F32,
        }
    }

    /// Canonical `u32` for hashing: sign-extended for signed kinds, masked
    /// for smaller unsigned kinds. `None` for floats -- they never hash.
    pub fn as_canonical_u32(self) -> Option<u32> {
        match self {
            FieldValue::I8(v) => Some(i32::from(v) as u32),
            FieldValue::I16(v) => Some(i32::from(v) as u32),
            FieldValue::I32(v) => Some(v as u32),
            FieldValue::U8(v) => Some(u32::from(v)),
            FieldValue::U16(v) => Some(u32::from(v)),
            FieldValue::U32(v) => Some(v),
            FieldValue::F32(_) => None,
        }
    }

    /// Widen to `i64` for wire encoding. `None` for floats.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            FieldValue::I8(v) => Some(i64::from(v)),
            FieldValue::I16(v) => Some(i64::from(v)),
            FieldValue::I32(v) => Some(i64::from(v)),
            FieldValue::U8(v) => Some(i64::from(v)),
            FieldValue::U16(v) => Some(i64::from(v)),
            FieldValue::U32(v) => Some(i64::from(v)),
            FieldValue::F32(_) => None,
        }
    }

    /// Coerce a wire integer into a value of the given kind, checking range.
    pub fn from_i64(kind: FieldKind, v: i64) -> Option<FieldValue> {
        match kind {
            FieldKind::I8 => i8::try_from(v).ok().map(FieldValue::I8),
            FieldKind::I16 => i16::try_from(v).ok().map(FieldValue::I16),
            FieldKind::I32 => i32::try_from(v).ok().map(FieldValue::I32),
            FieldKind::U8 => u8::try_from(v).ok().map(FieldValue::U8),
            FieldKind::U16 => u16::try_from(v).ok().map(FieldValue::U16),
            FieldKind::U32 => u32::try_from(v).ok().map(FieldValue::U32),
            FieldKind::F32 => None,
        }
    }
}

// ---------------------------------------------------------------------------
// FieldDef / ComponentSchema
// ---------------------------------------------------------------------------

/// A named field with its kind and default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, unique within the component.
    pub name: String,
    /// Default value; its kind is the field's kind.
    pub default: FieldValue,
}

impl FieldDef {
    /// Create a field definition. The default value fixes the field's kind.
    pub fn new(name: &str, default: FieldValue) -> Self {
        Self {
            name: name.to_owned(),
            default,
        }
    }

    /// The field's kind (from its default value).
    pub fn kind(&self) -> FieldKind {
        self.default.kind()
    }
}

/// A registered component type: unique name plus ordered fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSchema {
    /// Unique component name.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldDef>,
}

impl ComponentSchema {
    /// Create a schema from a name and ordered field list.
    pub fn new(name: &str, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.to_owned(),
            fields,
        }
    }

    /// Index of a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// The default row for this component (one value per field, in order).
    pub fn default_row(&self) -> Vec<FieldValue> {
        self.fields.iter().map(|f| f.default).collect()
    }
}

// ---------------------------------------------------------------------------
// ComponentTypeId / SchemaRegistry
// ---------------------------------------------------------------------------

/// Opaque dense identifier for a registered component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// The dense index of this component type.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Reconstruct from a dense index. Intended for codec use.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

/// Registry of component schemas, assigning dense [`ComponentTypeId`]s in
/// registration order.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: Vec<ComponentSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under its unique name.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateComponent`] if the name is taken.
    pub fn register(&mut self, schema: ComponentSchema) -> Result<ComponentTypeId, EcsError> {
        if self.lookup(&schema.name).is_some() {
            return Err(EcsError::DuplicateComponent { name: schema.name });
        }
        let id = ComponentTypeId(self.schemas.len() as u32);
        self.schemas.push(schema);
        Ok(id)
    }

    /// Look up a component type by name.
    pub fn lookup(&self, name: &str) -> Option<ComponentTypeId> {
        self.schemas
            .iter()
            .position(|s| s.name == name)
            .map(|i| ComponentTypeId(i as u32))
    }

    /// The schema for a type id.
    pub fn schema(&self, id: ComponentTypeId) -> &ComponentSchema {
        &self.schemas[id.index()]
    }

    /// Number of registered component types.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether no component types are registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// All type ids sorted by component name. This is the canonical order
    /// used by hashing and drift diagnosis.
    pub fn ids_by_name(&self) -> Vec<ComponentTypeId> {
        let mut ids: Vec<ComponentTypeId> =
            (0..self.schemas.len() as u32).map(ComponentTypeId).collect();
        ids.sort_by(|a, b| self.schemas[a.index()].name.cmp(&self.schemas[b.index()].name));
        ids
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
