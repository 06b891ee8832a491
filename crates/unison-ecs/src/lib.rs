//! Unison ECS -- the deterministic entity-component world.
//!
//! This crate provides the replicated simulation kernel: a structure-of-arrays
//! component store with runtime field schemas, a generational entity id
//! allocator with deterministic recycling, namespaced string interning, a
//! fixed-phase system scheduler, sparse world snapshots, and the canonical
//! per-frame state hash.
//!
//! Everything here is built around one guarantee: two peers that apply the
//! same ordered inputs to the same starting state compute bit-identical
//! worlds. That is why entity ids recycle smallest-index-first, why component
//! iteration is always ascending by entity id, why the PRNG state lives in
//! the world and travels in snapshots, and why the state hash is defined over
//! a canonical field order rather than memory layout.
//!
//! # Quick Start
//!
//! ```
//! use unison_ecs::prelude::*;
//!
//! let mut world = World::new("room-1");
//! world
//!     .register_component(ComponentSchema::new(
//!         "position",
//!         vec![
//!             FieldDef::new("x", FieldValue::I32(0)),
//!             FieldDef::new("y", FieldValue::I32(0)),
//!         ],
//!     ))
//!     .unwrap();
//! world
//!     .register_entity_type(EntityTypeDef::new("food").with_component("position"))
//!     .unwrap();
//!
//! let e = world.spawn("food", &[]).unwrap();
//! assert!(world.is_valid(e));
//! ```

#![deny(unsafe_code)]

pub mod entity;
pub mod hash;
pub mod schedule;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod strings;
pub mod world;

use entity::EntityId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The 20-bit entity index space is exhausted. Fatal for the simulation.
    #[error("entity limit exceeded: all {max} indices are in use", max = 1 << 20)]
    EntityLimitExceeded,

    /// The entity does not exist (stale generation or never allocated).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity {
        entity: EntityId,
    },

    /// A component name was referenced that has not been registered.
    #[error("component type '{name}' is not registered")]
    UnknownComponent {
        name: String,
    },

    /// A component name was registered twice.
    #[error("component type '{name}' is already registered")]
    DuplicateComponent {
        name: String,
    },

    /// An entity type name was referenced that has not been registered.
    #[error("entity type '{name}' is not registered")]
    UnknownEntityType {
        name: String,
    },

    /// An entity type name was registered twice.
    #[error("entity type '{name}' is already registered")]
    DuplicateEntityType {
        name: String,
    },

    /// The entity already holds this component; adding again is a caller error.
    #[error("entity {entity:?} already has component '{component}'")]
    ComponentAlreadyPresent {
        entity: EntityId,
        component: String,
    },

    /// The entity does not hold this component.
    #[error("entity {entity:?} does not have component '{component}'")]
    ComponentMissing {
        entity: EntityId,
        component: String,
    },

    /// A field was referenced that is not part of the component's schema.
    #[error("component '{component}' has no field '{field}'")]
    UnknownField {
        component: String,
        field: String,
    },

    /// A value's kind does not match the field's declared kind.
    #[error("field '{component}.{field}' expects {expected:?}, got {actual:?}")]
    FieldKindMismatch {
        component: String,
        field: String,
        expected: schema::FieldKind,
        actual: schema::FieldKind,
    },

    /// A float field was declared as participating in sync or hashing.
    #[error("field '{component}.{field}' is f32 and cannot participate in deterministic sync")]
    SyncedFloatField {
        component: String,
        field: String,
    },

    /// A snapshot could not be applied to this world.
    #[error("snapshot restore failed: {details}")]
    RestoreFailed {
        details: String,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::entity::{EntityAllocator, EntityId};
    pub use crate::hash::{snapshot_hash, state_hash};
    pub use crate::schedule::{Phase, Scheduler, SystemDesc};
    pub use crate::schema::{
        ComponentSchema, ComponentTypeId, FieldDef, FieldKind, FieldValue, SchemaRegistry,
    };
    pub use crate::snapshot::{capture_snapshot, restore_snapshot, WorldSnapshot};
    pub use crate::storage::ComponentStorage;
    pub use crate::strings::StringRegistry;
    pub use crate::world::{CommandKind, EntityTypeDef, SyncPolicy, World};
    pub use crate::EcsError;
}
