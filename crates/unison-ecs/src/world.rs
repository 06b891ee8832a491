//! The [`World`] is the top-level container for the replicated simulation
//! state. It owns the entity allocator, component storages, string registry,
//! PRNG state, frame counter, entity type (prefab) registry, and the
//! per-client input registry.
//!
//! Everything the simulation depends on is a field of the world -- including
//! the PRNG words and the body label counter -- so that a snapshot captures
//! the complete deterministic state and a restored peer continues exactly
//! where the captured peer was. Nothing here is a module global.

use std::collections::HashMap;
use std::rc::Rc;

use unison_math::{DeterministicRng, Fixed};

use crate::entity::{AllocatorState, EntityAllocator, EntityId};
use crate::schedule::Phase;
use crate::schema::{ComponentSchema, ComponentTypeId, FieldDef, FieldValue, SchemaRegistry};
use crate::storage::ComponentStorage;
use crate::strings::{StringRegistry, StringRegistryState, NS_CLIENT, NS_COMPONENT, NS_ENTITY_TYPE};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// The kind of a declared input command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// A pressed/released button, materialized as one `u8` column.
    Button,
    /// A 2D fixed-point vector, materialized as two `i32` columns.
    Vector,
}

/// A named input command in an entity type's command schema.
#[derive(Debug, Clone)]
pub struct CommandDef {
    /// Command name as it appears in input payloads.
    pub name: String,
    /// Button or vector.
    pub kind: CommandKind,
}

// ---------------------------------------------------------------------------
// Sync policy
// ---------------------------------------------------------------------------

/// Which fields of an entity type participate in snapshots and hashing.
#[derive(Debug, Clone, Default)]
pub enum SyncPolicy {
    /// Every deterministic field syncs (the default).
    #[default]
    All,
    /// Only the listed `(component, field)` pairs sync.
    Only(Vec<(String, String)>),
    /// Nothing syncs; entities of this type are omitted from snapshots and
    /// must be recreated locally (client-only entities).
    None,
}

impl SyncPolicy {
    /// Whether the given field participates in sync.
    pub fn includes(&self, component: &str, field: &str) -> bool {
        match self {
            SyncPolicy::All => true,
            SyncPolicy::Only(fields) => {
                fields.iter().any(|(c, f)| c == component && f == field)
            }
            SyncPolicy::None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Entity type definitions (prefabs)
// ---------------------------------------------------------------------------

/// Hook invoked for each restored entity after a snapshot restore.
pub type RestoreHook = Rc<dyn Fn(&mut World, EntityId)>;

/// Builder for an entity type: component list, default overrides, command
/// schema, sync policy, and the optional restore hook.
#[derive(Clone, Default)]
pub struct EntityTypeDef {
    name: String,
    components: Vec<String>,
    overrides: Vec<(String, String, FieldValue)>,
    commands: Vec<CommandDef>,
    sync: SyncPolicy,
    on_restore: Option<RestoreHook>,
}

impl EntityTypeDef {
    /// Start a definition for `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    /// Attach a registered component type.
    pub fn with_component(mut self, component: &str) -> Self {
        self.components.push(component.to_owned());
        self
    }

    /// Override a component field default for this entity type.
    pub fn with_default(mut self, component: &str, field: &str, value: FieldValue) -> Self {
        self.overrides.push((component.to_owned(), field.to_owned(), value));
        self
    }

    /// Declare an input command.
    pub fn with_command(mut self, name: &str, kind: CommandKind) -> Self {
        self.commands.push(CommandDef {
            name: name.to_owned(),
            kind,
        });
        self
    }

    /// Sync only the listed `(component, field)` pairs.
    pub fn sync_only(mut self, fields: &[(&str, &str)]) -> Self {
        self.sync = SyncPolicy::Only(
            fields.iter().map(|(c, f)| ((*c).to_owned(), (*f).to_owned())).collect(),
        );
        self
    }

    /// Exclude this type from snapshots entirely.
    pub fn sync_none(mut self) -> Self {
        self.sync = SyncPolicy::None;
        self
    }

    /// Hook to run for each entity of this type after snapshot restore.
    pub fn with_on_restore(mut self, hook: impl Fn(&mut World, EntityId) + 'static) -> Self {
        self.on_restore = Some(Rc::new(hook));
        self
    }
}

/// A registered entity type with resolved component ids.
pub struct RegisteredEntityType {
    /// Type name.
    pub name: String,
    /// Interned type id (dense: also the index into the type table).
    pub type_id: u32,
    /// Component types attached at spawn, including the command component.
    pub components: Vec<ComponentTypeId>,
    /// Per-component default rows, parallel to `components`.
    pub default_rows: Vec<Vec<FieldValue>>,
    /// Declared input commands.
    pub commands: Vec<CommandDef>,
    /// The auto-registered command component, if commands were declared.
    pub command_component: Option<ComponentTypeId>,
    /// Sync policy for snapshots and hashing.
    pub sync: SyncPolicy,
    /// Restore hook.
    pub on_restore: Option<RestoreHook>,
}

/// Per-entity bookkeeping: its type and owning client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMeta {
    /// Index into the entity type table.
    pub type_id: u32,
    /// Owning client's interned id, if any.
    pub client: Option<u32>,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The replicated simulation state.
pub struct World {
    room_id: String,
    allocator: EntityAllocator,
    schemas: SchemaRegistry,
    storages: Vec<ComponentStorage>,
    strings: StringRegistry,
    rng: DeterministicRng,
    current_frame: u32,
    phase: Option<Phase>,
    entity_types: Vec<RegisteredEntityType>,
    meta: HashMap<EntityId, EntityMeta>,
    pending_destroy: Vec<EntityId>,
    /// Latest input per interned client id.
    inputs: HashMap<u32, serde_json::Value>,
    /// Process-wide body label counter, modeled as world state so that
    /// snapshot restore reproduces label assignment.
    body_label_counter: u32,
}

impl World {
    /// Create a world for the given room. The PRNG is seeded from the room
    /// id, so every peer in the room starts from the same state.
    pub fn new(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_owned(),
            allocator: EntityAllocator::new(),
            schemas: SchemaRegistry::new(),
            storages: Vec::new(),
            strings: StringRegistry::new(),
            rng: DeterministicRng::seed_from_label(room_id),
            current_frame: 0,
            phase: None,
            entity_types: Vec::new(),
            meta: HashMap::new(),
            pending_destroy: Vec::new(),
            inputs: HashMap::new(),
            body_label_counter: 0,
        }
    }

    /// The room this world belongs to.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    // -- registration -------------------------------------------------------

    /// Register a component schema.
    pub fn register_component(&mut self, schema: ComponentSchema) -> Result<ComponentTypeId, EcsError> {
        let name = schema.name.clone();
        let id = self.schemas.register(schema)?;
        self.storages.push(ComponentStorage::new(id, self.schemas.schema(id)));
        self.strings.intern(NS_COMPONENT, &name);
        Ok(id)
    }

    /// Register an entity type (prefab).
    ///
    /// Resolves component names, validates default overrides against the
    /// schemas, auto-registers a command component when commands are
    /// declared, and rejects `f32` fields from any sync mask.
    pub fn register_entity_type(&mut self, def: EntityTypeDef) -> Result<u32, EcsError> {
        if self.entity_types.iter().any(|t| t.name == def.name) {
            return Err(EcsError::DuplicateEntityType { name: def.name });
        }

        let mut components = Vec::with_capacity(def.components.len() + 1);
        for comp_name in &def.components {
            let id = self.schemas.lookup(comp_name).ok_or_else(|| EcsError::UnknownComponent {
                name: comp_name.clone(),
            })?;
            components.push(id);
        }

        // Materialize the command schema as a component whose columns are the
        // declared commands.
        let command_component = if def.commands.is_empty() {
            None
        } else {
            let mut fields = Vec::new();
            for cmd in &def.commands {
                match cmd.kind {
                    CommandKind::Button => {
                        fields.push(FieldDef::new(&cmd.name, FieldValue::U8(0)));
                    }
                    CommandKind::Vector => {
                        fields.push(FieldDef::new(&format!("{}_x", cmd.name), FieldValue::I32(0)));
                        fields.push(FieldDef::new(&format!("{}_y", cmd.name), FieldValue::I32(0)));
                    }
                }
            }
            let id = self.register_component(ComponentSchema::new(
                &format!("{}.commands", def.name),
                fields,
            ))?;
            components.push(id);
            Some(id)
        };

        // Build default rows with overrides applied.
        let mut default_rows = Vec::with_capacity(components.len());
        for &comp_id in &components {
            default_rows.push(self.schemas.schema(comp_id).default_row());
        }
        for (comp_name, field_name, value) in &def.overrides {
            let comp_id = self.schemas.lookup(comp_name).ok_or_else(|| EcsError::UnknownComponent {
                name: comp_name.clone(),
            })?;
            let position = components
                .iter()
                .position(|&c| c == comp_id)
                .ok_or_else(|| EcsError::ComponentMissing {
                    entity: EntityId::from_raw(0),
                    component: comp_name.clone(),
                })?;
            let schema = self.schemas.schema(comp_id);
            let field_idx = schema.field_index(field_name).ok_or_else(|| EcsError::UnknownField {
                component: comp_name.clone(),
                field: field_name.clone(),
            })?;
            let expected = schema.fields[field_idx].kind();
            if expected != value.kind() {
                return Err(EcsError::FieldKindMismatch {
                    component: comp_name.clone(),
                    field: field_name.clone(),
                    expected,
                    actual: value.kind(),
                });
            }
            default_rows[position][field_idx] = *value;
        }

        // A sync mask may only name integer fields.
        if let SyncPolicy::Only(fields) = &def.sync {
            for (comp_name, field_name) in fields {
                let comp_id = self.schemas.lookup(comp_name).ok_or_else(|| {
                    EcsError::UnknownComponent {
                        name: comp_name.clone(),
                    }
                })?;
                let schema = self.schemas.schema(comp_id);
                let field_idx = schema.field_index(field_name).ok_or_else(|| EcsError::UnknownField {
                    component: comp_name.clone(),
                    field: field_name.clone(),
                })?;
                if !schema.fields[field_idx].kind().is_deterministic() {
                    return Err(EcsError::SyncedFloatField {
                        component: comp_name.clone(),
                        field: field_name.clone(),
                    });
                }
            }
        }

        let type_id = self.strings.intern(NS_ENTITY_TYPE, &def.name);
        debug_assert_eq!(type_id as usize, self.entity_types.len());
        self.entity_types.push(RegisteredEntityType {
            name: def.name,
            type_id,
            components,
            default_rows,
            commands: def.commands,
            command_component,
            sync: def.sync,
            on_restore: def.on_restore,
        });
        Ok(type_id)
    }

    // -- spawn / destroy ----------------------------------------------------

    /// Spawn an entity of a registered type with optional field overrides.
    pub fn spawn(
        &mut self,
        type_name: &str,
        overrides: &[(&str, &str, FieldValue)],
    ) -> Result<EntityId, EcsError> {
        self.spawn_owned(type_name, None, overrides)
    }

    /// Spawn an entity owned by a client (its interned id).
    pub fn spawn_owned(
        &mut self,
        type_name: &str,
        client: Option<u32>,
        overrides: &[(&str, &str, FieldValue)],
    ) -> Result<EntityId, EcsError> {
        let type_idx = self
            .entity_types
            .iter()
            .position(|t| t.name == type_name)
            .ok_or_else(|| EcsError::UnknownEntityType {
                name: type_name.to_owned(),
            })?;
        let entity = self.allocator.allocate()?;
        self.attach_prefab(entity, type_idx as u32, client)?;
        for &(comp, field, value) in overrides {
            self.set_field(entity, comp, field, value)?;
        }
        Ok(entity)
    }

    /// Spawn with an exact id, used by snapshot restore and delta apply.
    /// The allocator must already consider `entity` alive.
    pub(crate) fn attach_prefab(
        &mut self,
        entity: EntityId,
        type_id: u32,
        client: Option<u32>,
    ) -> Result<(), EcsError> {
        let ty = &self.entity_types[type_id as usize];
        let rows: Vec<(ComponentTypeId, Vec<FieldValue>)> = ty
            .components
            .iter()
            .copied()
            .zip(ty.default_rows.iter().cloned())
            .collect();
        for (comp_id, row) in rows {
            self.storages[comp_id.index()].add(entity, &row)?;
        }
        self.meta.insert(entity, EntityMeta { type_id, client });
        Ok(())
    }

    /// Create an entity with an exact id, as dictated by an authoritative
    /// create record. The allocator is forced to the id's generation and the
    /// type's prefab components are attached.
    pub fn spawn_exact(
        &mut self,
        entity: EntityId,
        type_id: u32,
        client: Option<u32>,
    ) -> Result<(), EcsError> {
        if type_id as usize >= self.entity_types.len() {
            return Err(EcsError::UnknownEntityType {
                name: format!("#{type_id}"),
            });
        }
        self.allocator.materialize(entity)?;
        self.attach_prefab(entity, type_id, client)
    }

    /// Queue `entity` for destruction at the end of the current phase.
    ///
    /// Deferred so that in-phase iteration is never invalidated. Outside a
    /// phase (setup code, tests) the destruction still waits for the next
    /// [`flush_destroyed`](Self::flush_destroyed).
    pub fn destroy(&mut self, entity: EntityId) {
        if self.allocator.is_valid(entity) {
            self.pending_destroy.push(entity);
        }
    }

    /// Apply queued destructions. Called by the scheduler at phase end.
    pub fn flush_destroyed(&mut self) {
        let pending = std::mem::take(&mut self.pending_destroy);
        for entity in pending {
            // A double-destroy within one phase leaves a stale entry behind;
            // skip it silently.
            if self.allocator.is_valid(entity) {
                self.destroy_immediate(entity);
            }
        }
        self.canonicalize_storages();
    }

    /// Destroy without deferral. For restore and delta application, which
    /// run between ticks where no iteration can be invalidated.
    pub fn despawn_now(&mut self, entity: EntityId) {
        self.destroy_immediate(entity);
        self.canonicalize_storages();
    }

    /// Destroy without deferral. Used by restore and delta application,
    /// which run between ticks.
    pub(crate) fn destroy_immediate(&mut self, entity: EntityId) {
        if let Some(meta) = self.meta.remove(&entity) {
            let ty = &self.entity_types[meta.type_id as usize];
            for comp_id in ty.components.clone() {
                let _ = self.storages[comp_id.index()].remove(entity);
            }
        }
        let _ = self.allocator.free(entity);
    }

    /// Remove every entity, leaving registrations intact. Restore path.
    pub(crate) fn clear_entities(&mut self) {
        for storage in &mut self.storages {
            storage.clear();
        }
        self.meta.clear();
        self.pending_destroy.clear();
        self.allocator = EntityAllocator::new();
    }

    // -- entity queries -----------------------------------------------------

    /// Whether `entity` is currently alive.
    pub fn is_valid(&self, entity: EntityId) -> bool {
        self.allocator.is_valid(entity)
    }

    /// Number of alive entities.
    pub fn entity_count(&self) -> usize {
        self.meta.len()
    }

    /// All alive entities, ascending by id. This is the canonical entity
    /// order used by snapshots, hashing, and deltas.
    pub fn entities_sorted(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.meta.keys().copied().collect();
        ids.sort();
        ids
    }

    /// The meta record (type, owner) for an entity.
    pub fn entity_meta(&self, entity: EntityId) -> Option<EntityMeta> {
        self.meta.get(&entity).copied()
    }

    /// The type name of an entity.
    pub fn entity_type_name(&self, entity: EntityId) -> Option<&str> {
        self.meta
            .get(&entity)
            .map(|m| self.entity_types[m.type_id as usize].name.as_str())
    }

    /// All alive entities owned by `client`, ascending by id.
    pub fn entities_of_client(&self, client: u32) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .meta
            .iter()
            .filter(|(_, m)| m.client == Some(client))
            .map(|(&e, _)| e)
            .collect();
        ids.sort();
        ids
    }

    // -- field access -------------------------------------------------------

    /// Read a field by component and field name.
    pub fn field(&self, entity: EntityId, component: &str, field: &str) -> Option<FieldValue> {
        let comp_id = self.schemas.lookup(component)?;
        let field_idx = self.schemas.schema(comp_id).field_index(field)?;
        self.storages[comp_id.index()].value(entity, field_idx)
    }

    /// Write a field by component and field name.
    pub fn set_field(
        &mut self,
        entity: EntityId,
        component: &str,
        field: &str,
        value: FieldValue,
    ) -> Result<(), EcsError> {
        let comp_id = self.schemas.lookup(component).ok_or_else(|| EcsError::UnknownComponent {
            name: component.to_owned(),
        })?;
        let field_idx = self
            .schemas
            .schema(comp_id)
            .field_index(field)
            .ok_or_else(|| EcsError::UnknownField {
                component: component.to_owned(),
                field: field.to_owned(),
            })?;
        self.storages[comp_id.index()].set_value(entity, field_idx, value)
    }

    /// A registered component type id by name.
    pub fn component_id(&self, name: &str) -> Option<ComponentTypeId> {
        self.schemas.lookup(name)
    }

    /// Storage for a component type.
    pub fn storage(&self, id: ComponentTypeId) -> &ComponentStorage {
        &self.storages[id.index()]
    }

    /// Mutable storage for a component type.
    pub fn storage_mut(&mut self, id: ComponentTypeId) -> &mut ComponentStorage {
        &mut self.storages[id.index()]
    }

    /// The schema registry.
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// All registered entity types, densely indexed by type id.
    pub fn entity_types(&self) -> &[RegisteredEntityType] {
        &self.entity_types
    }

    /// A registered entity type by name.
    pub fn entity_type(&self, name: &str) -> Option<&RegisteredEntityType> {
        self.entity_types.iter().find(|t| t.name == name)
    }

    // -- phases & determinism gates -----------------------------------------

    /// Called by the scheduler when a phase starts.
    pub fn begin_phase(&mut self, phase: Phase) {
        self.phase = Some(phase);
    }

    /// Called by the scheduler when a phase ends.
    pub fn end_phase(&mut self) {
        self.phase = None;
    }

    /// The currently running phase, if any.
    pub fn current_phase(&self) -> Option<Phase> {
        self.phase
    }

    /// The seeded PRNG.
    ///
    /// Only the `update` and `physics` phases may advance it; drawing
    /// randomness anywhere else would desync peers whose render cadence
    /// differs, so this is checked in debug builds.
    pub fn rng(&mut self) -> &mut DeterministicRng {
        debug_assert!(
            matches!(self.phase, None | Some(Phase::Update) | Some(Phase::Physics)),
            "PRNG advanced outside update/physics (phase {:?})",
            self.phase
        );
        &mut self.rng
    }

    /// The PRNG state for snapshots.
    pub fn rng_state(&self) -> (u32, u32) {
        self.rng.state()
    }

    /// Restore the PRNG state.
    pub fn restore_rng(&mut self, state: (u32, u32)) {
        self.rng.restore(state);
    }

    /// Re-canonicalize every component storage. Called by the scheduler
    /// after each mutation batch; cheap when nothing is disordered.
    pub fn canonicalize_storages(&mut self) {
        for storage in &mut self.storages {
            storage.canonicalize();
        }
    }

    // -- frame --------------------------------------------------------------

    /// The current simulation frame.
    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    /// Set the frame counter (restore and catchup paths).
    pub fn set_frame(&mut self, frame: u32) {
        self.current_frame = frame;
    }

    /// Advance the frame counter by one.
    pub fn advance_frame(&mut self) {
        self.current_frame += 1;
    }

    // -- input registry & commands ------------------------------------------

    /// Intern a client id string.
    pub fn intern_client(&mut self, client: &str) -> u32 {
        self.strings.intern(NS_CLIENT, client)
    }

    /// Record a client's latest input and apply it to the command components
    /// of the entities that client owns.
    ///
    /// Commands present in the payload set their columns; absent commands
    /// reset to zero, so a payload is always the complete command state.
    pub fn apply_client_input(&mut self, client: u32, input: &serde_json::Value) {
        self.inputs.insert(client, input.clone());
        let entities = self.entities_of_client(client);
        for entity in entities {
            let Some(meta) = self.meta.get(&entity) else { continue };
            let ty = &self.entity_types[meta.type_id as usize];
            let Some(comp_id) = ty.command_component else { continue };
            let commands = ty.commands.clone();
            for cmd in commands {
                match cmd.kind {
                    CommandKind::Button => {
                        let pressed = input
                            .get(&cmd.name)
                            .and_then(serde_json::Value::as_bool)
                            .unwrap_or(false);
                        let field = self
                            .schemas
                            .schema(comp_id)
                            .field_index(&cmd.name)
                            .expect("command field registered at type registration");
                        let _ = self.storages[comp_id.index()].set_value(
                            entity,
                            field,
                            FieldValue::U8(u8::from(pressed)),
                        );
                    }
                    CommandKind::Vector => {
                        let (x, y) = input
                            .get(&cmd.name)
                            .map(|v| {
                                let x = v.get("x").and_then(serde_json::Value::as_i64).unwrap_or(0);
                                let y = v.get("y").and_then(serde_json::Value::as_i64).unwrap_or(0);
                                (x as i32, y as i32)
                            })
                            .unwrap_or((0, 0));
                        let schema = self.schemas.schema(comp_id);
                        let fx = schema
                            .field_index(&format!("{}_x", cmd.name))
                            .expect("command field registered at type registration");
                        let fy = schema
                            .field_index(&format!("{}_y", cmd.name))
                            .expect("command field registered at type registration");
                        let _ = self.storages[comp_id.index()].set_value(entity, fx, FieldValue::I32(x));
                        let _ = self.storages[comp_id.index()].set_value(entity, fy, FieldValue::I32(y));
                    }
                }
            }
        }
    }

    /// The latest input recorded for a client.
    pub fn client_input(&self, client: u32) -> Option<&serde_json::Value> {
        self.inputs.get(&client)
    }

    /// Whether a command button is currently pressed for an entity.
    pub fn command_button(&self, entity: EntityId, command: &str) -> bool {
        let Some(meta) = self.meta.get(&entity) else { return false };
        let ty = &self.entity_types[meta.type_id as usize];
        let Some(comp_id) = ty.command_component else { return false };
        let Some(field) = self.schemas.schema(comp_id).field_index(command) else {
            return false;
        };
        matches!(
            self.storages[comp_id.index()].value(entity, field),
            Some(FieldValue::U8(v)) if v != 0
        )
    }

    /// The current vector command value for an entity, as fixed-point.
    pub fn command_vector(&self, entity: EntityId, command: &str) -> (Fixed, Fixed) {
        let zero = (Fixed::ZERO, Fixed::ZERO);
        let Some(meta) = self.meta.get(&entity) else { return zero };
        let ty = &self.entity_types[meta.type_id as usize];
        let Some(comp_id) = ty.command_component else { return zero };
        let schema = self.schemas.schema(comp_id);
        let (Some(fx), Some(fy)) = (
            schema.field_index(&format!("{command}_x")),
            schema.field_index(&format!("{command}_y")),
        ) else {
            return zero;
        };
        let storage = &self.storages[comp_id.index()];
        match (storage.value(entity, fx), storage.value(entity, fy)) {
            (Some(FieldValue::I32(x)), Some(FieldValue::I32(y))) => {
                (Fixed::from_raw(x), Fixed::from_raw(y))
            }
            _ => zero,
        }
    }

    // -- counters & registries ----------------------------------------------

    /// Allocate the next body label. Part of world state so that restore
    /// reproduces label assignment.
    pub fn next_body_label(&mut self) -> u32 {
        let label = self.body_label_counter;
        self.body_label_counter += 1;
        label
    }

    /// Current body label counter value, for snapshots.
    pub fn body_label_counter(&self) -> u32 {
        self.body_label_counter
    }

    /// Restore the body label counter.
    pub fn set_body_label_counter(&mut self, value: u32) {
        self.body_label_counter = value;
    }

    /// The string registry.
    pub fn strings(&self) -> &StringRegistry {
        &self.strings
    }

    /// Mutable access to the string registry.
    pub fn strings_mut(&mut self) -> &mut StringRegistry {
        &mut self.strings
    }

    /// Allocator state for snapshots.
    pub fn allocator_state(&self) -> AllocatorState {
        self.allocator.state()
    }

    /// Restore allocator state.
    pub fn restore_allocator(&mut self, state: &AllocatorState) {
        self.allocator.restore(state);
    }

    /// String registry state for snapshots.
    pub fn strings_state(&self) -> StringRegistryState {
        self.strings.state()
    }

    /// Restore string registry state.
    pub fn restore_strings(&mut self, state: &StringRegistryState) {
        self.strings.restore(state);
    }

    /// The registered type of an entity. Helper for snapshot/hash code.
    pub(crate) fn type_of(&self, entity: EntityId) -> Option<&RegisteredEntityType> {
        self.meta
            .get(&entity)
            .map(|m| &self.entity_types[m.type_id as usize])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_world() -> World {
        let mut world = World::new("world-test");
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
                EntityTypeDef::new("food")
                    .with_component("position")
                    .with_default("position", "x", FieldValue::I32(5)),
            )
            .unwrap();
        world
            .register_entity_type(
                EntityTypeDef::new("player")
                    .with_component("position")
                    .with_component("health")
                    .with_command("fire", CommandKind::Button)
                    .with_command("move", CommandKind::Vector),
            )
            .unwrap();
        world
    }

    #[test]
    fn spawn_applies_prefab_defaults_and_overrides() {
        let mut world = setup_world();
        let e = world.spawn("food", &[("position", "y", FieldValue::I32(9))]).unwrap();
        assert_eq!(world.field(e, "position", "x"), Some(FieldValue::I32(5)));
        assert_eq!(world.field(e, "position", "y"), Some(FieldValue::I32(9)));
        assert_eq!(world.entity_type_name(e), Some("food"));
    }

    #[test]
    fn spawn_unknown_type_is_error() {
        let mut world = setup_world();
        assert!(matches!(
            world.spawn("ghost", &[]),
            Err(EcsError::UnknownEntityType { .. })
        ));
    }

    #[test]
    fn destroy_is_deferred_until_flush() {
        let mut world = setup_world();
        let e = world.spawn("food", &[]).unwrap();
        world.destroy(e);
        assert!(world.is_valid(e));
        world.flush_destroyed();
        assert!(!world.is_valid(e));
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.field(e, "position", "x"), None);
    }

    #[test]
    fn double_destroy_in_one_batch_is_harmless() {
        let mut world = setup_world();
        let e = world.spawn("food", &[]).unwrap();
        world.destroy(e);
        world.destroy(e);
        world.flush_destroyed();
        assert!(!world.is_valid(e));
    }

    #[test]
    fn entities_sorted_is_ascending() {
        let mut world = setup_world();
        let mut spawned: Vec<EntityId> = (0..5).map(|_| world.spawn("food", &[]).unwrap()).collect();
        world.destroy(spawned[2]);
        world.flush_destroyed();
        spawned.remove(2);
        assert_eq!(world.entities_sorted(), spawned);
    }

    #[test]
    fn id_recycling_is_deterministic_across_worlds() {
        let run = || {
            let mut world = setup_world();
            let ids: Vec<EntityId> = (0..6).map(|_| world.spawn("food", &[]).unwrap()).collect();
            world.destroy(ids[1]);
            world.destroy(ids[4]);
            world.flush_destroyed();
            let a = world.spawn("food", &[]).unwrap();
            let b = world.spawn("food", &[]).unwrap();
            (a, b)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn commands_materialize_as_component_columns() {
        let mut world = setup_world();
        let client = world.intern_client("alice");
        let e = world.spawn_owned("player", Some(client), &[]).unwrap();

        assert!(!world.command_button(e, "fire"));

        world.apply_client_input(
            client,
            &serde_json::json!({"fire": true, "move": {"x": 65536, "y": -65536}}),
        );
        assert!(world.command_button(e, "fire"));
        let (mx, my) = world.command_vector(e, "move");
        assert_eq!(mx, Fixed::ONE);
        assert_eq!(my, -Fixed::ONE);

        // Absent commands reset: a payload is the complete command state.
        world.apply_client_input(client, &serde_json::json!({}));
        assert!(!world.command_button(e, "fire"));
        assert_eq!(world.command_vector(e, "move"), (Fixed::ZERO, Fixed::ZERO));
    }

    #[test]
    fn input_only_reaches_owned_entities() {
        let mut world = setup_world();
        let alice = world.intern_client("alice");
        let bob = world.intern_client("bob");
        let ea = world.spawn_owned("player", Some(alice), &[]).unwrap();
        let eb = world.spawn_owned("player", Some(bob), &[]).unwrap();

        world.apply_client_input(alice, &serde_json::json!({"fire": true}));
        assert!(world.command_button(ea, "fire"));
        assert!(!world.command_button(eb, "fire"));
    }

    #[test]
    fn sync_mask_rejects_float_fields() {
        let mut world = World::new("sync-test");
        world
            .register_component(ComponentSchema::new(
                "sprite",
                vec![FieldDef::new("tint", FieldValue::F32(1.0))],
            ))
            .unwrap();
        let result = world.register_entity_type(
            EntityTypeDef::new("fx")
                .with_component("sprite")
                .sync_only(&[("sprite", "tint")]),
        );
        assert!(matches!(result, Err(EcsError::SyncedFloatField { .. })));
    }

    #[test]
    fn body_label_counter_is_world_state() {
        let mut world = setup_world();
        assert_eq!(world.next_body_label(), 0);
        assert_eq!(world.next_body_label(), 1);
        world.set_body_label_counter(0);
        assert_eq!(world.next_body_label(), 0);
    }

    #[test]
    fn rng_is_seeded_from_room_id() {
        let a = World::new("room-1").rng_state();
        let b = World::new("room-1").rng_state();
        let c = World::new("room-2").rng_state();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn duplicate_entity_type_rejected() {
        let mut world = setup_world();
        assert!(matches!(
            world.register_entity_type(EntityTypeDef::new("food")),
            Err(EcsError::DuplicateEntityType { .. })
        ));
    }
}
