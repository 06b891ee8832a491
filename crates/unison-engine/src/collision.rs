//! Ordered collision dispatch.
//!
//! The physics phase produces candidate body pairs; this module dispatches
//! them to handlers registered by `(entity type, entity type)` name. Two
//! rules make dispatch deterministic:
//!
//! * pairs are visited in canonical order -- each pair is normalized so the
//!   smaller body label (derived from the entity id) comes first, and the
//!   pair list is sorted by those labels;
//! * handler arguments bind in registration order -- a handler registered
//!   for `("ball", "wall")` always receives the ball first, whichever order
//!   the candidate pair arrived in.
//!
//! Handlers are keyed by type *name*, never object identity, so after a
//! snapshot restore they re-bind by name with nothing to rebuild.

use std::collections::HashMap;
use std::rc::Rc;

use unison_ecs::entity::EntityId;
use unison_ecs::world::World;

/// A collision handler: `(world, a, b)` with `a` of the first registered
/// type and `b` of the second.
pub type CollisionHandler = Rc<dyn Fn(&mut World, EntityId, EntityId)>;

// ---------------------------------------------------------------------------
// CollisionRegistry
// ---------------------------------------------------------------------------

/// Handler table keyed by `(type name, type name)`.
#[derive(Default)]
pub struct CollisionRegistry {
    handlers: HashMap<(String, String), CollisionHandler>,
}

impl CollisionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for collisions between `type_a` and `type_b`.
    /// The handler's first argument is always the `type_a` entity.
    ///
    /// Registering the same ordered pair twice replaces the handler.
    pub fn register(
        &mut self,
        type_a: &str,
        type_b: &str,
        handler: impl Fn(&mut World, EntityId, EntityId) + 'static,
    ) {
        self.handlers
            .insert((type_a.to_owned(), type_b.to_owned()), Rc::new(handler));
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch a set of candidate pairs.
    ///
    /// Pairs are normalized (smaller body label first), sorted, and
    /// deduplicated, then each is looked up in the handler table: first as
    /// `(type(a), type(b))`, then reversed with swapped arguments. Pairs
    /// with no handler, or with a dead endpoint by dispatch time, are
    /// skipped.
    pub fn dispatch(&self, world: &mut World, candidates: &[(EntityId, EntityId)]) {
        let mut pairs: Vec<(EntityId, EntityId)> = candidates
            .iter()
            .map(|&(a, b)| if a.raw() <= b.raw() { (a, b) } else { (b, a) })
            .collect();
        pairs.sort_by_key(|&(a, b)| (a.raw(), b.raw()));
        pairs.dedup();

        for (a, b) in pairs {
            // A handler queued a destroy? Deferred destruction keeps both
            // alive until phase end, but a restore in between ticks could
            // not; be safe.
            if !world.is_valid(a) || !world.is_valid(b) {
                continue;
            }
            let (Some(type_a), Some(type_b)) = (
                world.entity_type_name(a).map(str::to_owned),
                world.entity_type_name(b).map(str::to_owned),
            ) else {
                continue;
            };

            if let Some(handler) = self.handlers.get(&(type_a.clone(), type_b.clone())) {
                let handler = handler.clone();
                handler(world, a, b);
            } else if let Some(handler) = self.handlers.get(&(type_b, type_a)) {
                let handler = handler.clone();
                // Bind arguments in the order the pair was registered.
                handler(world, b, a);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
