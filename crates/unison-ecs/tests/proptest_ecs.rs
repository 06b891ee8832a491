//! Property-based tests for the allocator and storage invariants.

use proptest::prelude::*;

use unison_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Allocator properties
// ---------------------------------------------------------------------------

/// An operation on the allocator: allocate, or free the nth live entity.
#[derive(Debug, Clone)]
enum AllocOp {
    Allocate,
    FreeNth(usize),
}

fn alloc_ops() -> impl Strategy<Value = Vec<AllocOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(AllocOp::Allocate),
            2 => (0usize..64).prop_map(AllocOp::FreeNth),
        ],
        1..200,
    )
}

proptest! {
    /// After any interleaving of allocate/free, the free list is sorted
    /// ascending and allocation returns the minimum available index.
    #[test]
    fn free_list_sorted_and_min_index_allocation(ops in alloc_ops()) {
        let mut alloc = EntityAllocator::new();
        let mut live: Vec<EntityId> = Vec::new();

        for op in ops {
            match op {
                AllocOp::Allocate => {
                    let id = alloc.allocate().unwrap();
                    live.push(id);
                }
                AllocOp::FreeNth(n) => {
                    if !live.is_empty() {
                        let id = live.remove(n % live.len());
                        alloc.free(id).unwrap();
                    }
                }
            }

            let state = alloc.state();
            prop_assert!(
                state.free.windows(2).all(|w| w[0] < w[1]),
                "free list not sorted: {:?}",
                state.free
            );
        }

        // The next allocation takes the smallest free index, or the
        // high-water mark if nothing is free.
        let state = alloc.state();
        let expected_index = state.free.first().copied().unwrap_or(alloc.high_water_mark());
        prop_assert_eq!(alloc.allocate().unwrap().index(), expected_index);
    }

    /// Restoring allocator state replays the identical allocation sequence.
    #[test]
    fn allocator_restore_is_exact(ops in alloc_ops()) {
        let mut a = EntityAllocator::new();
        let mut live: Vec<EntityId> = Vec::new();
        for op in ops {
            match op {
                AllocOp::Allocate => live.push(a.allocate().unwrap()),
                AllocOp::FreeNth(n) => {
                    if !live.is_empty() {
                        let id = live.remove(n % live.len());
                        a.free(id).unwrap();
                    }
                }
            }
        }

        let mut b = EntityAllocator::new();
        b.restore(&a.state());
        for _ in 0..32 {
            prop_assert_eq!(a.allocate().unwrap(), b.allocate().unwrap());
        }
    }
}

// ---------------------------------------------------------------------------
// World / storage properties
// ---------------------------------------------------------------------------

fn setup_world() -> World {
    let mut world = World::new("prop-test");
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
        .register_entity_type(EntityTypeDef::new("thing").with_component("position"))
        .unwrap();
    world
}

proptest! {
    /// After any spawn/destroy interleaving, component iteration is strictly
    /// ascending by entity id and the reverse map agrees with the rows.
    #[test]
    fn iteration_stays_canonical(ops in prop::collection::vec(prop_oneof![
        3 => (any::<i32>()).prop_map(Some),
        1 => Just(None),
    ], 1..100)) {
        let mut world = setup_world();
        let mut live: Vec<EntityId> = Vec::new();

        for (i, op) in ops.into_iter().enumerate() {
            match op {
                Some(x) => {
                    let e = world.spawn("thing", &[("position", "x", FieldValue::I32(x))]).unwrap();
                    live.push(e);
                }
                None => {
                    if !live.is_empty() {
                        let e = live.remove(i % live.len());
                        world.destroy(e);
                        world.flush_destroyed();
                    }
                }
            }
        }

        let comp = world.component_id("position").unwrap();
        let storage = world.storage(comp);
        let ids: Vec<EntityId> = storage.iter().map(|(e, _)| e).collect();
        prop_assert!(ids.windows(2).all(|w| w[0] < w[1]), "iteration not ascending");
        for (e, row) in storage.iter() {
            prop_assert_eq!(storage.row_of(e), Some(row));
        }
        prop_assert_eq!(ids.len(), world.entity_count());
    }

    /// Snapshot round-trip preserves every field value and the allocator.
    #[test]
    fn snapshot_roundtrip(values in prop::collection::vec((any::<i32>(), any::<i32>()), 1..40)) {
        let mut world = setup_world();
        for &(x, y) in &values {
            world.spawn("thing", &[
                ("position", "x", FieldValue::I32(x)),
                ("position", "y", FieldValue::I32(y)),
            ]).unwrap();
        }

        let snap = capture_snapshot(&world, 9, true);
        let mut restored = setup_world();
        restore_snapshot(&mut restored, &snap).unwrap();

        prop_assert_eq!(world.entities_sorted(), restored.entities_sorted());
        for e in world.entities_sorted() {
            prop_assert_eq!(world.field(e, "position", "x"), restored.field(e, "position", "x"));
            prop_assert_eq!(world.field(e, "position", "y"), restored.field(e, "position", "y"));
        }
        prop_assert_eq!(state_hash(&world, 9), state_hash(&restored, 9));
    }
}
