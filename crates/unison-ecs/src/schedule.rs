//! Fixed-phase system scheduler.
//!
//! Phases run in the order declared by [`Phase::ALL`]; within a phase,
//! systems run ordered by `(order, registration_index)`. Systems marked
//! `client_only` are presentation-side: they are skipped on headless peers
//! and during rollback resimulation, which is what makes a resimulated frame
//! bit-identical to the original simulation of that frame.
//!
//! A system is a plain synchronous closure over the world. The signature
//! returns `()` -- there is no pending-work token to return and no way to
//! suspend, so the "systems must never await" contract of the engine is
//! enforced by construction.
//!
//! After each system call the scheduler re-canonicalizes component storage
//! and at the end of each phase it applies deferred entity destruction, so
//! iteration order within a system is never invalidated and iteration order
//! between systems is always ascending by entity id.

use crate::world::World;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The fixed simulation phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Input application.
    Input,
    /// Game logic. PRNG draws are permitted here.
    Update,
    /// Pre-physics adjustments.
    PrePhysics,
    /// Physics integration and collision dispatch. PRNG draws are permitted
    /// here.
    Physics,
    /// Post-physics reactions.
    PostPhysics,
    /// Presentation. Never runs during resimulation and never mutates
    /// deterministic state.
    Render,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 6] = [
        Phase::Input,
        Phase::Update,
        Phase::PrePhysics,
        Phase::Physics,
        Phase::PostPhysics,
        Phase::Render,
    ];

    /// The phases that advance simulation state (everything but `Render`).
    pub const SIMULATION: [Phase; 5] = [
        Phase::Input,
        Phase::Update,
        Phase::PrePhysics,
        Phase::Physics,
        Phase::PostPhysics,
    ];
}

// ---------------------------------------------------------------------------
// SystemDesc / registration
// ---------------------------------------------------------------------------

/// Registration descriptor for a system.
#[derive(Debug, Clone)]
pub struct SystemDesc {
    /// Name for logging and duplicate detection.
    pub name: String,
    /// The phase this system runs in.
    pub phase: Phase,
    /// Order within the phase; ties break by registration index.
    pub order: i32,
    /// Presentation-side system: skipped when headless or resimulating.
    pub client_only: bool,
}

impl SystemDesc {
    /// A simulation system with order 0.
    pub fn new(name: &str, phase: Phase) -> Self {
        Self {
            name: name.to_owned(),
            phase,
            order: 0,
            client_only: false,
        }
    }

    /// Set the within-phase order.
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Mark the system client-only.
    pub fn client_only(mut self) -> Self {
        self.client_only = true;
        self
    }
}

/// A system function. Synchronous; all effects go through the world.
pub type SystemFn = Box<dyn FnMut(&mut World)>;

struct RegisteredSystem {
    desc: SystemDesc,
    registration_index: usize,
    func: SystemFn,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns the registered systems and drives one frame of phases.
///
/// The scheduler lives beside the [`World`] rather than inside it so that a
/// system can receive `&mut World` while the scheduler iterates its own
/// list; the world stays plain data and snapshots never have to reason about
/// closures.
#[derive(Default)]
pub struct Scheduler {
    systems: Vec<RegisteredSystem>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system.
    ///
    /// # Panics
    ///
    /// Panics if a system with the same name is already registered.
    /// Registration happens at startup, before any tick; a duplicate is a
    /// programming error, not a runtime condition.
    pub fn add_system(&mut self, desc: SystemDesc, func: impl FnMut(&mut World) + 'static) {
        assert!(
            !self.systems.iter().any(|s| s.desc.name == desc.name),
            "duplicate system name: {:?}",
            desc.name
        );
        let registration_index = self.systems.len();
        self.systems.push(RegisteredSystem {
            desc,
            registration_index,
            func: Box::new(func),
        });
    }

    /// Number of registered systems.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Whether no systems are registered.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Names of systems in a phase, in execution order.
    pub fn phase_order(&self, phase: Phase) -> Vec<&str> {
        let mut idx = self.phase_indices(phase);
        idx.sort_by_key(|&i| (self.systems[i].desc.order, self.systems[i].registration_index));
        idx.iter().map(|&i| self.systems[i].desc.name.as_str()).collect()
    }

    fn phase_indices(&self, phase: Phase) -> Vec<usize> {
        (0..self.systems.len())
            .filter(|&i| self.systems[i].desc.phase == phase)
            .collect()
    }

    /// Run one phase against the world.
    ///
    /// `skip_client_only` is set on headless peers and during resimulation.
    /// Deferred destruction is flushed at the end of the phase.
    pub fn run_phase(&mut self, world: &mut World, phase: Phase, skip_client_only: bool) {
        let mut idx = self.phase_indices(phase);
        idx.sort_by_key(|&i| (self.systems[i].desc.order, self.systems[i].registration_index));

        world.begin_phase(phase);
        for i in idx {
            let system = &mut self.systems[i];
            if skip_client_only && system.desc.client_only {
                continue;
            }
            (system.func)(world);
            // Each system call is one mutation batch; restore the canonical
            // iteration order before the next system observes the world.
            world.canonicalize_storages();
        }
        world.flush_destroyed();
        world.end_phase();
    }

    /// Run all simulation phases for one frame (everything except `Render`).
    pub fn run_simulation_phases(&mut self, world: &mut World, skip_client_only: bool) {
        for phase in Phase::SIMULATION {
            self.run_phase(world, phase, skip_client_only);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ComponentSchema, FieldDef, FieldValue};
    use crate::world::EntityTypeDef;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup_world() -> World {
        let mut world = World::new("sched-test");
        world
            .register_component(ComponentSchema::new(
                "counter",
                vec![FieldDef::new("value", FieldValue::I32(0))],
            ))
            .unwrap();
        world
            .register_entity_type(EntityTypeDef::new("thing").with_component("counter"))
            .unwrap();
        world
    }

    #[test]
    fn systems_run_in_order_and_registration_breaks_ties() {
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let mut sched = Scheduler::new();

        let l = log.clone();
        sched.add_system(SystemDesc::new("late", Phase::Update).with_order(10), move |_| {
            l.borrow_mut().push("late");
        });
        let l = log.clone();
        sched.add_system(SystemDesc::new("first", Phase::Update).with_order(-1), move |_| {
            l.borrow_mut().push("first");
        });
        let l = log.clone();
        sched.add_system(SystemDesc::new("tie-a", Phase::Update), move |_| {
            l.borrow_mut().push("tie-a");
        });
        let l = log.clone();
        sched.add_system(SystemDesc::new("tie-b", Phase::Update), move |_| {
            l.borrow_mut().push("tie-b");
        });

        let mut world = setup_world();
        sched.run_phase(&mut world, Phase::Update, false);

        assert_eq!(*log.borrow(), vec!["first", "tie-a", "tie-b", "late"]);
    }

    #[test]
    fn client_only_skipped_when_requested() {
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let mut sched = Scheduler::new();

        let l = log.clone();
        sched.add_system(SystemDesc::new("sim", Phase::Update), move |_| {
            l.borrow_mut().push("sim");
        });
        let l = log.clone();
        sched.add_system(
            SystemDesc::new("hud", Phase::Update).client_only(),
            move |_| {
                l.borrow_mut().push("hud");
            },
        );

        let mut world = setup_world();
        sched.run_phase(&mut world, Phase::Update, true);
        assert_eq!(*log.borrow(), vec!["sim"]);

        log.borrow_mut().clear();
        sched.run_phase(&mut world, Phase::Update, false);
        assert_eq!(*log.borrow(), vec!["sim", "hud"]);
    }

    #[test]
    #[should_panic(expected = "duplicate system name")]
    fn duplicate_system_name_panics() {
        let mut sched = Scheduler::new();
        sched.add_system(SystemDesc::new("movement", Phase::Update), |_| {});
        sched.add_system(SystemDesc::new("movement", Phase::Update), |_| {});
    }

    #[test]
    fn deferred_destroy_applies_at_phase_end() {
        let mut world = setup_world();
        let e = world.spawn("thing", &[]).unwrap();

        let mut sched = Scheduler::new();
        sched.add_system(SystemDesc::new("reaper", Phase::Update), move |w: &mut World| {
            w.destroy(e);
            // Still alive inside the phase: destruction is deferred.
            assert!(w.is_valid(e));
        });

        sched.run_phase(&mut world, Phase::Update, false);
        assert!(!world.is_valid(e));
    }

    #[test]
    fn phase_order_lists_execution_order() {
        let mut sched = Scheduler::new();
        sched.add_system(SystemDesc::new("b", Phase::Physics).with_order(1), |_| {});
        sched.add_system(SystemDesc::new("a", Phase::Physics), |_| {});
        assert_eq!(sched.phase_order(Phase::Physics), vec!["a", "b"]);
        assert!(sched.phase_order(Phase::Render).is_empty());
    }

    #[test]
    fn simulation_phases_exclude_render() {
        let log: Rc<RefCell<Vec<Phase>>> = Rc::new(RefCell::new(Vec::new()));
        let mut sched = Scheduler::new();
        for phase in Phase::ALL {
            let l = log.clone();
            sched.add_system(SystemDesc::new(&format!("{phase:?}"), phase), move |_| {
                l.borrow_mut().push(phase);
            });
        }

        let mut world = setup_world();
        sched.run_simulation_phases(&mut world, false);

        assert_eq!(*log.borrow(), Phase::SIMULATION.to_vec());
    }
}
