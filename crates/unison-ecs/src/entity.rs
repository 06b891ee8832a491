//! Entity identifiers and deterministic allocation.
//!
//! An [`EntityId`] is a 32-bit handle packing a 12-bit *generation* in the
//! high bits and a 20-bit *index* in the low bits. The generation is bumped
//! (wrapping at 4096) every time an index is recycled, so stale handles are
//! detected immediately.
//!
//! Recycling is deterministic: the free list is kept sorted ascending and
//! [`EntityAllocator::allocate`] always hands out the smallest free index.
//! Two peers that perform the same spawn/destroy sequence therefore assign
//! identical ids, and a peer restored from a snapshot continues allocating
//! exactly as the snapshotted peer would have.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EcsError;

/// Number of index bits in an entity id.
pub const INDEX_BITS: u32 = 20;
/// Number of generation bits in an entity id.
pub const GENERATION_BITS: u32 = 12;
/// Maximum number of simultaneously addressable entity indices.
pub const MAX_ENTITIES: u32 = 1 << INDEX_BITS;

const INDEX_MASK: u32 = MAX_ENTITIES - 1;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A generational entity identifier.
///
/// Layout: `[generation: 12 bits | index: 20 bits]`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(u32);

impl EntityId {
    /// Construct an `EntityId` from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u16) -> Self {
        debug_assert!(index < MAX_ENTITIES, "index out of range");
        Self((u32::from(generation) & GENERATION_MASK) << INDEX_BITS | (index & INDEX_MASK))
    }

    /// The index portion (low 20 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// The generation portion (high 12 bits).
    #[inline]
    pub fn generation(self) -> u16 {
        ((self.0 >> INDEX_BITS) & GENERATION_MASK) as u16
    }

    /// Raw `u32` representation. This is the value that appears in
    /// snapshots, hashes, and partition arithmetic.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Reconstruct from a raw `u32`.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Serializable allocator state for snapshot/restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorState {
    /// Per-index generation counters. A never-allocated slot has generation 0.
    pub generations: Vec<u16>,
    /// Per-index alive flags.
    pub alive: Vec<bool>,
    /// Free indices, sorted ascending.
    pub free: Vec<u32>,
}

/// Allocates and recycles [`EntityId`]s with deterministic index reuse.
#[derive(Debug, Default, Clone)]
pub struct EntityAllocator {
    generations: Vec<u16>,
    alive: Vec<bool>,
    /// Free indices kept sorted ascending; allocation pops the front.
    free: Vec<u32>,
}

impl EntityAllocator {
    /// Create a new, empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the smallest available [`EntityId`].
    ///
    /// Reuses the smallest free index if any exist, otherwise extends the
    /// high-water mark.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityLimitExceeded`] when all 2^20 indices are in
    /// use. This is fatal for the simulation.
    pub fn allocate(&mut self) -> Result<EntityId, EcsError> {
        if self.free.is_empty() {
            let index = self.generations.len() as u32;
            if index >= MAX_ENTITIES {
                return Err(EcsError::EntityLimitExceeded);
            }
            self.generations.push(0);
            self.alive.push(true);
            Ok(EntityId::new(index, 0))
        } else {
            // Smallest free index first -- this is what makes recycling
            // identical across peers.
            let index = self.free.remove(0);
            self.alive[index as usize] = true;
            Ok(EntityId::new(index, self.generations[index as usize]))
        }
    }

    /// Free an entity id, bumping its generation (wrapping at 4096) and
    /// inserting the index into the sorted free list.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::StaleEntity`] if the id is not currently valid.
    pub fn free(&mut self, id: EntityId) -> Result<(), EcsError> {
        if !self.is_valid(id) {
            return Err(EcsError::StaleEntity { entity: id });
        }
        let idx = id.index() as usize;
        self.alive[idx] = false;
        self.generations[idx] = (self.generations[idx] + 1) & GENERATION_MASK as u16;
        let pos = self.free.partition_point(|&f| f < id.index());
        self.free.insert(pos, id.index());
        Ok(())
    }

    /// Force an exact id into existence: mark its index alive at the id's
    /// generation, extending the high-water mark or removing the index from
    /// the free list as needed. Used when applying authoritative creates,
    /// where the remote allocator already assigned the id.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::StaleEntity`] if the index is currently alive
    /// under a different generation.
    pub fn materialize(&mut self, id: EntityId) -> Result<(), EcsError> {
        let idx = id.index() as usize;
        if idx >= self.generations.len() {
            // Indices between the old high-water mark and this one become
            // dead slots at generation 0, available through the free list.
            let old_len = self.generations.len() as u32;
            self.generations.resize(idx + 1, 0);
            self.alive.resize(idx + 1, false);
            for gap in old_len..idx as u32 {
                let pos = self.free.partition_point(|&f| f < gap);
                self.free.insert(pos, gap);
            }
        }
        if self.alive[idx] {
            if self.generations[idx] == id.generation() {
                return Ok(());
            }
            return Err(EcsError::StaleEntity { entity: id });
        }
        if let Ok(pos) = self.free.binary_search(&id.index()) {
            self.free.remove(pos);
        }
        self.generations[idx] = id.generation();
        self.alive[idx] = true;
        Ok(())
    }

    /// Whether `id` refers to a currently alive entity: its index is below
    /// the high-water mark and its generation matches.
    pub fn is_valid(&self, id: EntityId) -> bool {
        let idx = id.index() as usize;
        idx < self.generations.len()
            && self.alive[idx]
            && self.generations[idx] == id.generation()
    }

    /// Number of currently alive entities.
    pub fn alive_count(&self) -> usize {
        self.alive.iter().filter(|&&a| a).count()
    }

    /// Highest index ever allocated plus one.
    pub fn high_water_mark(&self) -> u32 {
        self.generations.len() as u32
    }

    /// Capture the allocator state for snapshots.
    pub fn state(&self) -> AllocatorState {
        AllocatorState {
            generations: self.generations.clone(),
            alive: self.alive.clone(),
            free: self.free.clone(),
        }
    }

    /// Restore allocator state from a snapshot. After this, allocations
    /// proceed identically to the peer whose state was captured.
    pub fn restore(&mut self, state: &AllocatorState) {
        self.generations = state.generations.clone();
        self.alive = state.alive.clone();
        self.free = state.free.clone();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_packing_roundtrip() {
        let id = EntityId::new(1_048_575, 4095);
        assert_eq!(id.index(), 1_048_575);
        assert_eq!(id.generation(), 4095);
        assert_eq!(EntityId::from_raw(id.raw()), id);
    }

    #[test]
    fn allocates_sequential_indices() {
        let mut alloc = EntityAllocator::new();
        for expected in 0..100u32 {
            let id = alloc.allocate().unwrap();
            assert_eq!(id.index(), expected);
            assert_eq!(id.generation(), 0);
        }
    }

    #[test]
    fn recycles_smallest_index_first() {
        let mut alloc = EntityAllocator::new();
        let ids: Vec<EntityId> = (0..5).map(|_| alloc.allocate().unwrap()).collect();

        // Free out of order: 3, 1, 4.
        alloc.free(ids[3]).unwrap();
        alloc.free(ids[1]).unwrap();
        alloc.free(ids[4]).unwrap();

        // Allocation takes the minimum available index each time.
        assert_eq!(alloc.allocate().unwrap().index(), 1);
        assert_eq!(alloc.allocate().unwrap().index(), 3);
        assert_eq!(alloc.allocate().unwrap().index(), 4);
    }

    #[test]
    fn generation_bumps_on_recycle() {
        let mut alloc = EntityAllocator::new();
        let e0 = alloc.allocate().unwrap();
        alloc.free(e0).unwrap();
        let e1 = alloc.allocate().unwrap();
        assert_eq!(e1.index(), e0.index());
        assert_eq!(e1.generation(), 1);
        assert!(!alloc.is_valid(e0), "stale handle must be invalid");
        assert!(alloc.is_valid(e1));
    }

    #[test]
    fn generation_wraps_at_4096() {
        let mut alloc = EntityAllocator::new();
        let mut id = alloc.allocate().unwrap();
        for _ in 0..4096 {
            alloc.free(id).unwrap();
            id = alloc.allocate().unwrap();
        }
        // 4096 recycles wrap back to generation 0.
        assert_eq!(id.generation(), 0);
    }

    #[test]
    fn double_free_is_stale() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate().unwrap();
        alloc.free(e).unwrap();
        assert!(matches!(alloc.free(e), Err(EcsError::StaleEntity { .. })));
    }

    #[test]
    fn state_restore_resumes_identically() {
        let mut a = EntityAllocator::new();
        let ids: Vec<EntityId> = (0..10).map(|_| a.allocate().unwrap()).collect();
        a.free(ids[2]).unwrap();
        a.free(ids[7]).unwrap();
        a.free(ids[4]).unwrap();

        let mut b = EntityAllocator::new();
        b.restore(&a.state());

        for _ in 0..5 {
            assert_eq!(a.allocate().unwrap(), b.allocate().unwrap());
        }
    }

    #[test]
    fn free_list_stays_sorted() {
        let mut alloc = EntityAllocator::new();
        let ids: Vec<EntityId> = (0..20).map(|_| alloc.allocate().unwrap()).collect();
        for &i in &[13usize, 2, 19, 7, 11, 3] {
            alloc.free(ids[i]).unwrap();
        }
        let state = alloc.state();
        assert!(state.free.windows(2).all(|w| w[0] < w[1]), "free list unsorted: {:?}", state.free);
    }

    #[test]
    fn materialize_follows_remote_assignment() {
        let mut alloc = EntityAllocator::new();
        // A remote peer allocated index 3 at generation 2.
        let remote = EntityId::new(3, 2);
        alloc.materialize(remote).unwrap();
        assert!(alloc.is_valid(remote));

        // The skipped indices 0..3 became free slots, smallest first.
        assert_eq!(alloc.allocate().unwrap().index(), 0);
        assert_eq!(alloc.allocate().unwrap().index(), 1);
        assert_eq!(alloc.allocate().unwrap().index(), 2);
        // Index 3 is taken; the next fresh index follows it.
        assert_eq!(alloc.allocate().unwrap().index(), 4);
    }

    #[test]
    fn materialize_conflicting_generation_is_stale() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate().unwrap();
        let conflicting = EntityId::new(e.index(), 3);
        assert!(matches!(
            alloc.materialize(conflicting),
            Err(EcsError::StaleEntity { .. })
        ));
        // Same generation is idempotent.
        alloc.materialize(e).unwrap();
        assert!(alloc.is_valid(e));
    }

    #[test]
    fn materialize_recycles_from_free_list() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate().unwrap();
        alloc.free(e).unwrap();
        let remote = EntityId::new(e.index(), 1);
        alloc.materialize(remote).unwrap();
        assert!(alloc.is_valid(remote));
        assert!(alloc.state().free.is_empty());
    }

    #[test]
    fn never_allocated_slot_has_generation_zero() {
        let alloc = EntityAllocator::new();
        assert_eq!(alloc.state().generations.len(), 0);
        let mut alloc = EntityAllocator::new();
        alloc.allocate().unwrap();
        assert_eq!(alloc.state().generations[0], 0);
    }
}
