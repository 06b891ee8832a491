//! Deterministic partition assignment for shared broadcast responsibility.
//!
//! Broadcasting a frame's delta is sharded: entities map to partitions by
//! `eid % numPartitions`, and each partition is assigned `k` redundant
//! sender clients. Every peer computes the same assignment as a pure
//! function of `(activeClientsSorted, frame, reliabilityScores)` -- there is
//! no negotiation, only shared inputs.

use unison_ecs::entity::EntityId;
use xxhash_rust::xxh32::xxh32;

use crate::delta::SnapshotDelta;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Number of partitions for a frame:
/// `clamp(ceil(entity_count / target), 1, client_count)`.
///
/// Pure in its inputs; identical across peers by construction.
pub fn partition_count(entity_count: usize, client_count: usize, target: usize) -> usize {
    let target = target.max(1);
    let wanted = entity_count.div_ceil(target).max(1);
    wanted.min(client_count.max(1))
}

/// The partition an entity belongs to.
pub fn entity_partition(id: EntityId, num_partitions: usize) -> usize {
    (id.raw() as usize) % num_partitions.max(1)
}

/// Assign sender clients to every partition.
///
/// Clients are ranked by `(reliability desc, client id asc)`; the head of
/// the ranking is rotated by `xxh32(frame, partition)` so load moves around
/// the ring over time; the first `min(k, |clients|)` ranked clients after
/// rotation send the partition.
///
/// `clients` is `(interned id, reliability score)` and must be sorted
/// ascending by id -- the shared canonical order.
pub fn assign_senders(
    clients: &[(u32, f64)],
    frame: u32,
    num_partitions: usize,
    redundancy: usize,
) -> Vec<Vec<u32>> {
    debug_assert!(
        clients.windows(2).all(|w| w[0].0 < w[1].0),
        "clients not sorted by id"
    );
    if clients.is_empty() {
        return vec![Vec::new(); num_partitions];
    }

    // Rank once: reliability descending, id ascending as tiebreaker.
    let mut ranked: Vec<(u32, f64)> = clients.to_vec();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let take = redundancy.max(1).min(ranked.len());
    (0..num_partitions)
        .map(|partition| {
            let mut key = [0u8; 8];
            key[..4].copy_from_slice(&frame.to_le_bytes());
            key[4..].copy_from_slice(&(partition as u32).to_le_bytes());
            let rotation = xxh32(&key, 0) as usize % ranked.len();
            (0..take)
                .map(|i| ranked[(rotation + i) % ranked.len()].0)
                .collect()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Delta partitioning
// ---------------------------------------------------------------------------

/// Extract the slice of a delta belonging to one partition.
pub fn get_partition(delta: &SnapshotDelta, partition: usize, num_partitions: usize) -> SnapshotDelta {
    SnapshotDelta {
        frame: delta.frame,
        base_hash: delta.base_hash,
        result_hash: delta.result_hash,
        created: delta
            .created
            .iter()
            .filter(|c| entity_partition(c.id, num_partitions) == partition)
            .cloned()
            .collect(),
        deleted: delta
            .deleted
            .iter()
            .copied()
            .filter(|&id| entity_partition(id, num_partitions) == partition)
            .collect(),
    }
}

/// Reassemble a frame's delta from partition payloads.
///
/// Payloads may arrive in any order and may overlap (redundant senders);
/// entries are concatenated, re-sorted, and deduplicated by entity id.
///
/// # Errors
///
/// [`EngineError::PartitionFrameMismatch`] when payloads disagree on the
/// frame.
pub fn assemble(parts: &[SnapshotDelta]) -> Result<SnapshotDelta, EngineError> {
    let Some(first) = parts.first() else {
        return Ok(SnapshotDelta {
            frame: 0,
            base_hash: 0,
            result_hash: 0,
            created: Vec::new(),
            deleted: Vec::new(),
        });
    };
    for part in &parts[1..] {
        if part.frame != first.frame {
            return Err(EngineError::PartitionFrameMismatch {
                first: first.frame,
                second: part.frame,
            });
        }
    }

    let mut created: Vec<crate::delta::CreatedEntity> =
        parts.iter().flat_map(|p| p.created.iter().cloned()).collect();
    created.sort_by_key(|c| c.id);
    created.dedup_by_key(|c| c.id);

    let mut deleted: Vec<EntityId> = parts.iter().flat_map(|p| p.deleted.iter().copied()).collect();
    deleted.sort();
    deleted.dedup();

    Ok(SnapshotDelta {
        frame: first.frame,
        base_hash: first.base_hash,
        result_hash: first.result_hash,
        created,
        deleted,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::CreatedEntity;

    fn eid(raw: u32) -> EntityId {
        EntityId::from_raw(raw)
    }

    fn delta_with(created: &[u32], deleted: &[u32]) -> SnapshotDelta {
        SnapshotDelta {
            frame: 10,
            base_hash: 1,
            result_hash: 2,
            created: created
                .iter()
                .map(|&raw| CreatedEntity {
                    id: eid(raw),
                    type_id: 0,
                    client: None,
                    components: Vec::new(),
                })
                .collect(),
            deleted: deleted.iter().map(|&raw| eid(raw)).collect(),
        }
    }

    #[test]
    fn partition_count_curve() {
        assert_eq!(partition_count(0, 4, 16), 1);
        assert_eq!(partition_count(16, 4, 16), 1);
        assert_eq!(partition_count(17, 4, 16), 2);
        assert_eq!(partition_count(64, 4, 16), 4);
        // Clamped to the client count.
        assert_eq!(partition_count(1_000, 4, 16), 4);
        assert_eq!(partition_count(1_000, 1, 16), 1);
        // Degenerate inputs stay in range.
        assert_eq!(partition_count(10, 0, 16), 1);
    }

    #[test]
    fn entity_partition_is_modulo() {
        for raw in 0..9 {
            assert_eq!(entity_partition(eid(raw), 3), raw as usize % 3);
        }
    }

    #[test]
    fn senders_identical_across_peers() {
        let clients = vec![(0, 1.0), (1, 0.5), (2, 0.9)];
        let a = assign_senders(&clients, 42, 3, 2);
        let b = assign_senders(&clients, 42, 3, 2);
        assert_eq!(a, b);
    }

    #[test]
    fn every_partition_gets_redundant_senders() {
        let clients = vec![(0, 1.0), (1, 1.0), (2, 1.0), (3, 1.0)];
        let senders = assign_senders(&clients, 7, 4, 2);
        assert_eq!(senders.len(), 4);
        for partition in &senders {
            assert_eq!(partition.len(), 2);
            assert_ne!(partition[0], partition[1]);
        }
    }

    #[test]
    fn redundancy_clamped_to_client_count() {
        let clients = vec![(5, 1.0)];
        let senders = assign_senders(&clients, 0, 2, 2);
        assert_eq!(senders, vec![vec![5], vec![5]]);
    }

    #[test]
    fn reliability_ranks_ahead_of_id() {
        // Client 9 is the most reliable; with one partition and rotation
        // applied to a single ranking, the chosen set must come from the
        // ranked ring -- verify ranking order drives adjacency.
        let clients = vec![(1, 0.2), (5, 0.9), (9, 0.95)];
        let senders = assign_senders(&clients, 3, 1, 2);
        assert_eq!(senders[0].len(), 2);
        // Whatever the rotation, the two senders are adjacent in the ranked
        // ring [9, 5, 1].
        let ring = [9u32, 5, 1];
        let pos = ring.iter().position(|&c| c == senders[0][0]).unwrap();
        assert_eq!(senders[0][1], ring[(pos + 1) % 3]);
    }

    #[test]
    fn rotation_varies_with_frame() {
        let clients: Vec<(u32, f64)> = (0..8).map(|i| (i, 1.0)).collect();
        let mut seen = std::collections::HashSet::new();
        for frame in 0..32 {
            seen.insert(assign_senders(&clients, frame, 1, 1)[0][0]);
        }
        assert!(seen.len() > 1, "rotation never moved the head");
    }

    #[test]
    fn get_partition_splits_by_modulo() {
        let delta = delta_with(&[0, 1, 2, 3, 4, 5, 6, 7, 8], &[]);
        let p0 = get_partition(&delta, 0, 3);
        let p1 = get_partition(&delta, 1, 3);
        let p2 = get_partition(&delta, 2, 3);
        let ids = |d: &SnapshotDelta| d.created.iter().map(|c| c.id.raw()).collect::<Vec<u32>>();
        assert_eq!(ids(&p0), vec![0, 3, 6]);
        assert_eq!(ids(&p1), vec![1, 4, 7]);
        assert_eq!(ids(&p2), vec![2, 5, 8]);
    }

    #[test]
    fn assemble_roundtrips_partitions() {
        let delta = delta_with(&[0, 1, 2, 3, 4, 5, 6, 7, 8], &[9, 10, 11]);
        let parts: Vec<SnapshotDelta> =
            (0..3).map(|p| get_partition(&delta, p, 3)).collect();
        // Feed them back out of order, with one duplicated (redundancy).
        let assembled = assemble(&[
            parts[2].clone(),
            parts[0].clone(),
            parts[1].clone(),
            parts[0].clone(),
        ])
        .unwrap();
        assert_eq!(assembled, delta);
    }

    #[test]
    fn assemble_rejects_frame_mismatch() {
        let a = delta_with(&[0], &[]);
        let mut b = delta_with(&[1], &[]);
        b.frame = 11;
        assert!(matches!(
            assemble(&[a, b]),
            Err(EngineError::PartitionFrameMismatch { .. })
        ));
    }

    #[test]
    fn every_entity_maps_to_exactly_one_partition() {
        let delta = delta_with(&(0..40).collect::<Vec<u32>>(), &[]);
        let n = 7;
        let mut total = 0;
        for p in 0..n {
            total += get_partition(&delta, p, n).created.len();
        }
        assert_eq!(total, delta.created.len());
    }
}
