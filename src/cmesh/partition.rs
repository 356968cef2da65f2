//! Coarse-mesh partitioning: layout computation and tree shipping.
//!
//! A layout assigns every tree one owner (contiguous, non-decreasing in the
//! tree id) and to every process a contiguous range of held trees. Under a
//! uniform partition a tree whose projected elements straddle a process
//! boundary is held by every process receiving some of them, while the
//! process with the largest share owns it.
//!
//! Deriving from a partitioned cmesh runs in two phases. Phase one gathers
//! the leaf counts of every owned tree so all processes compute the same
//! layout. Phase two is an all-to-all in which each owner ships its trees to
//! their new holders and to the processes holding a face-neighbor tree.

use super::tree::Tree;
use super::Cmesh;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{all_gather_bytes, all_to_all};
use crate::algs::wire::{decode_frame, kind, WireCount, WireHdr};
use crate::mesh_error::MeshForestError;
use crate::scheme::SchemeSet;
use bytes::{Buf, BufMut};
use std::ops::Range;

/// Offsets placing every tree on process `target`.
pub fn offsets_concentrate(target: usize, size: usize, num_trees: u64) -> Vec<u64> {
    (0..=size)
        .map(|r| if r <= target { 0 } else { num_trees })
        .collect()
}

/// Check that `offsets` is a valid tree partition for `size` processes.
pub fn validate_offsets(offsets: &[u64], size: usize, num_trees: u64) -> Result<(), MeshForestError> {
    if offsets.len() != size + 1 {
        return Err(MeshForestError::InvalidPartitionOffsets(format!(
            "expected {} offsets, got {}",
            size + 1,
            offsets.len()
        )));
    }
    if offsets[0] != 0 || offsets[size] != num_trees {
        return Err(MeshForestError::InvalidPartitionOffsets(format!(
            "offsets must span [0, {num_trees}], got [{}, {}]",
            offsets[0], offsets[size]
        )));
    }
    if let Some(r) = offsets.windows(2).position(|w| w[0] > w[1]) {
        return Err(MeshForestError::InvalidPartitionOffsets(format!(
            "offsets decrease between process {r} and {}",
            r + 1
        )));
    }
    Ok(())
}

/// Owner offsets and held ranges of every process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Layout {
    pub(crate) offsets: Vec<u64>,
    pub(crate) held: Vec<Range<u64>>,
}

impl Layout {
    /// Layout of an explicit offset array: processes hold exactly what they own.
    pub(crate) fn from_offsets(offsets: Vec<u64>) -> Self {
        let held = offsets.windows(2).map(|w| w[0]..w[1]).collect();
        Self { offsets, held }
    }

    /// Layout of a uniform refinement with `counts[t]` elements in tree `t`.
    pub(crate) fn uniform(counts: &[u64], size: usize) -> Result<Self, MeshForestError> {
        let mut total = 0u64;
        let mut starts = Vec::with_capacity(counts.len());
        for &c in counts {
            starts.push(total);
            total = total
                .checked_add(c)
                .ok_or(MeshForestError::Overflow("uniform element count"))?;
        }
        let bounds = element_bounds(total, size);

        let mut owners = Vec::with_capacity(counts.len());
        let mut held: Vec<Option<Range<u64>>> = vec![None; size];
        for (t, (&start, &c)) in starts.iter().zip(counts).enumerate() {
            let end = start + c;
            let first = bounds.partition_point(|&b| b <= start).saturating_sub(1);
            let mut owner = first.min(size - 1);
            let mut best = 0u64;
            for r in first..size {
                if bounds[r] >= end {
                    break;
                }
                let overlap = bounds[r + 1].min(end).saturating_sub(bounds[r].max(start));
                if overlap == 0 {
                    continue;
                }
                if overlap > best {
                    best = overlap;
                    owner = r;
                }
                let t = t as u64;
                held[r] = Some(match held[r].take() {
                    Some(range) => range.start..t + 1,
                    None => t..t + 1,
                });
            }
            owners.push(owner);
        }

        let offsets = (0..=size)
            .map(|r| owners.partition_point(|&o| o < r) as u64)
            .collect::<Vec<_>>();
        let held = held
            .into_iter()
            .enumerate()
            .map(|(r, h)| h.unwrap_or(offsets[r]..offsets[r]))
            .collect();
        Ok(Self { offsets, held })
    }

    /// Processes that must receive tree `t`, given its face neighbors.
    fn recipients(&self, t: u64, neighbors: &[u64]) -> Vec<usize> {
        self.held
            .iter()
            .enumerate()
            .filter(|(_, range)| range.contains(&t) || neighbors.iter().any(|n| range.contains(n)))
            .map(|(r, _)| r)
            .collect()
    }
}

/// First global element of every process under a uniform split of `total`.
pub(crate) fn element_bounds(total: u64, size: usize) -> Vec<u64> {
    (0..=size)
        .map(|r| ((total as u128 * r as u128) / size as u128) as u64)
        .collect()
}

/// Leaves each tree produces at uniform `level`.
pub(crate) fn leaf_counts(
    trees: &[Tree],
    level: u8,
    schemes: &SchemeSet,
) -> Result<Vec<u64>, MeshForestError> {
    trees
        .iter()
        .map(|tree| {
            schemes
                .count_leaves_from_root(tree.eclass, level)
                .ok_or(MeshForestError::Overflow("leaves per tree"))
        })
        .collect()
}

/// Phase one: per-tree leaf counts of every tree, gathered from the owners.
pub(crate) fn gather_leaf_counts<C: Communicator>(
    comm: &C,
    source: &Cmesh,
    level: u8,
    schemes: &SchemeSet,
) -> Result<Vec<u64>, MeshForestError> {
    let counts = leaf_counts(source.owned_local_trees(), level, schemes)?;
    let mut payload = Vec::with_capacity(8 * (counts.len() + 1));
    payload.put_u64_le(source.owned_trees().start);
    for &c in &counts {
        payload.put_u64_le(c);
    }
    let gathered = all_gather_bytes(comm, &payload)?;

    let mut all = Vec::with_capacity(source.num_trees() as usize);
    for (rank, bytes) in gathered.iter().enumerate() {
        let mut reader = &bytes[..];
        if reader.remaining() < 8 || reader.remaining() % 8 != 0 {
            return Err(MeshForestError::CommError {
                neighbor: rank,
                detail: format!("malformed leaf-count message of {} bytes", bytes.len()),
            });
        }
        let first = reader.get_u64_le();
        if first != all.len() as u64 {
            return Err(MeshForestError::InvalidPartitionOffsets(format!(
                "process {rank} owns trees from {first}, expected {}",
                all.len()
            )));
        }
        while reader.has_remaining() {
            all.push(reader.get_u64_le());
        }
    }
    if all.len() as u64 != source.num_trees() {
        return Err(MeshForestError::InvalidPartitionOffsets(format!(
            "gathered {} tree counts for {} trees",
            all.len(),
            source.num_trees()
        )));
    }
    Ok(all)
}

/// Held and ghost trees of `rank` from a complete tree array.
pub(crate) fn select_local(all: &[Tree], layout: &Layout, rank: usize) -> (Vec<Tree>, Vec<Tree>) {
    let range = layout.held[rank].clone();
    let held: Vec<Tree> = all[range.start as usize..range.end as usize].to_vec();
    let mut ghost_ids: Vec<u64> = held
        .iter()
        .flat_map(Tree::neighbor_ids)
        .filter(|id| !range.contains(id))
        .collect();
    ghost_ids.sort_unstable();
    ghost_ids.dedup();
    let ghosts = ghost_ids.into_iter().map(|id| all[id as usize].clone()).collect();
    (held, ghosts)
}

/// Phase two: every owner ships its trees to the processes that need them.
pub(crate) fn ship_trees<C: Communicator>(
    comm: &C,
    source: &Cmesh,
    layout: &Layout,
) -> Result<(Vec<Tree>, Vec<Tree>), MeshForestError> {
    let size = comm.size();
    let mut outgoing: Vec<Vec<Tree>> = vec![Vec::new(); size];
    for tree in source.owned_local_trees() {
        for r in layout.recipients(tree.global_id, &tree.neighbor_ids()) {
            outgoing[r].push(tree.clone());
        }
    }
    let buffers = outgoing
        .iter()
        .map(|trees| {
            let mut buf = Vec::new();
            buf.extend_from_slice(bytemuck::bytes_of(&WireHdr::new(kind::TREES)));
            buf.extend_from_slice(bytemuck::bytes_of(&WireCount::new(trees.len())));
            for tree in trees {
                tree.encode(&mut buf);
            }
            buf
        })
        .collect();
    let incoming = all_to_all(comm, CommTag::ALL_TO_ALL, buffers)?;

    let mut received = Vec::new();
    for bytes in &incoming {
        let (n, mut payload) = decode_frame(kind::TREES, bytes)?;
        for _ in 0..n {
            received.push(Tree::decode(&mut payload)?);
        }
    }
    received.sort_by_key(|t| t.global_id);

    let range = layout.held[comm.rank()].clone();
    let (held, ghosts): (Vec<Tree>, Vec<Tree>) =
        received.into_iter().partition(|t| range.contains(&t.global_id));
    if held.len() as u64 != range.end - range.start {
        return Err(MeshForestError::MissingTree(
            (range.start..range.end)
                .find(|id| !held.iter().any(|t| t.global_id == *id))
                .unwrap_or(range.start),
        ));
    }
    log::debug!(
        "[cmesh] rank {} received {} held and {} ghost trees",
        comm.rank(),
        held.len(),
        ghosts.len()
    );
    Ok((held, ghosts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concentrate_puts_everything_on_one_process() {
        assert_eq!(offsets_concentrate(0, 3, 5), vec![0, 5, 5, 5]);
        assert_eq!(offsets_concentrate(2, 3, 5), vec![0, 0, 0, 5]);
        assert!(validate_offsets(&offsets_concentrate(1, 4, 7), 4, 7).is_ok());
    }

    #[test]
    fn invalid_offsets_are_rejected() {
        assert!(validate_offsets(&[0, 3, 2, 4], 3, 4).is_err());
        assert!(validate_offsets(&[0, 2, 3], 2, 4).is_err());
        assert!(validate_offsets(&[1, 2, 4], 2, 4).is_err());
        assert!(validate_offsets(&[0, 4], 2, 4).is_err());
    }

    #[test]
    fn uniform_layout_shares_boundary_trees() {
        // three trees of four elements on two processes: [0, 6) and [6, 12)
        let layout = Layout::uniform(&[4, 4, 4], 2).unwrap();
        assert_eq!(layout.held, vec![0..2, 1..3]);
        // tree 1 is split 2/2, ties go to the lower rank
        assert_eq!(layout.offsets, vec![0, 2, 3]);
    }

    #[test]
    fn uniform_layout_with_more_processes_than_elements() {
        let layout = Layout::uniform(&[1, 1], 4).unwrap();
        // bounds [0, 0, 1, 1, 2]
        assert_eq!(layout.held, vec![0..0, 0..1, 1..1, 1..2]);
        assert_eq!(layout.offsets, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn recipients_include_neighbor_holders() {
        let layout = Layout::from_offsets(vec![0, 2, 4]);
        assert_eq!(layout.recipients(1, &[2]), vec![0, 1]);
        assert_eq!(layout.recipients(0, &[1]), vec![0]);
    }
}
