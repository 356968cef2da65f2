//! Element partition: equal shares of the global leaf order.
//!
//! Process `r` receives the global leaves `[N r / P, N (r + 1) / P)`, with
//! every boundary moved back to the start of a subelement group it would
//! split. The process holding a boundary proposes its snapped position;
//! afterwards every process sends each overlap of its old range with a new
//! range to the new owner, as per-tree segments in curve order.

use super::{Forest, LocalTree};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{all_gather_bytes, all_to_all};
use crate::algs::wire::{cast_slice, decode_frame, kind, WireCount, WireElement, WireHdr, WireTreeCount};
use crate::cmesh::partition::element_bounds;
use crate::cmesh::Tree;
use crate::mesh_error::MeshForestError;
use bytes::{Buf, BufMut};
use std::mem::size_of;

/// Local index of the start of the subelement group containing local leaf
/// `local`, or `local` itself.
fn group_start(forest: &Forest, local: u64) -> u64 {
    let t = forest
        .trees
        .partition_point(|tree| tree.element_offset <= local)
        .saturating_sub(1);
    let Some(tree) = forest.trees.get(t) else {
        return local;
    };
    let index = (local - tree.element_offset) as usize;
    let Some(e) = tree.elements.get(index) else {
        return local;
    };
    if e.subelement().is_none() {
        return local;
    }
    let base = e.without_subelement();
    let first = tree.elements[..index]
        .iter()
        .rposition(|l| l.subelement().is_none() || l.without_subelement() != base)
        .map_or(0, |p| p + 1);
    tree.element_offset + first as u64
}

/// New element offsets, agreed on by all processes.
pub(crate) fn target_offsets<C: Communicator>(forest: &Forest, comm: &C) -> Result<Vec<u64>, MeshForestError> {
    let size = comm.size();
    let total = forest.global_num_elements();
    let target = element_bounds(total, size);
    let first = forest.first_local_element();
    let last = first + forest.local_num_elements();

    let mut proposal = Vec::with_capacity(8 * (size + 1));
    for &b in &target {
        if b >= first && b < last {
            proposal.put_u64_le(first + group_start(forest, b - first));
        } else {
            proposal.put_u64_le(u64::MAX);
        }
    }
    let gathered = all_gather_bytes(comm, &proposal)?;
    let mut offsets = target.clone();
    for (rank, bytes) in gathered.iter().enumerate() {
        if bytes.len() != 8 * (size + 1) {
            return Err(MeshForestError::CommError {
                neighbor: rank,
                detail: format!("malformed partition proposal of {} bytes", bytes.len()),
            });
        }
        let mut reader = &bytes[..];
        for slot in offsets.iter_mut() {
            let value = reader.get_u64_le();
            if value != u64::MAX {
                *slot = value;
            }
        }
    }
    offsets[0] = 0;
    offsets[size] = total;
    Ok(offsets)
}

/// Encode the leaves with local indices in `lo..hi` as per-tree segments.
fn encode_segments(forest: &Forest, lo: u64, hi: u64) -> Vec<u8> {
    let mut segments = 0usize;
    let mut buf = Vec::new();
    for tree in &forest.trees {
        let start = tree.element_offset;
        let end = start + tree.elements.len() as u64;
        let (a, b) = (lo.max(start), hi.min(end));
        if a >= b {
            continue;
        }
        let slice = &tree.elements[(a - start) as usize..(b - start) as usize];
        tree.tree.encode(&mut buf);
        buf.extend_from_slice(bytemuck::bytes_of(&WireTreeCount::new(
            tree.global_id(),
            slice.len() as u64,
        )));
        let records: Vec<WireElement> = slice.iter().map(|e| WireElement::new(tree.global_id(), e)).collect();
        buf.extend_from_slice(cast_slice(&records));
        segments += 1;
    }
    let mut out = Vec::with_capacity(buf.len() + 12);
    out.extend_from_slice(bytemuck::bytes_of(&WireHdr::new(kind::ELEMENTS)));
    out.extend_from_slice(bytemuck::bytes_of(&WireCount::new(segments)));
    out.extend_from_slice(&buf);
    out
}

fn decode_segments(bytes: &[u8], into: &mut Vec<LocalTree>) -> Result<(), MeshForestError> {
    let (n, mut payload) = decode_frame(kind::ELEMENTS, bytes)?;
    for _ in 0..n {
        let tree = Tree::decode(&mut payload)?;
        if payload.remaining() < size_of::<WireTreeCount>() {
            return Err(MeshForestError::WireFormat("truncated element segment".into()));
        }
        let header: WireTreeCount = bytemuck::pod_read_unaligned(&payload[..size_of::<WireTreeCount>()]);
        payload.advance(size_of::<WireTreeCount>());
        let count = header.count() as usize;
        let len = count * size_of::<WireElement>();
        if header.tree() != tree.global_id() || payload.remaining() < len {
            return Err(MeshForestError::WireFormat(format!(
                "segment of tree {} does not match its {} elements",
                header.tree(),
                count
            )));
        }
        let elements = payload[..len]
            .chunks_exact(size_of::<WireElement>())
            .map(|chunk| bytemuck::pod_read_unaligned::<WireElement>(chunk).element());
        match into.last_mut() {
            Some(last) if last.global_id() == tree.global_id() => last.elements.extend(elements),
            _ => into.push(LocalTree::new(tree, elements.collect())),
        }
        payload.advance(len);
    }
    if payload.has_remaining() {
        return Err(MeshForestError::WireFormat(format!(
            "{} trailing bytes after element segments",
            payload.remaining()
        )));
    }
    Ok(())
}

/// Repartition `forest` to equal shares. Returns the number of leaves this
/// process sent away.
pub(crate) fn partition<C: Communicator>(forest: &mut Forest, comm: &C) -> Result<u64, MeshForestError> {
    let offsets = target_offsets(forest, comm)?;
    if offsets == forest.element_offsets {
        log::debug!("[partition] rank {}: already partitioned", forest.rank);
        return Ok(0);
    }
    let rank = comm.rank();
    let first = forest.first_local_element();
    let last = first + forest.local_num_elements();
    let mut sent = 0u64;
    let outgoing = (0..comm.size())
        .map(|r| {
            let (lo, hi) = (first.max(offsets[r]), last.min(offsets[r + 1]));
            if lo >= hi {
                return encode_segments(forest, 0, 0);
            }
            if r != rank {
                sent += hi - lo;
            }
            encode_segments(forest, lo - first, hi - first)
        })
        .collect();
    let incoming = all_to_all(comm, CommTag::ALL_TO_ALL, outgoing)?;

    let mut trees = Vec::new();
    for bytes in &incoming {
        decode_segments(bytes, &mut trees)?;
    }
    forest.trees = trees;
    forest.ghosts = None;
    forest.refresh_partition(comm)?;
    if forest.element_offsets != offsets {
        return Err(MeshForestError::InvalidPartitionOffsets(format!(
            "partition produced offsets {:?} instead of {:?}",
            forest.element_offsets, offsets
        )));
    }
    log::debug!(
        "[partition] rank {rank}: sent {sent} leaves, now holds {}",
        forest.local_num_elements()
    );
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::cmesh::CmeshBuilder;
    use crate::scheme::SchemeSet;

    #[test]
    fn segments_round_trip_and_merge() {
        let cmesh = CmeshBuilder::brick_2d(2, 1, false, false).commit(&NoComm).unwrap();
        let forest = Forest::new_uniform(cmesh, SchemeSet::default_schemes(), 1, &NoComm).unwrap();
        let mut trees = Vec::new();
        decode_segments(&encode_segments(&forest, 0, 3), &mut trees).unwrap();
        decode_segments(&encode_segments(&forest, 3, 6), &mut trees).unwrap();
        decode_segments(&encode_segments(&forest, 6, 8), &mut trees).unwrap();
        let summary = |trees: &[LocalTree]| {
            trees
                .iter()
                .map(|t| (t.global_id(), t.elements.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(summary(&trees), summary(&forest.trees));
        assert_eq!(trees[1].tree, forest.trees[1].tree);
    }

    #[test]
    fn empty_segment_frame_decodes_to_nothing() {
        let cmesh = CmeshBuilder::brick_2d(1, 1, false, false).commit(&NoComm).unwrap();
        let forest = Forest::new_uniform(cmesh, SchemeSet::default_schemes(), 2, &NoComm).unwrap();
        let mut trees = Vec::new();
        decode_segments(&encode_segments(&forest, 0, 0), &mut trees).unwrap();
        assert!(trees.is_empty());
        assert!(decode_segments(&[0u8; 3], &mut trees).is_err());
    }

    #[test]
    fn single_process_partition_is_a_no_op() {
        let cmesh = CmeshBuilder::brick_2d(2, 2, false, false).commit(&NoComm).unwrap();
        let mut forest = Forest::new_uniform(cmesh, SchemeSet::default_schemes(), 2, &NoComm).unwrap();
        let before = forest.trees.clone();
        assert_eq!(partition(&mut forest, &NoComm).unwrap(), 0);
        assert_eq!(forest.trees, before);
    }
}
