//! Distributed forest of refined trees.
//!
//! Every process stores, for each of its local trees, the leaves it owns in
//! curve order. Concatenating the local arrays of all processes in rank
//! order yields the global leaf order, so a process is described by its
//! element offset and by the curve position of its first leaf.
//!
//! Forests are created through [`ForestBuilder`] and never change after
//! commit; adapting, balancing or repartitioning derives a new forest.

pub mod adapt;
pub(crate) mod balance;
pub mod builder;
pub mod ghost;
pub mod lfn;
pub(crate) mod partition;
pub(crate) mod search;
pub(crate) mod transition;

pub use adapt::{AdaptAction, AdaptFn, AdaptQuery};
pub use builder::ForestBuilder;
pub use ghost::{GhostConfig, GhostElement, GhostLayer, GhostTree, RemoteGhosts};
pub use lfn::{LeafFaceNeighbors, LeafLocation, NeighborLeaf};

use crate::algs::communicator::Communicator;
use crate::algs::exchange::{all_gather_bytes, all_gather_u64, offsets_from_counts};
use crate::cmesh::partition::{element_bounds, gather_leaf_counts, leaf_counts};
use crate::cmesh::{Cmesh, FaceLink, Tree};
use crate::debug_invariants::DebugInvariants;
use crate::eclass::ElementClass;
use crate::mesh_error::MeshForestError;
use crate::scheme::{Element, Scheme, SchemeSet};
use bytes::{Buf, BufMut};
use std::cmp::Ordering;
use std::sync::Arc;

/// Position of a leaf in the global order: its tree, then the curve key of
/// its first finest-level descendant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurvePosition {
    pub tree: u64,
    pub key: u64,
}

/// The leaves of one tree stored on this process.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalTree {
    pub(crate) tree: Tree,
    pub(crate) elements: Vec<Element>,
    /// Local index of the first element over all local trees.
    pub(crate) element_offset: u64,
}

impl LocalTree {
    pub(crate) fn new(tree: Tree, elements: Vec<Element>) -> Self {
        Self {
            tree,
            elements,
            element_offset: 0,
        }
    }

    pub fn global_id(&self) -> u64 {
        self.tree.global_id
    }

    pub fn eclass(&self) -> ElementClass {
        self.tree.eclass
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Local index of the first element of this tree.
    pub fn element_offset(&self) -> u64 {
        self.element_offset
    }

    /// Coarse-mesh link across tree face `face`.
    pub fn face_link(&self, face: usize) -> Option<&FaceLink> {
        self.tree.face_link(face)
    }
}

/// A committed forest on one process.
#[derive(Clone, Debug)]
pub struct Forest {
    pub(crate) cmesh: Arc<Cmesh>,
    pub(crate) schemes: Arc<SchemeSet>,
    pub(crate) rank: usize,
    pub(crate) size: usize,
    pub(crate) trees: Vec<LocalTree>,
    pub(crate) element_offsets: Vec<u64>,
    pub(crate) first_positions: Vec<Option<CurvePosition>>,
    pub(crate) ghosts: Option<GhostLayer>,
    pub(crate) is_balanced: bool,
    pub(crate) is_transitioned: bool,
}

impl Forest {
    /// A forest with the given local trees; partition information is filled
    /// in by [`refresh_partition`](Self::refresh_partition).
    pub(crate) fn from_trees(
        cmesh: Arc<Cmesh>,
        schemes: Arc<SchemeSet>,
        rank: usize,
        size: usize,
        trees: Vec<LocalTree>,
    ) -> Self {
        Self {
            cmesh,
            schemes,
            rank,
            size,
            trees,
            element_offsets: vec![0; size + 1],
            first_positions: vec![None; size],
            ghosts: None,
            is_balanced: false,
            is_transitioned: false,
        }
    }

    /// A copy of the leaves of `from` without its ghost layer.
    pub(crate) fn derive_copy(from: &Forest) -> Self {
        Self {
            ghosts: None,
            ..from.clone()
        }
    }

    /// Uniform refinement of every tree of `cmesh` to `level`.
    ///
    /// Global leaves are split evenly: rank `r` receives
    /// `[N r / P, N (r + 1) / P)`. The trees covering that range must be
    /// available in `cmesh` (held or ghost).
    pub(crate) fn new_uniform<C: Communicator>(
        cmesh: Arc<Cmesh>,
        schemes: Arc<SchemeSet>,
        level: u8,
        comm: &C,
    ) -> Result<Self, MeshForestError> {
        for tree in cmesh.local_trees() {
            let scheme = schemes.scheme(tree.eclass)?;
            if level > scheme.max_level() {
                return Err(MeshForestError::LevelOverflow {
                    tree: tree.global_id as usize,
                    element: 0,
                    max_level: scheme.max_level(),
                });
            }
        }
        let counts = if cmesh.is_partitioned() {
            gather_leaf_counts(comm, &cmesh, level, &schemes)?
        } else {
            leaf_counts(cmesh.local_trees(), level, &schemes)?
        };
        let total = counts
            .iter()
            .try_fold(0u64, |acc, &c| acc.checked_add(c))
            .ok_or(MeshForestError::Overflow("uniform element count"))?;
        let bounds = element_bounds(total, comm.size());
        let (lo, hi) = (bounds[comm.rank()], bounds[comm.rank() + 1]);

        let mut jobs = Vec::new();
        let mut start = 0u64;
        for (t, &c) in counts.iter().enumerate() {
            let end = start + c;
            if start < hi && end > lo {
                let tree = cmesh
                    .tree(t as u64)
                    .ok_or(MeshForestError::MissingTree(t as u64))?
                    .clone();
                jobs.push((tree, lo.max(start) - start, hi.min(end) - start));
            }
            start = end;
        }

        let build = |(tree, first, last): (Tree, u64, u64)| -> Result<LocalTree, MeshForestError> {
            let scheme = schemes.scheme(tree.eclass)?;
            let elements = (first..last).map(|id| scheme.from_linear_id(id, level)).collect();
            Ok(LocalTree::new(tree, elements))
        };
        #[cfg(feature = "rayon")]
        let trees = {
            use rayon::prelude::*;
            jobs.into_par_iter().map(build).collect::<Result<Vec<_>, _>>()?
        };
        #[cfg(not(feature = "rayon"))]
        let trees = jobs.into_iter().map(build).collect::<Result<Vec<_>, _>>()?;

        let mut forest = Self::from_trees(cmesh, schemes, comm.rank(), comm.size(), trees);
        forest.is_balanced = true;
        forest.refresh_partition(comm)?;
        log::debug!(
            "[forest] rank {}: uniform level {level}, {} of {total} elements",
            forest.rank,
            hi - lo
        );
        Ok(forest)
    }

    /// Recompute local element offsets and gather the global element offsets
    /// and first curve positions of every process.
    pub(crate) fn refresh_partition<C: Communicator>(
        &mut self,
        comm: &C,
    ) -> Result<(), MeshForestError> {
        self.trees.retain(|t| !t.elements.is_empty());
        let mut offset = 0u64;
        for tree in &mut self.trees {
            tree.element_offset = offset;
            offset += tree.elements.len() as u64;
        }
        let counts = all_gather_u64(comm, offset)?;
        self.element_offsets = offsets_from_counts(&counts)?;

        let mut payload = Vec::with_capacity(17);
        match self.first_local_position()? {
            Some(pos) => {
                payload.put_u8(1);
                payload.put_u64_le(pos.tree);
                payload.put_u64_le(pos.key);
            }
            None => payload.put_u8(0),
        }
        let gathered = all_gather_bytes(comm, &payload)?;
        self.first_positions = gathered
            .iter()
            .enumerate()
            .map(|(rank, bytes)| {
                let mut reader = &bytes[..];
                match (reader.remaining(), reader.first()) {
                    (1, Some(0)) => Ok(None),
                    (17, Some(1)) => {
                        reader.advance(1);
                        Ok(Some(CurvePosition {
                            tree: reader.get_u64_le(),
                            key: reader.get_u64_le(),
                        }))
                    }
                    _ => Err(MeshForestError::CommError {
                        neighbor: rank,
                        detail: format!("malformed first position of {} bytes", bytes.len()),
                    }),
                }
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn first_local_position(&self) -> Result<Option<CurvePosition>, MeshForestError> {
        let Some(tree) = self.trees.first() else {
            return Ok(None);
        };
        let scheme = self.schemes.scheme(tree.eclass())?;
        Ok(tree.elements.first().map(|e| CurvePosition {
            tree: tree.global_id(),
            key: scheme.curve_key(e),
        }))
    }

    /// Process owning the leaf at `position`.
    pub(crate) fn owner_of(&self, position: CurvePosition) -> usize {
        let mut owner = None;
        for (rank, first) in self.first_positions.iter().enumerate() {
            match first {
                Some(first) if *first <= position => owner = Some(rank),
                Some(_) => break,
                None => {}
            }
        }
        owner
            .or_else(|| self.first_positions.iter().position(Option::is_some))
            .unwrap_or(self.rank)
    }

    pub fn cmesh(&self) -> &Arc<Cmesh> {
        &self.cmesh
    }

    pub fn schemes(&self) -> &Arc<SchemeSet> {
        &self.schemes
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn num_local_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn local_trees(&self) -> &[LocalTree] {
        &self.trees
    }

    pub fn tree(&self, local_tree: usize) -> Result<&LocalTree, MeshForestError> {
        self.trees
            .get(local_tree)
            .ok_or(MeshForestError::TreeOutOfRange {
                tree: local_tree,
                num_trees: self.trees.len(),
            })
    }

    pub fn tree_class(&self, local_tree: usize) -> Result<ElementClass, MeshForestError> {
        Ok(self.tree(local_tree)?.eclass())
    }

    pub fn global_tree_id(&self, local_tree: usize) -> Result<u64, MeshForestError> {
        Ok(self.tree(local_tree)?.global_id())
    }

    /// Local index of the tree with `global_id`, if it has local leaves.
    pub fn local_tree_index(&self, global_id: u64) -> Option<usize> {
        self.trees
            .binary_search_by_key(&global_id, LocalTree::global_id)
            .ok()
    }

    pub fn element_in_tree(&self, local_tree: usize, index: usize) -> Result<&Element, MeshForestError> {
        let tree = self.tree(local_tree)?;
        tree.elements
            .get(index)
            .ok_or(MeshForestError::ElementOutOfRange {
                tree: local_tree,
                index,
                len: tree.elements.len(),
            })
    }

    /// Scheme of the class of a local tree.
    pub fn scheme_for_tree(&self, local_tree: usize) -> Result<&dyn Scheme, MeshForestError> {
        self.schemes.scheme(self.tree_class(local_tree)?)
    }

    pub fn scheme(&self, eclass: ElementClass) -> Result<&dyn Scheme, MeshForestError> {
        self.schemes.scheme(eclass)
    }

    pub fn local_num_elements(&self) -> u64 {
        self.element_offsets[self.rank + 1] - self.element_offsets[self.rank]
    }

    pub fn global_num_elements(&self) -> u64 {
        self.element_offsets[self.size]
    }

    /// Global index of the first local element.
    pub fn first_local_element(&self) -> u64 {
        self.element_offsets[self.rank]
    }

    pub fn global_num_trees(&self) -> u64 {
        self.cmesh.num_trees()
    }

    /// Global element offsets per process (`size + 1` entries).
    pub fn partition_table(&self) -> &[u64] {
        &self.element_offsets
    }

    /// Curve position of the first leaf of `rank`, if it has any.
    pub fn first_position(&self, rank: usize) -> Option<CurvePosition> {
        self.first_positions.get(rank).copied().flatten()
    }

    pub fn ghosts(&self) -> Option<&GhostLayer> {
        self.ghosts.as_ref()
    }

    pub fn is_balanced(&self) -> bool {
        self.is_balanced
    }

    pub fn is_transitioned(&self) -> bool {
        self.is_transitioned
    }

    /// Finest level among local leaves.
    pub fn max_local_level(&self) -> u8 {
        self.trees
            .iter()
            .flat_map(|t| t.elements.iter())
            .map(Element::level)
            .max()
            .unwrap_or(0)
    }

    /// All local leaves as `(local tree, index in tree, element)`.
    pub fn iter_elements(&self) -> impl Iterator<Item = (usize, usize, &Element)> + '_ {
        self.trees.iter().enumerate().flat_map(|(t, tree)| {
            tree.elements.iter().enumerate().map(move |(i, e)| (t, i, e))
        })
    }
}

impl DebugInvariants for Forest {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Forest");
    }

    fn validate_invariants(&self) -> Result<(), MeshForestError> {
        if self.element_offsets.len() != self.size + 1
            || self.element_offsets.windows(2).any(|w| w[0] > w[1])
        {
            return Err(MeshForestError::InvalidPartitionOffsets(format!(
                "element offsets {:?} are not a partition of {} processes",
                self.element_offsets, self.size
            )));
        }
        let local: u64 = self.trees.iter().map(|t| t.elements.len() as u64).sum();
        if local != self.local_num_elements() {
            return Err(MeshForestError::InvalidPartitionOffsets(format!(
                "{local} local elements but offsets give {}",
                self.local_num_elements()
            )));
        }
        if self.trees.windows(2).any(|w| w[0].global_id() >= w[1].global_id()) {
            return Err(MeshForestError::NotALeaf("local trees are not in global order".into()));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            let scheme = self.schemes.scheme(tree.eclass())?;
            for (i, e) in tree.elements.iter().enumerate() {
                if !scheme.is_valid(e) {
                    return Err(MeshForestError::NotALeaf(format!(
                        "tree {t} element {i} is invalid: {}",
                        scheme.to_string(e)
                    )));
                }
            }
            for (i, pair) in tree.elements.windows(2).enumerate() {
                let (a, b) = (&pair[0], &pair[1]);
                let same_group = a.subelement().is_some()
                    && b.subelement().is_some()
                    && a.without_subelement() == b.without_subelement();
                if scheme.compare(a, b) != Ordering::Less || (!same_group && scheme.is_ancestor(a, b)) {
                    return Err(MeshForestError::NotALeaf(format!(
                        "tree {t} elements {i} and {} overlap or are out of order",
                        i + 1
                    )));
                }
            }
        }
        Ok(())
    }
}
