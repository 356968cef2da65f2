//! Coarse mesh: the trees of a forest and their face connectivity.
//!
//! A committed [`Cmesh`] is either replicated (every process holds every
//! tree) or partitioned (each process holds a contiguous range of trees plus
//! read-only ghost copies of their face neighbors). It is immutable and
//! shared through `Arc` by forests and derived cmeshes.

pub mod builder;
pub mod partition;
pub mod tree;

pub use builder::CmeshBuilder;
pub use partition::{offsets_concentrate, validate_offsets};
pub use tree::{FaceLink, Tree};

use crate::debug_invariants::DebugInvariants;
use crate::eclass::ElementClass;
use crate::mesh_error::MeshForestError;
use crate::scheme::cube::inverse_orientation;
use std::ops::Range;

/// A committed coarse mesh on one process.
#[derive(Clone, Debug, PartialEq)]
pub struct Cmesh {
    pub(crate) rank: usize,
    pub(crate) size: usize,
    pub(crate) num_trees: u64,
    /// Held trees, contiguous in global id.
    pub(crate) trees: Vec<Tree>,
    pub(crate) owned: Range<u64>,
    pub(crate) tree_offsets: Option<Vec<u64>>,
    /// Face neighbors of held trees that are not held, sorted by id.
    pub(crate) ghosts: Vec<Tree>,
    pub(crate) uniform_level: Option<u8>,
}

impl Cmesh {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of trees over all processes.
    pub fn num_trees(&self) -> u64 {
        self.num_trees
    }

    /// Number of trees held by this process (owned and shared).
    pub fn num_local_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_ghosts(&self) -> usize {
        self.ghosts.len()
    }

    /// Global id of the first held tree.
    pub fn first_local_tree(&self) -> u64 {
        self.trees.first().map_or(self.owned.start, |t| t.global_id)
    }

    /// Global ids of the trees this process owns.
    pub fn owned_trees(&self) -> Range<u64> {
        self.owned.clone()
    }

    pub(crate) fn owned_local_trees(&self) -> &[Tree] {
        let first = self.first_local_tree();
        let start = (self.owned.start.saturating_sub(first)) as usize;
        let end = start + (self.owned.end - self.owned.start) as usize;
        &self.trees[start.min(self.trees.len())..end.min(self.trees.len())]
    }

    /// Whether a held tree is owned by another process.
    pub fn is_shared(&self, global_id: u64) -> bool {
        self.local_index(global_id).is_some() && !self.owned.contains(&global_id)
    }

    pub fn is_partitioned(&self) -> bool {
        self.tree_offsets.is_some()
    }

    /// Tree offsets per process (`size + 1` entries), if partitioned.
    pub fn partition_table(&self) -> Option<&[u64]> {
        self.tree_offsets.as_deref()
    }

    /// Level of the uniform partition this cmesh was built for, if any.
    pub fn uniform_level(&self) -> Option<u8> {
        self.uniform_level
    }

    pub fn local_trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn ghost_trees(&self) -> &[Tree] {
        &self.ghosts
    }

    pub fn local_tree(&self, local: usize) -> Option<&Tree> {
        self.trees.get(local)
    }

    /// Global id of the held tree with local index `local`.
    pub fn global_id(&self, local: usize) -> Option<u64> {
        self.trees.get(local).map(|t| t.global_id)
    }

    /// Local index of a held tree.
    pub fn local_index(&self, global_id: u64) -> Option<usize> {
        let first = self.first_local_tree();
        let idx = global_id.checked_sub(first)? as usize;
        (idx < self.trees.len()).then_some(idx)
    }

    /// A held or ghost tree by global id.
    pub fn tree(&self, global_id: u64) -> Option<&Tree> {
        match self.local_index(global_id) {
            Some(idx) => Some(&self.trees[idx]),
            None => self
                .ghosts
                .binary_search_by_key(&global_id, |t| t.global_id)
                .ok()
                .map(|idx| &self.ghosts[idx]),
        }
    }

    /// Class of a held or ghost tree.
    pub fn tree_class(&self, global_id: u64) -> Option<ElementClass> {
        self.tree(global_id).map(Tree::eclass)
    }

    /// Process owning tree `global_id`.
    pub fn tree_owner(&self, global_id: u64) -> usize {
        match &self.tree_offsets {
            Some(offsets) => offsets.partition_point(|&o| o <= global_id).saturating_sub(1),
            None => self.rank,
        }
    }

    /// Structural equality of two committed cmeshes, partition included.
    pub fn is_equal(&self, other: &Cmesh) -> bool {
        self == other
    }

    /// Whether every face link of a held tree resolves and is reciprocal.
    pub fn is_face_consistent(&self) -> bool {
        self.check_face_consistency().is_ok()
    }

    pub(crate) fn check_face_consistency(&self) -> Result<(), MeshForestError> {
        for tree in &self.trees {
            for (face, link) in tree.links.iter().enumerate() {
                let Some(link) = link else { continue };
                let fail = |detail: String| MeshForestError::FaceConnectivity {
                    tree: tree.global_id,
                    face,
                    detail,
                };
                let other = self
                    .tree(link.tree)
                    .ok_or(MeshForestError::MissingTree(link.tree))?;
                if other.eclass != link.eclass {
                    return Err(fail(format!(
                        "link names class {} but tree {} is {}",
                        link.eclass, link.tree, other.eclass
                    )));
                }
                if link.tree == tree.global_id && link.face as usize == face {
                    return Err(fail("face is joined to itself".into()));
                }
                let back = other.face_link(link.face as usize).ok_or_else(|| {
                    fail(format!("face {} of tree {} is not joined back", link.face, link.tree))
                })?;
                let expected = link.reversed(tree.global_id, face as u8, tree.eclass);
                if *back != expected {
                    return Err(fail(format!(
                        "link is not reciprocal: {back:?} instead of {expected:?}"
                    )));
                }
                debug_assert_eq!(inverse_orientation(back.orientation), link.orientation);
            }
        }
        Ok(())
    }
}

impl DebugInvariants for Cmesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Cmesh");
    }

    fn validate_invariants(&self) -> Result<(), MeshForestError> {
        if let Some(offsets) = &self.tree_offsets {
            validate_offsets(offsets, self.size, self.num_trees)?;
            let owned = offsets[self.rank]..offsets[self.rank + 1];
            if owned != self.owned {
                return Err(MeshForestError::InvalidCmesh(format!(
                    "owned range {:?} does not match offsets {:?}",
                    self.owned, owned
                )));
            }
        } else if self.trees.len() as u64 != self.num_trees {
            return Err(MeshForestError::InvalidCmesh(format!(
                "replicated cmesh holds {} of {} trees",
                self.trees.len(),
                self.num_trees
            )));
        }
        let first = self.first_local_tree();
        for (i, tree) in self.trees.iter().enumerate() {
            if tree.global_id != first + i as u64 {
                return Err(MeshForestError::InvalidCmesh(format!(
                    "held trees are not contiguous at local index {i}"
                )));
            }
            if tree.links.len() != tree.eclass.num_faces() {
                return Err(MeshForestError::InvalidCmesh(format!(
                    "tree {} has {} face links for class {}",
                    tree.global_id,
                    tree.links.len(),
                    tree.eclass
                )));
            }
        }
        if self.ghosts.windows(2).any(|w| w[0].global_id >= w[1].global_id) {
            return Err(MeshForestError::InvalidCmesh("ghost trees are not sorted".into()));
        }
        self.check_face_consistency()
    }
}
