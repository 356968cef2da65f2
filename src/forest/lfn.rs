//! Leaf face neighbors.
//!
//! The neighbor query constructs the same-level neighbor region across the
//! face, following the coarse-mesh link when the face lies on the tree
//! boundary, then searches the sorted leaves of the neighbor tree (local
//! first, then ghosts). A covering leaf answers with a single neighbor; a
//! refined region answers with the leaves touching its face. Subelement
//! faces resolve either to a sibling of the same group or, for the outer
//! face, through the hierarchical region the face lies on.

use super::search::{resolve_face, ResolvedRegion, TreeView};
use super::Forest;
use crate::eclass::ElementClass;
use crate::mesh_error::MeshForestError;
use crate::scheme::{Contact, Element, Scheme, SUBELEMENT_OUTER_FACE};
use smallvec::SmallVec;

/// Where a neighbor leaf is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeafLocation {
    /// A local leaf: local tree index and index in that tree.
    Local { tree: usize, index: usize },
    /// An entry of the forest's ghost layer.
    Ghost { index: usize },
}

/// One neighbor leaf across a face.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborLeaf {
    pub element: Element,
    /// The neighbor's face that touches the queried face.
    pub dual_face: usize,
    pub location: LeafLocation,
}

/// Result of a leaf face neighbor query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeafFaceNeighbors {
    pub neighbors: SmallVec<[NeighborLeaf; 4]>,
    /// Class of the neighbor tree, `None` on the domain boundary.
    pub eclass: Option<ElementClass>,
    /// Global id of the neighbor tree, `None` on the domain boundary.
    pub global_tree: Option<u64>,
}

impl LeafFaceNeighbors {
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborLeaf> {
        self.neighbors.iter()
    }
}

impl Forest {
    /// Neighbor leaves of local leaf `element_index` of local tree
    /// `local_tree` across `face`, in curve order.
    ///
    /// With `balanced`, a refined neighbor region must be split exactly once
    /// along the face; otherwise [`MeshForestError::NotBalanced`] is
    /// returned. Without it, leaves of any level touching the face are
    /// collected. Remote neighbors are found only through the ghost layer;
    /// a remote neighbor missing from it is [`MeshForestError::MissingGhost`],
    /// while a face on the domain boundary yields no neighbor.
    pub fn leaf_face_neighbors(
        &self,
        local_tree: usize,
        element_index: usize,
        face: usize,
        balanced: bool,
    ) -> Result<LeafFaceNeighbors, MeshForestError> {
        let tree = self.tree(local_tree)?;
        let e = *self.element_in_tree(local_tree, element_index)?;
        let scheme = self.schemes.scheme(tree.eclass())?;
        let num_faces = scheme.num_faces(&e);
        if face >= num_faces {
            return Err(MeshForestError::FaceOutOfRange { face, num_faces });
        }

        let (source, source_face) = match e.subelement() {
            None => (e, face),
            Some(_) if face != SUBELEMENT_OUTER_FACE => {
                return self.sibling_neighbor(local_tree, &e, face, scheme);
            }
            Some(_) => scheme
                .subelement_face_region(&e)
                .map(|(f, r)| (r, f))
                .ok_or_else(|| MeshForestError::NotALeaf(scheme.to_string(&e)))?,
        };

        let Some((found, dual)) = resolve_face(&tree.tree, scheme, &source, source_face) else {
            return Ok(LeafFaceNeighbors::default());
        };
        let view = TreeView::new(self, self.ghosts.as_ref(), found.tree, found.eclass)?;
        let mut neighbors: SmallVec<[NeighborLeaf; 4]> = SmallVec::new();

        let covering = view.covering(&found.region);
        if let Some((_, coarse)) = covering.first() {
            if balanced && e.level() > coarse.level() + 1 {
                return Err(MeshForestError::NotBalanced {
                    tree: local_tree,
                    element: element_index,
                    face,
                });
            }
            collect_face_leaves(view.scheme, &found.region, dual, &covering, &mut neighbors);
        } else if !view.has_descendants(&found.region) {
            log::debug!(
                "[lfn] rank {}: neighbor of tree {local_tree} element {element_index} face {face} is not visible",
                self.rank
            );
            return Err(MeshForestError::MissingGhost {
                tree: local_tree,
                element: element_index,
                face,
            });
        } else if balanced {
            self.balanced_children(&view, &found, dual, &mut neighbors)
                .ok_or(MeshForestError::NotBalanced {
                    tree: local_tree,
                    element: element_index,
                    face,
                })?;
        } else {
            let contact = Contact::face(dual);
            for (location, leaf) in view.descendants(&found.region) {
                let touches = match leaf.subelement() {
                    None => view.scheme.touches_contact(&found.region, &leaf, contact),
                    Some(_) => view
                        .scheme
                        .subelement_face_region(&leaf)
                        .is_some_and(|(f, r)| f == dual && view.scheme.touches_contact(&found.region, &r, contact)),
                };
                if touches {
                    neighbors.push(NeighborLeaf {
                        element: leaf,
                        dual_face: dual_of(&leaf, dual),
                        location,
                    });
                }
            }
        }

        neighbors.sort_by(|a, b| view.scheme.compare(&a.element, &b.element));
        Ok(LeafFaceNeighbors {
            neighbors,
            eclass: Some(found.eclass),
            global_tree: Some(found.tree),
        })
    }

    fn sibling_neighbor(
        &self,
        local_tree: usize,
        e: &Element,
        face: usize,
        scheme: &dyn Scheme,
    ) -> Result<LeafFaceNeighbors, MeshForestError> {
        let tree = self.tree(local_tree)?;
        let (sibling, dual) = scheme
            .sibling_subelement(e, face)
            .ok_or_else(|| MeshForestError::NotALeaf(scheme.to_string(e)))?;
        let index = tree
            .elements
            .binary_search_by(|probe| scheme.compare(probe, &sibling))
            .map_err(|_| MeshForestError::NotALeaf(scheme.to_string(&sibling)))?;
        let mut neighbors = SmallVec::new();
        neighbors.push(NeighborLeaf {
            element: sibling,
            dual_face: dual,
            location: LeafLocation::Local {
                tree: local_tree,
                index,
            },
        });
        Ok(LeafFaceNeighbors {
            neighbors,
            eclass: Some(tree.eclass()),
            global_tree: Some(tree.global_id()),
        })
    }

    /// Neighbors of a region refined exactly once along its face `dual`.
    fn balanced_children(
        &self,
        view: &TreeView<'_>,
        found: &ResolvedRegion,
        dual: usize,
        out: &mut SmallVec<[NeighborLeaf; 4]>,
    ) -> Option<()> {
        let mut children = Vec::new();
        view.scheme.children_at_face(&found.region, dual, &mut children);
        for child in &children {
            let covering = view.covering(child);
            match covering.first() {
                Some((_, leaf)) if leaf.level() == child.level() => {
                    collect_face_leaves(view.scheme, child, dual, &covering, out);
                }
                _ => return None,
            }
        }
        Some(())
    }
}

/// Face of `leaf` touching a neighbor across `dual`.
fn dual_of(leaf: &Element, dual: usize) -> usize {
    if leaf.subelement().is_some() {
        SUBELEMENT_OUTER_FACE
    } else {
        dual
    }
}

/// The leaves among `covering` (one leaf, or one subelement group) that
/// touch face `dual` of `region`.
fn collect_face_leaves(
    scheme: &dyn Scheme,
    region: &Element,
    dual: usize,
    covering: &[(LeafLocation, Element)],
    out: &mut SmallVec<[NeighborLeaf; 4]>,
) {
    for &(location, leaf) in covering {
        let touches = match leaf.subelement() {
            None => true,
            Some(_) => scheme.subelement_face_region(&leaf).is_some_and(|(f, r)| {
                f == dual && (scheme.is_ancestor(&r, region) || scheme.is_ancestor(region, &r))
            }),
        };
        if touches {
            out.push(NeighborLeaf {
                element: leaf,
                dual_face: dual_of(&leaf, dual),
                location,
            });
        }
    }
}

