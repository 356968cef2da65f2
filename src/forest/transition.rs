//! Transition pass: conformal subelement groups at hanging faces.
//!
//! After a face-only 2:1 pass every face of a leaf is split at most once.
//! Each leaf with at least one split face is then replaced by the
//! subelement group of its split-face mask. Undoing a transition replaces
//! every group by the quad it was built from.

use super::balance::balance;
use super::ghost::{build_layer, GhostConfig};
use super::search::{resolve_face, TreeView};
use super::{Forest, LocalTree};
use crate::algs::communicator::Communicator;
use crate::mesh_error::MeshForestError;
use crate::scheme::{Adjacency, Element};

/// Replace every subelement group by its base quad.
///
/// Returns the new local trees and, for each new local leaf, the local index
/// of the old leaf it comes from (the first subelement of a group).
pub(crate) fn untransition(forest: &Forest) -> (Vec<LocalTree>, Vec<usize>) {
    let mut origin = Vec::with_capacity(forest.local_num_elements() as usize);
    let trees = forest
        .trees
        .iter()
        .map(|tree| {
            let mut elements: Vec<Element> = Vec::with_capacity(tree.elements.len());
            for (i, e) in tree.elements.iter().enumerate() {
                let base = e.without_subelement();
                if e.subelement().is_some() && elements.last() == Some(&base) {
                    continue;
                }
                elements.push(base);
                origin.push(tree.element_offset as usize + i);
            }
            LocalTree::new(tree.tree.clone(), elements)
        })
        .collect();
    (trees, origin)
}

/// Run the transition pass on `forest`.
pub(crate) fn transition<C: Communicator>(forest: &mut Forest, comm: &C) -> Result<(), MeshForestError> {
    for tree in forest.cmesh.local_trees() {
        if !forest.schemes.scheme(tree.eclass())?.supports_transition() {
            return Err(MeshForestError::TransitionUnsupported(tree.eclass()));
        }
    }
    balance(forest, comm, Adjacency::Faces)?;
    let ghosts = build_layer(
        forest,
        comm,
        GhostConfig {
            kind: Adjacency::Faces,
            version: 3,
        },
    )?;

    let mut group = Vec::new();
    let mut replaced = 0usize;
    let mut trees = Vec::with_capacity(forest.trees.len());
    for tree in &forest.trees {
        let scheme = forest.schemes.scheme(tree.eclass())?;
        let mut elements = Vec::with_capacity(tree.elements.len());
        for e in &tree.elements {
            let mut transition_type = 0u8;
            for face in 0..scheme.num_faces(e) {
                let Some((found, _)) = resolve_face(&tree.tree, scheme, e, face) else {
                    continue;
                };
                let view = TreeView::new(forest, Some(&ghosts), found.tree, found.eclass)?;
                if view.is_refined(&found.region) {
                    transition_type |= 1 << face;
                }
            }
            if transition_type == 0 {
                elements.push(*e);
            } else {
                scheme.transition(e, transition_type, &mut group);
                elements.extend_from_slice(&group);
                replaced += 1;
            }
        }
        trees.push(LocalTree::new(tree.tree.clone(), elements));
    }
    forest.trees = trees;
    forest.refresh_partition(comm)?;
    forest.is_transitioned = true;
    forest.is_balanced = false;
    log::debug!(
        "[transition] rank {}: {replaced} leaves replaced by subelement groups",
        forest.rank
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::cmesh::CmeshBuilder;
    use crate::eclass::ElementClass;
    use crate::scheme::{QuadScheme, Scheme, SchemeSet};

    fn quad_forest(schemes: std::sync::Arc<SchemeSet>) -> Forest {
        let cmesh = CmeshBuilder::hypercube(ElementClass::Quad)
            .unwrap()
            .commit(&NoComm)
            .unwrap();
        let mut forest = Forest::new_uniform(cmesh, schemes, 1, &NoComm).unwrap();
        // refine the lower-left quarter once
        let mut kids = Vec::new();
        QuadScheme::default().children(&forest.trees[0].elements[0], &mut kids);
        forest.trees[0].elements.splice(0..1, kids);
        forest.refresh_partition(&NoComm).unwrap();
        forest
    }

    #[test]
    fn hanging_faces_become_subelement_groups() {
        let mut forest = quad_forest(SchemeSet::transition_schemes());
        transition(&mut forest, &NoComm).unwrap();
        assert!(forest.is_transitioned());
        let leaves = &forest.trees[0].elements;
        // quarter 1 has its face 0 split, quarter 2 its face 2; quarter 3 is untouched
        let sub = |e: &Element| e.subelement().map(|s| s.transition_type);
        assert_eq!(leaves.len(), 4 + 5 + 5 + 1);
        assert!(leaves[..4].iter().all(|e| e.subelement().is_none()));
        assert!(leaves[4..9].iter().all(|e| sub(e) == Some(0b0001)));
        assert!(leaves[9..14].iter().all(|e| sub(e) == Some(0b0100)));
        assert_eq!(leaves[14].subelement(), None);

        let (trees, origin) = untransition(&forest);
        assert_eq!(trees[0].elements.len(), 7);
        assert_eq!(origin, vec![0, 1, 2, 3, 4, 9, 14]);
    }

    #[test]
    fn classes_without_transition_are_rejected() {
        let mut forest = quad_forest(SchemeSet::default_schemes());
        assert_eq!(
            transition(&mut forest, &NoComm),
            Err(MeshForestError::TransitionUnsupported(ElementClass::Quad))
        );
    }
}
