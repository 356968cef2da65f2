//! 2:1 balance by rounds of refinement.
//!
//! Each round builds a ghost layer of the requested adjacency and refines
//! every local leaf that has a neighbor region refined by more than one
//! level along the part touching the leaf. Rounds continue until no process
//! refines anything. Each round raises the level of every violating leaf,
//! and the finest level present bounds the number of rounds.

use super::ghost::{build_layer, GhostConfig, GhostLayer};
use super::search::{resolve_offset, Resolution, TreeView};
use super::Forest;
use crate::algs::communicator::Communicator;
use crate::algs::exchange::all_reduce_or;
use crate::mesh_error::MeshForestError;
use crate::scheme::{Adjacency, Element};

/// Whether `e` in local tree `t` sees a neighbor more than one level finer.
fn violates(
    forest: &Forest,
    ghosts: &GhostLayer,
    t: usize,
    e: &Element,
    offsets: &[[i8; 3]],
    children: &mut Vec<Element>,
) -> Result<bool, MeshForestError> {
    let tree = &forest.trees[t];
    let scheme = forest.schemes.scheme(tree.eclass())?;
    for &offset in offsets {
        let Resolution::Found(found) = resolve_offset(forest, &tree.tree, scheme, e, offset)? else {
            continue;
        };
        let view = TreeView::new(forest, Some(ghosts), found.tree, found.eclass)?;
        if !view.covering(&found.region).is_empty() {
            continue;
        }
        view.scheme.contact_children(&found.region, found.contact, children);
        if children.iter().any(|c| view.is_refined(c)) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Refine `forest` until no leaf has a neighbor within `adjacency` that is
/// more than one level finer. Returns the number of refining rounds.
pub(crate) fn balance<C: Communicator>(
    forest: &mut Forest,
    comm: &C,
    adjacency: Adjacency,
) -> Result<usize, MeshForestError> {
    let config = GhostConfig {
        kind: adjacency,
        version: 3,
    };
    let mut rounds = 0;
    let mut children = Vec::new();
    let mut refined_children = Vec::new();
    loop {
        let ghosts = build_layer(forest, comm, config)?;
        let mut marks = Vec::with_capacity(forest.trees.len());
        let mut any = false;
        for (t, tree) in forest.trees.iter().enumerate() {
            let scheme = forest.schemes.scheme(tree.eclass())?;
            let offsets = scheme.neighbor_offsets(adjacency);
            let tree_marks = tree
                .elements
                .iter()
                .map(|e| violates(forest, &ghosts, t, e, &offsets, &mut children))
                .collect::<Result<Vec<bool>, _>>()?;
            any |= tree_marks.iter().any(|&m| m);
            marks.push(tree_marks);
        }

        if !all_reduce_or(comm, any)? {
            break;
        }
        rounds += 1;
        let mut refined = 0usize;
        for (t, tree_marks) in marks.iter().enumerate() {
            let scheme = forest.schemes.scheme(forest.trees[t].eclass())?;
            let old = std::mem::take(&mut forest.trees[t].elements);
            let mut new = Vec::with_capacity(old.len());
            for (i, (e, &mark)) in old.iter().zip(tree_marks).enumerate() {
                if !mark {
                    new.push(*e);
                    continue;
                }
                if scheme.level(e) >= scheme.max_level() {
                    return Err(MeshForestError::LevelOverflow {
                        tree: t,
                        element: i,
                        max_level: scheme.max_level(),
                    });
                }
                scheme.children(e, &mut refined_children);
                new.extend_from_slice(&refined_children);
                refined += 1;
            }
            forest.trees[t].elements = new;
        }
        log::debug!(
            "[balance] rank {}: round {rounds} refined {refined} leaves ({adjacency:?})",
            forest.rank
        );
        forest.refresh_partition(comm)?;
    }
    log::debug!("[balance] rank {}: balanced after {rounds} rounds", forest.rank);
    Ok(rounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::cmesh::CmeshBuilder;
    use crate::eclass::ElementClass;
    use crate::scheme::{QuadScheme, Scheme, SchemeSet};

    /// Refine `depth` times the leaf touching the center of the unit square
    /// from the lower left.
    fn center_refined(depth: u8) -> Forest {
        let cmesh = CmeshBuilder::hypercube(ElementClass::Quad)
            .unwrap()
            .commit(&NoComm)
            .unwrap();
        let mut forest = Forest::new_uniform(cmesh, SchemeSet::default_schemes(), 1, &NoComm).unwrap();
        let scheme = QuadScheme::default();
        let mut kids = Vec::new();
        let mut target = forest.trees[0].elements[0];
        for _ in 0..depth {
            let idx = forest.trees[0].elements.iter().position(|e| *e == target).unwrap();
            scheme.children(&target, &mut kids);
            forest.trees[0].elements.splice(idx..=idx, kids.iter().copied());
            target = kids[3];
        }
        forest.refresh_partition(&NoComm).unwrap();
        forest
    }

    fn violations(forest: &Forest) -> usize {
        let ghosts = GhostLayer::default();
        let offsets = QuadScheme::default().neighbor_offsets(Adjacency::Corners);
        let mut children = Vec::new();
        forest.trees[0]
            .elements
            .iter()
            .filter(|e| violates(forest, &ghosts, 0, e, &offsets, &mut children).unwrap())
            .count()
    }

    #[test]
    fn balanced_uniform_forest_needs_no_round() {
        let cmesh = CmeshBuilder::brick_2d(2, 1, false, false).commit(&NoComm).unwrap();
        let mut forest = Forest::new_uniform(cmesh, SchemeSet::default_schemes(), 2, &NoComm).unwrap();
        assert_eq!(balance(&mut forest, &NoComm, Adjacency::Corners).unwrap(), 0);
        assert_eq!(forest.local_num_elements(), 32);
    }

    #[test]
    fn deep_corner_refinement_is_balanced() {
        let mut forest = center_refined(4);
        assert!(violations(&forest) > 0);
        let rounds = balance(&mut forest, &NoComm, Adjacency::Corners).unwrap();
        assert!(rounds >= 1);
        assert_eq!(violations(&forest), 0);
        // leaves stay sorted and non-overlapping
        use crate::debug_invariants::DebugInvariants;
        forest.validate_invariants().unwrap();
    }

    #[test]
    fn face_balance_refines_less_than_corner_balance() {
        let mut by_face = center_refined(3);
        let mut by_corner = by_face.clone();
        balance(&mut by_face, &NoComm, Adjacency::Faces).unwrap();
        balance(&mut by_corner, &NoComm, Adjacency::Corners).unwrap();
        assert!(by_face.local_num_elements() <= by_corner.local_num_elements());
    }
}
