mod util;
use util::*;

use mesh_forest::forest::LeafLocation;
use mesh_forest::prelude::*;
use mesh_forest::scheme::{element_len, ROOT_LEN, SUBELEMENT_OUTER_FACE};
use std::sync::Arc;

/// Refine towards the lower right corner of tree 0, down to `depth`.
fn corner_refined<C: Communicator>(depth: u8, comm: &C) -> Arc<Forest> {
    let from = uniform(brick(2, 1, comm), SchemeSet::default_schemes(), 1, comm);
    let mut builder = ForestBuilder::new();
    builder.set_adapt(
        from,
        Box::new(move |q: &AdaptQuery<'_>| {
            let e = q.element();
            let len = element_len(e.level());
            if q.global_tree == 0 && e.level() < depth && e.anchor()[0] + len == ROOT_LEN && e.anchor()[1] == 0 {
                AdaptAction::Refine
            } else {
                AdaptAction::Keep
            }
        }),
        true,
    );
    builder.commit(comm).unwrap()
}

/// Refine the leaf touching the center of a unit square from the lower left,
/// down to `depth`.
fn center_refined(depth: u8) -> Arc<Forest> {
    let cmesh = CmeshBuilder::hypercube(ElementClass::Quad)
        .unwrap()
        .commit(&NoComm)
        .unwrap();
    let from = uniform(cmesh, SchemeSet::default_schemes(), 1, &NoComm);
    let mut builder = ForestBuilder::new();
    builder.set_adapt(
        from,
        Box::new(move |q: &AdaptQuery<'_>| {
            let e = q.element();
            let end = e.anchor()[0] + element_len(e.level());
            if e.level() < depth && end == ROOT_LEN / 2 && e.anchor()[1] + element_len(e.level()) == ROOT_LEN / 2 {
                AdaptAction::Refine
            } else {
                AdaptAction::Keep
            }
        }),
        true,
    );
    builder.commit(&NoComm).unwrap()
}

fn balanced<C: Communicator>(from: Arc<Forest>, comm: &C) -> Arc<Forest> {
    let mut builder = ForestBuilder::new();
    builder.set_from(from).set_balance(true);
    builder.commit(comm).unwrap()
}

#[test]
fn balance_does_not_depend_on_the_partition() {
    let serial = balanced(corner_refined(5, &NoComm), &NoComm);
    assert!(serial.is_balanced());
    let parallel = concat(run_ranks(2, |comm| {
        let forest = balanced(corner_refined(5, comm), comm);
        assert!(forest.is_balanced());
        leaves(&forest)
    }));
    assert_eq!(parallel, leaves(&serial));
    // the refinement spread into tree 1
    assert!(parallel.iter().any(|(tree, e)| *tree == 1 && e.level() > 2));
}

#[test]
fn balanced_forest_stays_put() {
    let once = balanced(corner_refined(4, &NoComm), &NoComm);
    let twice = balanced(Arc::clone(&once), &NoComm);
    assert_eq!(leaves(&once), leaves(&twice));
}

#[test]
fn ghost_versions_agree() {
    run_ranks(3, |comm| {
        let from = uniform(brick(2, 2, comm), SchemeSet::default_schemes(), 1, comm);
        let mut builder = ForestBuilder::new();
        builder.set_adapt(
            from,
            Box::new(|q: &AdaptQuery<'_>| {
                if q.global_tree == 0 {
                    AdaptAction::Refine
                } else {
                    AdaptAction::Keep
                }
            }),
            false,
        );
        builder.set_partition(true);
        let adapted = builder.commit(comm).unwrap();

        let layers: Vec<Vec<u8>> = (1..=3)
            .map(|version| {
                let mut builder = ForestBuilder::new();
                builder
                    .set_from(Arc::clone(&adapted))
                    .set_ghost_ext(true, Adjacency::Corners, version);
                let forest = builder.commit(comm).unwrap();
                let ghosts = forest.ghosts().unwrap();
                assert!(!ghosts.is_empty());
                for g in ghosts.elements() {
                    assert_ne!(g.owner, comm.rank());
                    assert!(g.owner_index < forest.global_num_elements());
                }
                let bytes = ghosts.to_bytes().unwrap();
                assert_eq!(bytes, ghosts.to_bytes().unwrap());
                bytes
            })
            .collect();
        assert_eq!(layers[0], layers[1]);
        assert_eq!(layers[1], layers[2]);
    });
}

#[test]
fn face_ghosts_are_a_subset_of_corner_ghosts() {
    // one tree per process; the diagonal tree only touches at a corner
    run_ranks(4, |comm| {
        let from = uniform(brick(2, 2, comm), SchemeSet::default_schemes(), 2, comm);
        let layer = |kind: Adjacency| {
            let mut builder = ForestBuilder::new();
            builder.set_from(Arc::clone(&from)).set_ghost_ext(true, kind, 3);
            let forest = builder.commit(comm).unwrap();
            forest.ghosts().unwrap().elements().to_vec()
        };
        let faces = layer(Adjacency::Faces);
        let corners = layer(Adjacency::Corners);
        assert!(faces.len() < corners.len());
        assert!(faces.iter().all(|g| corners.contains(g)));
        // tree 3 is the diagonal of tree 0 and only shares its corner
        let diagonal = 3 - comm.rank() as u64;
        assert!(!faces.iter().any(|g| g.tree == diagonal));
        assert_eq!(corners.iter().filter(|g| g.tree == diagonal).count(), 1);
    });
}

#[test]
fn uniform_face_neighbors_across_processes() {
    let counts = run_ranks(2, |comm| {
        let from = uniform(brick(2, 1, comm), SchemeSet::default_schemes(), 2, comm);
        let mut builder = ForestBuilder::new();
        builder.set_from(from).set_ghost(true);
        let forest = builder.commit(comm).unwrap();
        let ghosts = forest.ghosts().unwrap();

        let mut found = 0;
        for (t, i, e) in forest.iter_elements() {
            for face in 0..4 {
                let nbrs = forest.leaf_face_neighbors(t, i, face, true).unwrap();
                assert!(nbrs.len() <= 1);
                for n in nbrs.iter() {
                    assert_eq!(n.element.level(), e.level());
                    assert_eq!(n.dual_face, face ^ 1);
                    match n.location {
                        LeafLocation::Local { tree, index } => {
                            let back = forest.leaf_face_neighbors(tree, index, n.dual_face, true).unwrap();
                            assert!(back.iter().any(|b| b.element == *e));
                        }
                        LeafLocation::Ghost { index } => {
                            let ghost = ghosts.element(index).unwrap();
                            assert_eq!(ghost.element, n.element);
                            assert_eq!(Some(ghost.tree), nbrs.global_tree);
                        }
                    }
                }
                found += nbrs.len();
            }
        }
        found
    });
    // 32 leaves with 4 faces each, 24 of them on the domain boundary
    assert_eq!(counts.iter().sum::<usize>(), 32 * 4 - 24);
}

#[test]
fn hanging_faces_report_every_finer_leaf() {
    let forest = center_refined(3);
    assert_eq!(forest.local_num_elements(), 10);
    let half = ROOT_LEN / 2;
    let index = forest
        .local_trees()[0]
        .elements()
        .iter()
        .position(|e| e.level() == 1 && e.anchor() == [half, 0, 0])
        .unwrap();

    let nbrs = forest.leaf_face_neighbors(0, index, 0, false).unwrap();
    let levels: Vec<u8> = nbrs.iter().map(|n| n.element.level()).collect();
    assert_eq!(levels, vec![2, 3, 3]);
    assert!(nbrs.iter().all(|n| n.dual_face == 1));

    assert_eq!(
        forest.leaf_face_neighbors(0, index, 0, true).unwrap_err(),
        MeshForestError::NotBalanced {
            tree: 0,
            element: index,
            face: 0
        }
    );
    assert!(matches!(
        forest.leaf_face_neighbors(0, index, 4, false),
        Err(MeshForestError::FaceOutOfRange { face: 4, num_faces: 4 })
    ));
    // the lower boundary has no neighbor
    assert!(forest.leaf_face_neighbors(0, index, 2, false).unwrap().is_empty());
}

#[test]
fn transitioned_forest_is_conformal() {
    let cmesh = brick(2, 1, &NoComm);
    let from = uniform(cmesh, SchemeSet::transition_schemes(), 1, &NoComm);
    let mut builder = ForestBuilder::new();
    builder.set_adapt(
        from,
        Box::new(|q: &AdaptQuery<'_>| {
            if q.global_tree == 1 && q.element().anchor() == [0, 0, 0] {
                AdaptAction::Refine
            } else {
                AdaptAction::Keep
            }
        }),
        false,
    );
    builder.set_transition(true);
    let forest = builder.commit(&NoComm).unwrap();
    assert!(forest.is_transitioned());
    assert!(forest.iter_elements().any(|(t, _, e)| t == 0 && e.subelement().is_some()));

    // the split face of tree 0 is matched by two subelement outer faces
    let across: Vec<_> = forest
        .iter_elements()
        .filter(|(t, _, e)| *t == 0 && e.subelement().is_some())
        .filter_map(|(t, i, _)| {
            let nbrs = forest.leaf_face_neighbors(t, i, SUBELEMENT_OUTER_FACE, false).unwrap();
            (nbrs.global_tree == Some(1)).then_some(nbrs)
        })
        .collect();
    assert_eq!(across.len(), 2);
    assert!(across.iter().all(|n| n.len() == 1 && n.neighbors[0].element.level() == 2));

    let scheme = forest.scheme(ElementClass::Quad).unwrap();
    for (t, i, e) in forest.iter_elements() {
        for face in 0..scheme.num_faces(e) {
            let nbrs = forest.leaf_face_neighbors(t, i, face, false).unwrap();
            assert!(nbrs.len() <= 1, "leaf {i} of tree {t} face {face}: {} neighbors", nbrs.len());
            for n in nbrs.iter() {
                let LeafLocation::Local { tree, index } = n.location else {
                    panic!("single process forest has no ghosts");
                };
                let back = forest.leaf_face_neighbors(tree, index, n.dual_face, false).unwrap();
                assert!(back.iter().any(|b| b.element == *e));
            }
        }
    }
}

#[test]
fn corner_balance_crosses_the_tree_corner() {
    // tree 0 refined towards the corner it shares with trees 1, 2 and 3
    let from = uniform(brick(2, 2, &NoComm), SchemeSet::default_schemes(), 1, &NoComm);
    let mut builder = ForestBuilder::new();
    builder.set_adapt(
        from,
        Box::new(|q: &AdaptQuery<'_>| {
            let e = q.element();
            let end = element_len(e.level());
            if q.global_tree == 0 && e.level() < 5 && e.anchor()[0] + end == ROOT_LEN && e.anchor()[1] + end == ROOT_LEN {
                AdaptAction::Refine
            } else {
                AdaptAction::Keep
            }
        }),
        true,
    );
    let refined = builder.commit(&NoComm).unwrap();
    let forest = balanced(refined, &NoComm);
    assert!(forest.is_balanced());

    // level of the leaf of `tree` containing the finest cell at `point`
    let level_at = |tree: u64, point: [u32; 2]| {
        leaves(&forest)
            .into_iter()
            .find(|(t, e)| {
                let len = element_len(e.level());
                *t == tree && (0..2).all(|a| e.anchor()[a] <= point[a] && point[a] < e.anchor()[a] + len)
            })
            .map(|(_, e)| e.level())
            .unwrap()
    };
    let last = ROOT_LEN - 1;
    assert_eq!(level_at(0, [last, last]), 5);
    assert!(level_at(3, [0, 0]) >= 4);
    assert!(level_at(1, [0, last]) >= 4);
    assert!(level_at(2, [last, 0]) >= 4);
}

#[test]
fn missing_ghost_differs_from_domain_boundary() {
    run_ranks(2, |comm| {
        let forest = uniform(brick(2, 1, comm), SchemeSet::default_schemes(), 1, comm);
        assert!(forest.ghosts().is_none());
        // rank 0 holds tree 0, rank 1 holds tree 1
        let (index, inner, outer) = if comm.rank() == 0 { (1, 1, 2) } else { (0, 0, 2) };
        assert_eq!(
            forest.leaf_face_neighbors(0, index, inner, false).unwrap_err(),
            MeshForestError::MissingGhost {
                tree: 0,
                element: index,
                face: inner
            }
        );
        let boundary = forest.leaf_face_neighbors(0, index, outer, false).unwrap();
        assert!(boundary.is_empty());
        assert_eq!(boundary.global_tree, None);
    });
}

#[test]
fn balanced_query_rejects_a_coarse_neighbor_from_the_fine_side() {
    let forest = center_refined(3);
    let index = forest.local_trees()[0]
        .elements()
        .iter()
        .position(|e| e.level() == 3 && e.anchor() == [3 * ROOT_LEN / 8, ROOT_LEN / 4, 0])
        .unwrap();

    let nbrs = forest.leaf_face_neighbors(0, index, 1, false).unwrap();
    assert_eq!(nbrs.len(), 1);
    assert_eq!(nbrs.neighbors[0].element.level(), 1);
    assert_eq!(nbrs.neighbors[0].dual_face, 0);
    assert_eq!(
        forest.leaf_face_neighbors(0, index, 1, true).unwrap_err(),
        MeshForestError::NotBalanced {
            tree: 0,
            element: index,
            face: 1
        }
    );
}

#[test]
fn finer_side_sees_one_coarser_neighbor() {
    let forest = balanced(corner_refined(4, &NoComm), &NoComm);
    let mut checked = 0;
    for (t, i, e) in forest.iter_elements() {
        for face in 0..4 {
            let nbrs = forest.leaf_face_neighbors(t, i, face, true).unwrap();
            let Some(first) = nbrs.neighbors.first() else {
                continue;
            };
            if first.element.level() >= e.level() {
                continue;
            }
            assert_eq!(nbrs.len(), 1);
            assert_eq!(first.element.level() + 1, e.level());
            let LeafLocation::Local { tree, index } = first.location else {
                panic!("single process forest has no ghosts");
            };
            let back = forest.leaf_face_neighbors(tree, index, first.dual_face, true).unwrap();
            assert_eq!(back.len(), 2);
            assert!(back.iter().any(|b| b.element == *e && b.dual_face == face));
            checked += 1;
        }
    }
    assert!(checked > 0);
}
