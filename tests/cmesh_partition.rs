mod util;
use util::*;

use mesh_forest::cmesh::offsets_concentrate;
use mesh_forest::prelude::*;
use std::sync::Arc;

#[test]
fn uniform_partition_covers_every_tree_once() {
    let owned = run_ranks(3, |comm| {
        let mut builder = CmeshBuilder::brick_2d(4, 2, false, false);
        builder.set_partition_uniform(1, SchemeSet::default_schemes());
        let cmesh = builder.commit(comm).unwrap();
        assert!(cmesh.is_partitioned());
        assert_eq!(cmesh.num_trees(), 8);
        assert!(cmesh.is_face_consistent());
        // every face neighbor of a held tree is available locally
        for tree in cmesh.local_trees() {
            for id in tree.neighbor_ids() {
                assert!(cmesh.tree(id).is_some(), "tree {id} missing on rank {}", comm.rank());
            }
        }
        cmesh.owned_trees()
    });
    assert_eq!(owned[0].start, 0);
    assert_eq!(owned[2].end, 8);
    for pair in owned.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
}

#[test]
fn derived_cmesh_follows_explicit_offsets() {
    let results = run_ranks(3, |comm| {
        let mut builder = CmeshBuilder::brick_2d(4, 2, false, false);
        builder.set_partition_uniform(0, SchemeSet::default_schemes());
        let source = builder.commit(comm).unwrap();

        let mut builder = CmeshBuilder::new();
        builder
            .set_derive(source)
            .set_partition_offsets(offsets_concentrate(1, 3, 8));
        let cmesh = builder.commit(comm).unwrap();
        (cmesh.owned_trees(), cmesh.num_local_trees(), cmesh.partition_table().map(<[u64]>::to_vec))
    });
    assert_eq!(results[0].0, 0..0);
    assert_eq!(results[1].0, 0..8);
    assert_eq!(results[2].0, 8..8);
    assert_eq!(results[1].1, 8);
    for (_, _, table) in &results {
        assert_eq!(table.as_deref(), Some(&[0, 0, 8, 8][..]));
    }
}

#[test]
fn forest_on_partitioned_cmesh_matches_replicated() {
    let (partitioned, replicated): (Vec<_>, Vec<_>) = run_ranks(3, |comm| {
        let mut builder = CmeshBuilder::brick_2d(3, 2, false, false);
        builder.set_partition_uniform(2, SchemeSet::default_schemes());
        let cmesh = builder.commit(comm).unwrap();
        let a = uniform(cmesh, SchemeSet::default_schemes(), 2, comm);
        let b = uniform(brick(3, 2, comm), SchemeSet::default_schemes(), 2, comm);
        (leaves(&a), leaves(&b))
    })
    .into_iter()
    .unzip();
    assert_eq!(partitioned, replicated);
    assert_eq!(concat(partitioned).len(), 6 * 16);
}

#[test]
fn bad_offsets_are_rejected() {
    let cmesh = brick(2, 2, &NoComm);
    let mut builder = CmeshBuilder::new();
    builder.set_derive(cmesh).set_partition_offsets(vec![0, 3]);
    assert!(matches!(
        builder.commit(&NoComm),
        Err(MeshForestError::InvalidPartitionOffsets(_))
    ));
}

#[test]
fn concentrate_and_repartition_restores_the_cmesh() {
    run_ranks(3, |comm| {
        let derive = |source: &Arc<Cmesh>, offsets: Option<Vec<u64>>| {
            let mut builder = CmeshBuilder::new();
            builder.set_derive(Arc::clone(source));
            match offsets {
                Some(offsets) => builder.set_partition_offsets(offsets),
                None => builder.set_partition_uniform(1, SchemeSet::default_schemes()),
            };
            builder.commit(comm).unwrap()
        };
        let mut builder = CmeshBuilder::brick_2d(3, 2, true, true);
        builder.set_partition_uniform(1, SchemeSet::default_schemes());
        let original = builder.commit(comm).unwrap();

        for target in 0..comm.size() {
            let concentrated = derive(&original, Some(offsets_concentrate(target, comm.size(), 6)));
            let expected = if comm.rank() == target { 6 } else { 0 };
            assert_eq!(concentrated.owned_trees().count(), expected);
            assert!(concentrated.is_face_consistent());

            let restored = derive(&concentrated, None);
            assert!(restored.is_equal(&original), "round trip through rank {target}");
        }
    });
}
