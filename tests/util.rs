#![allow(dead_code)]
use mesh_forest::prelude::*;
use std::sync::Arc;

/// Run `f` once per rank of an `n`-rank thread group; results in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&ThreadComm) -> T + Sync,
{
    let comms = ThreadComm::group(n);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = comms.iter().map(|comm| s.spawn(move || f(comm))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// `nx * ny` quad brick, replicated on every rank of `comm`.
pub fn brick<C: Communicator>(nx: u64, ny: u64, comm: &C) -> Arc<Cmesh> {
    CmeshBuilder::brick_2d(nx, ny, false, false).commit(comm).unwrap()
}

pub fn uniform<C: Communicator>(cmesh: Arc<Cmesh>, schemes: Arc<SchemeSet>, level: u8, comm: &C) -> Arc<Forest> {
    let mut builder = ForestBuilder::new();
    builder.set_cmesh(cmesh, schemes).set_level(level);
    builder.commit(comm).unwrap()
}

/// Local leaves as (global tree, element) pairs in curve order.
pub fn leaves(forest: &Forest) -> Vec<(u64, Element)> {
    forest
        .local_trees()
        .iter()
        .flat_map(|t| t.elements().iter().map(move |e| (t.global_id(), *e)))
        .collect()
}

/// Concatenate per-rank results in rank order.
pub fn concat<T>(parts: Vec<Vec<T>>) -> Vec<T> {
    parts.into_iter().flatten().collect()
}
