#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-forest
//!
//! mesh-forest manages distributed adaptive meshes as a forest of trees: a
//! coarse mesh of trees (lines, quadrilaterals, hexahedra, ...) connected
//! across faces, each tree recursively refined into leaf elements that are
//! stored in space-filling-curve order and split across processes.
//!
//! ## Features
//! - Coarse mesh partitioning by tree ranges, with shared first trees and
//!   ghost trees
//! - Forest derivation: adapt (callback or batch markers), 2:1 balance,
//!   conformal transition subelements and equal-share repartitioning
//! - Ghost layers across faces, edges or corners
//! - Leaf face neighbors across tree and process boundaries
//! - Pluggable communicators: serial, in-process threads, and MPI
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-forest = "0.1"
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! Every construction and derivation is collective: all processes of the
//! communicator must call [`ForestBuilder::commit`](forest::ForestBuilder::commit)
//! with consistent settings, in the same order.

pub mod algs;
pub mod cmesh;
pub mod debug_invariants;
pub mod eclass;
pub mod forest;
pub mod mesh_error;
pub mod scheme;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, ThreadComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::cmesh::{Cmesh, CmeshBuilder, FaceLink, Tree};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::eclass::ElementClass;
    pub use crate::forest::{
        AdaptAction, AdaptQuery, Forest, ForestBuilder, GhostLayer, LeafFaceNeighbors,
        LeafLocation, NeighborLeaf,
    };
    pub use crate::mesh_error::MeshForestError;
    pub use crate::scheme::{Adjacency, Element, Scheme, SchemeSet};
}
