//! MeshForestError: Unified error type for mesh-forest public APIs
//!
//! Every failure in this crate is non-recoverable for the process group: the
//! collective protocols assume all processes stay in lock-step, so callers are
//! expected to abort on `Err`. The variants still carry enough context to name
//! the invariant that failed and where.

use crate::eclass::ElementClass;
use thiserror::Error;

/// Unified error type for mesh-forest operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshForestError {
    /// A builder was committed without the configuration it requires.
    #[error("Missing configuration: {0}")]
    MissingConfiguration(&'static str),
    /// Two settings that exclude each other were requested on one builder.
    #[error("Conflicting configuration: `{0}` cannot be combined with `{1}`")]
    ConflictingConfiguration(&'static str, &'static str),
    /// A decision marker outside `{-1, 0, 1}`.
    #[error("Invalid adapt marker {value} for element {element} of tree {tree}")]
    InvalidAdaptMarker { tree: usize, element: usize, value: i64 },
    /// The batch marker array does not match the number of local leaves.
    #[error("Adapt marker count mismatch: expected {expected}, found {found}")]
    MarkerCountMismatch { expected: usize, found: usize },
    /// Coarsening was requested for an element that was not presented as a family.
    #[error("Coarsening requested for non-family element {element} of tree {tree}")]
    CoarsenNonFamily { tree: usize, element: usize },
    /// Refinement would exceed the scheme's maximum level.
    #[error("Element {element} of tree {tree} cannot be refined beyond level {max_level}")]
    LevelOverflow { tree: usize, element: usize, max_level: u8 },
    /// A local tree index outside `0..num_trees`.
    #[error("Tree index {tree} out of range (local trees: {num_trees})")]
    TreeOutOfRange { tree: usize, num_trees: usize },
    /// An element index outside the tree's element array.
    #[error("Element index {index} out of range in tree {tree} ({len} elements)")]
    ElementOutOfRange { tree: usize, index: usize, len: usize },
    /// A face index outside the element's face count.
    #[error("Face {face} out of range (element has {num_faces} faces)")]
    FaceOutOfRange { face: usize, num_faces: usize },
    /// No element scheme is registered for this class.
    #[error("No element scheme available for {0}")]
    UnsupportedElementClass(ElementClass),
    /// The class has no transitioned scheme variant.
    #[error("Transition is not available for {0}")]
    TransitionUnsupported(ElementClass),
    /// Partition offsets are not monotonic or do not span the tree range.
    #[error("Invalid partition offsets: {0}")]
    InvalidPartitionOffsets(String),
    /// Face connectivity is broken at the named tree and face.
    #[error("Face connectivity broken at tree {tree}, face {face}: {detail}")]
    FaceConnectivity { tree: u64, face: usize, detail: String },
    /// A tree required on this process is not available.
    #[error("Tree {0} is not available on this process")]
    MissingTree(u64),
    /// Ghost algorithm versions are 1, 2 and 3.
    #[error("Unknown ghost algorithm version {0}")]
    InvalidGhostVersion(u8),
    /// Malformed coarse mesh input.
    #[error("Invalid coarse mesh: {0}")]
    InvalidCmesh(String),
    /// A balanced query met a neighborhood that violates the 2:1 condition.
    #[error("Forest is not balanced at element {element} of tree {tree}, face {face}")]
    NotBalanced { tree: usize, element: usize, face: usize },
    /// The neighbor across a face lives on another process and is not in the
    /// ghost layer.
    #[error("Neighbor of element {element} of tree {tree} across face {face} is neither local nor a ghost")]
    MissingGhost { tree: usize, element: usize, face: usize },
    /// The requested element is not a leaf of the forest.
    #[error("Element {0} is not a leaf of this forest")]
    NotALeaf(String),
    /// A point-to-point message could not be completed.
    #[error("Communication with rank {neighbor} failed: {detail}")]
    CommError { neighbor: usize, detail: String },
    /// A received message could not be decoded.
    #[error("Wire format error: {0}")]
    WireFormat(String),
    /// An integer quantity exceeded its representable range.
    #[error("Arithmetic overflow while computing {0}")]
    Overflow(&'static str),
}
