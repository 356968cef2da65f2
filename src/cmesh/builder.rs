//! Configuration and commit of coarse meshes.

use super::partition::{self, Layout};
use super::tree::{FaceLink, Tree};
use super::Cmesh;
use crate::algs::communicator::Communicator;
use crate::debug_invariants::DebugInvariants;
use crate::eclass::ElementClass;
use crate::mesh_error::MeshForestError;
use crate::scheme::SchemeSet;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug)]
struct Join {
    tree1: u64,
    tree2: u64,
    face1: u8,
    face2: u8,
    orientation: u8,
}

#[derive(Clone, Debug)]
enum PartitionRequest {
    Uniform { level: u8, schemes: Arc<SchemeSet> },
    Offsets(Vec<u64>),
}

/// Collects trees, joins and partition settings until [`commit`](Self::commit).
///
/// Trees are either given explicitly (every process passes the same input)
/// or taken from a committed cmesh with [`set_derive`](Self::set_derive).
#[derive(Debug, Default)]
pub struct CmeshBuilder {
    classes: BTreeMap<u64, ElementClass>,
    vertices: BTreeMap<u64, Vec<[f64; 3]>>,
    joins: Vec<Join>,
    derive: Option<Arc<Cmesh>>,
    partition: Option<PartitionRequest>,
    conflict: Option<MeshForestError>,
}

impl CmeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn conflict(&mut self, a: &'static str, b: &'static str) {
        if self.conflict.is_none() {
            self.conflict = Some(MeshForestError::ConflictingConfiguration(a, b));
        }
    }

    /// Declare tree `global_id` with class `eclass`.
    pub fn set_tree_class(&mut self, global_id: u64, eclass: ElementClass) -> &mut Self {
        if self.derive.is_some() {
            self.conflict("set_tree_class", "set_derive");
        }
        self.classes.insert(global_id, eclass);
        self
    }

    /// Attach corner coordinates to a tree.
    pub fn set_tree_vertices(&mut self, global_id: u64, vertices: Vec<[f64; 3]>) -> &mut Self {
        self.vertices.insert(global_id, vertices);
        self
    }

    /// Join `face1` of `tree1` to `face2` of `tree2`.
    ///
    /// `orientation` is seen from `tree1`; the link stored on `tree2` gets the
    /// inverse orientation.
    pub fn set_join(
        &mut self,
        tree1: u64,
        tree2: u64,
        face1: u8,
        face2: u8,
        orientation: u8,
    ) -> &mut Self {
        if self.derive.is_some() {
            self.conflict("set_join", "set_derive");
        }
        self.joins.push(Join {
            tree1,
            tree2,
            face1,
            face2,
            orientation,
        });
        self
    }

    /// Take the trees of a committed cmesh, usually to repartition them.
    pub fn set_derive(&mut self, source: Arc<Cmesh>) -> &mut Self {
        if !self.classes.is_empty() || !self.joins.is_empty() {
            self.conflict("set_derive", "set_tree_class");
        }
        if self.derive.is_some() {
            self.conflict("set_derive", "set_derive");
        }
        self.derive = Some(source);
        self
    }

    /// Partition so that a uniform refinement to `level` is balanced.
    pub fn set_partition_uniform(&mut self, level: u8, schemes: Arc<SchemeSet>) -> &mut Self {
        if self.partition.is_some() {
            self.conflict("set_partition_uniform", "set_partition_offsets");
        }
        self.partition = Some(PartitionRequest::Uniform { level, schemes });
        self
    }

    /// Partition by explicit tree offsets (`size + 1` entries).
    pub fn set_partition_offsets(&mut self, offsets: Vec<u64>) -> &mut Self {
        if self.partition.is_some() {
            self.conflict("set_partition_offsets", "set_partition_uniform");
        }
        self.partition = Some(PartitionRequest::Offsets(offsets));
        self
    }

    /// Build the trees described by `set_tree_class` and `set_join`.
    fn build_trees(&self) -> Result<Vec<Tree>, MeshForestError> {
        let mut trees = Vec::with_capacity(self.classes.len());
        for (i, (&id, &eclass)) in self.classes.iter().enumerate() {
            if id != i as u64 {
                return Err(MeshForestError::InvalidCmesh(format!(
                    "tree ids must be 0..{}, tree {i} is missing",
                    self.classes.len()
                )));
            }
            trees.push(Tree::new(id, eclass));
        }
        for (&id, vertices) in &self.vertices {
            let tree = trees
                .get_mut(id as usize)
                .ok_or(MeshForestError::MissingTree(id))?;
            if vertices.len() != tree.eclass.num_vertices() {
                return Err(MeshForestError::InvalidCmesh(format!(
                    "tree {id} of class {} has {} vertices",
                    tree.eclass,
                    vertices.len()
                )));
            }
            tree.vertices = Some(vertices.clone());
        }
        for join in &self.joins {
            let class1 = trees
                .get(join.tree1 as usize)
                .ok_or(MeshForestError::MissingTree(join.tree1))?
                .eclass;
            let class2 = trees
                .get(join.tree2 as usize)
                .ok_or(MeshForestError::MissingTree(join.tree2))?
                .eclass;
            let link = FaceLink {
                tree: join.tree2,
                face: join.face2,
                orientation: join.orientation,
                eclass: class2,
            };
            let back = link.reversed(join.tree1, join.face1, class1);
            set_link(&mut trees[join.tree1 as usize], join.face1, link)?;
            set_link(&mut trees[join.tree2 as usize], join.face2, back)?;
        }
        Ok(trees)
    }

    /// Commit collectively on `comm`.
    pub fn commit<C: Communicator>(self, comm: &C) -> Result<Arc<Cmesh>, MeshForestError> {
        if let Some(err) = &self.conflict {
            return Err(err.clone());
        }
        let rank = comm.rank();
        let size = comm.size();

        let cmesh = match &self.derive {
            Some(source) => self.commit_derived(comm, source)?,
            None => {
                if self.classes.is_empty() {
                    return Err(MeshForestError::MissingConfiguration(
                        "set_tree_class or set_derive",
                    ));
                }
                let all = self.build_trees()?;
                let num_trees = all.len() as u64;
                match &self.partition {
                    None => replicated(all, rank, size),
                    Some(request) => {
                        let (layout, uniform_level) = match request {
                            PartitionRequest::Uniform { level, schemes } => {
                                let counts = partition::leaf_counts(&all, *level, schemes)?;
                                (Layout::uniform(&counts, size)?, Some(*level))
                            }
                            PartitionRequest::Offsets(offsets) => {
                                partition::validate_offsets(offsets, size, num_trees)?;
                                (Layout::from_offsets(offsets.clone()), None)
                            }
                        };
                        let (held, ghosts) = partition::select_local(&all, &layout, rank);
                        assemble(rank, num_trees, layout, held, ghosts, uniform_level)
                    }
                }
            }
        };

        cmesh.validate_invariants()?;
        log::info!(
            "[cmesh] rank {rank}/{size}: {} trees, {} held, {} ghosts{}",
            cmesh.num_trees,
            cmesh.trees.len(),
            cmesh.ghosts.len(),
            if cmesh.is_partitioned() { ", partitioned" } else { "" }
        );
        Ok(Arc::new(cmesh))
    }

    fn commit_derived<C: Communicator>(
        &self,
        comm: &C,
        source: &Cmesh,
    ) -> Result<Cmesh, MeshForestError> {
        let rank = comm.rank();
        let size = comm.size();
        if source.size != size || source.rank != rank {
            return Err(MeshForestError::InvalidCmesh(format!(
                "source cmesh lives on rank {}/{}, communicator is {rank}/{size}",
                source.rank, source.size
            )));
        }
        let num_trees = source.num_trees;
        let Some(request) = &self.partition else {
            return Ok(source.clone());
        };
        let (layout, uniform_level) = match request {
            PartitionRequest::Uniform { level, schemes } => {
                let counts = if source.is_partitioned() {
                    partition::gather_leaf_counts(comm, source, *level, schemes)?
                } else {
                    partition::leaf_counts(&source.trees, *level, schemes)?
                };
                (Layout::uniform(&counts, size)?, Some(*level))
            }
            PartitionRequest::Offsets(offsets) => {
                partition::validate_offsets(offsets, size, num_trees)?;
                (Layout::from_offsets(offsets.clone()), None)
            }
        };
        let (held, ghosts) = if source.is_partitioned() {
            partition::ship_trees(comm, source, &layout)?
        } else {
            partition::select_local(&source.trees, &layout, rank)
        };
        Ok(assemble(rank, num_trees, layout, held, ghosts, uniform_level))
    }

    /// A single tree of a cube class, or two triangles forming a square.
    pub fn hypercube(eclass: ElementClass) -> Result<Self, MeshForestError> {
        let mut builder = Self::new();
        match eclass {
            ElementClass::Vertex
            | ElementClass::Line
            | ElementClass::Quad
            | ElementClass::Hex => {
                builder.set_tree_class(0, eclass);
                builder.set_tree_vertices(0, unit_cube_vertices(eclass.dimension(), [0.0; 3]));
            }
            ElementClass::Triangle => {
                builder.set_tree_class(0, eclass).set_tree_class(1, eclass);
                builder.set_tree_vertices(0, vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]]);
                builder.set_tree_vertices(1, vec![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]]);
                // the diagonal is opposite vertex 1 in both triangles
                builder.set_join(0, 1, 1, 1, 0);
            }
            other => return Err(MeshForestError::UnsupportedElementClass(other)),
        }
        Ok(builder)
    }

    /// `nx * ny` unit quads, optionally periodic in each direction.
    pub fn brick_2d(nx: u64, ny: u64, periodic_x: bool, periodic_y: bool) -> Self {
        Self::brick([nx, ny, 1], [periodic_x, periodic_y, false], 2)
    }

    /// `nx * ny * nz` unit hexes, optionally periodic in each direction.
    pub fn brick_3d(nx: u64, ny: u64, nz: u64, periodic: [bool; 3]) -> Self {
        Self::brick([nx, ny, nz], periodic, 3)
    }

    fn brick(n: [u64; 3], periodic: [bool; 3], dim: usize) -> Self {
        let eclass = if dim == 2 { ElementClass::Quad } else { ElementClass::Hex };
        let id = |c: [u64; 3]| c[0] + n[0] * (c[1] + n[1] * c[2]);
        let mut builder = Self::new();
        for z in 0..n[2] {
            for y in 0..n[1] {
                for x in 0..n[0] {
                    let c = [x, y, z];
                    builder.set_tree_class(id(c), eclass);
                    builder.set_tree_vertices(
                        id(c),
                        unit_cube_vertices(dim, [x as f64, y as f64, z as f64]),
                    );
                }
            }
        }
        for z in 0..n[2] {
            for y in 0..n[1] {
                for x in 0..n[0] {
                    let c = [x, y, z];
                    for axis in 0..dim {
                        let mut next = c;
                        next[axis] += 1;
                        if next[axis] == n[axis] {
                            if !periodic[axis] {
                                continue;
                            }
                            next[axis] = 0;
                        }
                        let face = 2 * axis as u8;
                        builder.set_join(id(c), id(next), face + 1, face, 0);
                    }
                }
            }
        }
        builder
    }
}

fn set_link(tree: &mut Tree, face: u8, link: FaceLink) -> Result<(), MeshForestError> {
    let num_faces = tree.links.len();
    let slot = tree
        .links
        .get_mut(face as usize)
        .ok_or(MeshForestError::FaceOutOfRange {
            face: face as usize,
            num_faces,
        })?;
    if slot.is_some_and(|existing| existing != link) {
        return Err(MeshForestError::FaceConnectivity {
            tree: tree.global_id,
            face: face as usize,
            detail: "face is joined twice".into(),
        });
    }
    *slot = Some(link);
    Ok(())
}

/// Corners of the unit cube of `dim` dimensions translated by `origin`,
/// vertex `i` having coordinate bit `a` of `i` on axis `a`.
fn unit_cube_vertices(dim: usize, origin: [f64; 3]) -> Vec<[f64; 3]> {
    (0..1usize << dim)
        .map(|i| {
            let mut v = origin;
            for (axis, c) in v.iter_mut().enumerate().take(dim) {
                *c += ((i >> axis) & 1) as f64;
            }
            v
        })
        .collect()
}

fn replicated(trees: Vec<Tree>, rank: usize, size: usize) -> Cmesh {
    let num_trees = trees.len() as u64;
    Cmesh {
        rank,
        size,
        num_trees,
        trees,
        owned: 0..num_trees,
        tree_offsets: None,
        ghosts: Vec::new(),
        uniform_level: None,
    }
}

fn assemble(
    rank: usize,
    num_trees: u64,
    layout: Layout,
    held: Vec<Tree>,
    ghosts: Vec<Tree>,
    uniform_level: Option<u8>,
) -> Cmesh {
    let size = layout.held.len();
    let owned = layout.offsets[rank]..layout.offsets[rank + 1];
    Cmesh {
        rank,
        size,
        num_trees,
        trees: held,
        owned,
        tree_offsets: Some(layout.offsets),
        ghosts,
        uniform_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    #[test]
    fn brick_joins_are_reciprocal() {
        let cmesh = CmeshBuilder::brick_2d(3, 2, true, false).commit(&NoComm).unwrap();
        assert_eq!(cmesh.num_trees(), 6);
        assert!(cmesh.is_face_consistent());
        let t0 = cmesh.tree(0).unwrap();
        // periodic in x: the low x face of tree 0 meets tree 2
        assert_eq!(t0.face_link(0).map(|l| (l.tree, l.face)), Some((2, 1)));
        assert_eq!(t0.face_link(2), None);
        assert_eq!(t0.face_link(3).map(|l| l.tree), Some(3));
        assert_eq!(t0.vertices().unwrap()[3], [1.0, 1.0, 0.0]);
    }

    #[test]
    fn joins_use_inverse_orientation_on_the_far_side() {
        let mut builder = CmeshBuilder::new();
        builder
            .set_tree_class(0, ElementClass::Hex)
            .set_tree_class(1, ElementClass::Hex)
            .set_join(0, 1, 1, 2, 0b101);
        let cmesh = builder.commit(&NoComm).unwrap();
        let back = cmesh.tree(1).unwrap().face_link(2).unwrap();
        assert_eq!((back.tree, back.face, back.orientation), (0, 1, 0b110));
    }

    #[test]
    fn configuration_errors() {
        let mut builder = CmeshBuilder::new();
        builder
            .set_tree_class(0, ElementClass::Quad)
            .set_partition_offsets(vec![0, 1])
            .set_partition_uniform(1, SchemeSet::default_schemes());
        assert!(matches!(
            builder.commit(&NoComm),
            Err(MeshForestError::ConflictingConfiguration(..))
        ));

        assert_eq!(
            CmeshBuilder::new().commit(&NoComm).unwrap_err(),
            MeshForestError::MissingConfiguration("set_tree_class or set_derive")
        );

        let mut gap = CmeshBuilder::new();
        gap.set_tree_class(1, ElementClass::Quad);
        assert!(matches!(gap.commit(&NoComm), Err(MeshForestError::InvalidCmesh(_))));

        let mut bad_face = CmeshBuilder::new();
        bad_face.set_tree_class(0, ElementClass::Line).set_tree_class(1, ElementClass::Line);
        bad_face.set_join(0, 1, 2, 0, 0);
        assert!(matches!(
            bad_face.commit(&NoComm),
            Err(MeshForestError::FaceOutOfRange { face: 2, num_faces: 2 })
        ));
    }

    #[test]
    fn single_process_partition_holds_everything() {
        let mut builder = CmeshBuilder::brick_2d(2, 2, false, false);
        builder.set_partition_uniform(2, SchemeSet::default_schemes());
        let cmesh = builder.commit(&NoComm).unwrap();
        assert_eq!(cmesh.partition_table(), Some(&[0, 4][..]));
        assert_eq!(cmesh.num_local_trees(), 4);
        assert_eq!(cmesh.num_ghosts(), 0);
        assert_eq!(cmesh.uniform_level(), Some(2));
    }

    #[test]
    fn hypercube_of_simplex_classes() {
        let tri = CmeshBuilder::hypercube(ElementClass::Triangle)
            .unwrap()
            .commit(&NoComm)
            .unwrap();
        assert_eq!(tri.num_trees(), 2);
        assert!(tri.is_face_consistent());
        assert!(CmeshBuilder::hypercube(ElementClass::Tet).is_err());
    }
}
