//! Ghost layer: copies of remote leaves adjacent to the local partition.
//!
//! Every process walks its own leaves, computes the neighbor regions within
//! the requested adjacency and determines which processes own leaves of
//! those regions touching the leaf. Each leaf is then sent, once, to every
//! such process. Owner bounds come from the first curve position of every
//! process: the owners of a region's touching part lie between the owners
//! of its first and last touching finest descendants, and when those differ
//! the region is split into its touching children.
//!
//! Three interchangeable algorithms compute the owner sets:
//! version 1 recurses, version 2 uses an explicit stack and version 3
//! memoises the owners of every region it visits.

use super::search::{resolve_offset, Resolution};
use super::{CurvePosition, Forest};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::all_to_all;
use crate::algs::wire::{decode_records, encode_records, kind, WireGhost};
use crate::eclass::ElementClass;
use crate::mesh_error::MeshForestError;
use crate::scheme::{Adjacency, Contact, Element, Scheme};
use bytes::BufMut;
use hashbrown::HashMap;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// Ghost construction settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GhostConfig {
    pub kind: Adjacency,
    pub version: u8,
}

impl Default for GhostConfig {
    fn default() -> Self {
        Self {
            kind: Adjacency::Faces,
            version: 3,
        }
    }
}

impl GhostConfig {
    pub fn new(kind: Adjacency, version: u8) -> Result<Self, MeshForestError> {
        if !(1..=3).contains(&version) {
            return Err(MeshForestError::InvalidGhostVersion(version));
        }
        Ok(Self { kind, version })
    }
}

/// A remote leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GhostElement {
    pub tree: u64,
    pub eclass: ElementClass,
    pub element: Element,
    pub owner: usize,
    /// Local element index on the owner.
    pub owner_index: u64,
}

/// Ghosts received from one process, as a range of ghost indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteGhosts {
    pub rank: usize,
    pub range: Range<usize>,
}

/// The ghosts of one tree, in curve order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GhostTree {
    pub global_id: u64,
    pub eclass: ElementClass,
    pub elements: Vec<Element>,
    /// Ghost index of each entry of `elements`.
    pub indices: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GhostLayer {
    remotes: Vec<RemoteGhosts>,
    elements: Vec<GhostElement>,
    trees: Vec<GhostTree>,
}

impl GhostLayer {
    pub fn num_ghosts(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Processes ghosts were received from, in rank order.
    pub fn remotes(&self) -> &[RemoteGhosts] {
        &self.remotes
    }

    pub fn elements(&self) -> &[GhostElement] {
        &self.elements
    }

    pub fn element(&self, index: usize) -> Option<&GhostElement> {
        self.elements.get(index)
    }

    pub fn trees(&self) -> &[GhostTree] {
        &self.trees
    }

    /// Ghosts of tree `global_id`.
    pub fn tree(&self, global_id: u64) -> Option<&GhostTree> {
        self.trees
            .binary_search_by_key(&global_id, |t| t.global_id)
            .ok()
            .map(|i| &self.trees[i])
    }

    /// Deterministic serialisation of the layer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MeshForestError> {
        let mut out = Vec::new();
        out.put_u32_le(self.remotes.len() as u32);
        for remote in &self.remotes {
            out.put_u64_le(remote.rank as u64);
            let records = self.elements[remote.range.clone()]
                .iter()
                .map(|g| Ok(WireGhost::new(g.tree, g.eclass, &g.element, narrow_index(g.owner_index)?)))
                .collect::<Result<Vec<_>, MeshForestError>>()?;
            out.extend_from_slice(&encode_records(kind::GHOSTS, &records));
        }
        Ok(out)
    }

    fn from_received(per_rank: Vec<(usize, Vec<GhostElement>)>) -> Self {
        let mut remotes = Vec::new();
        let mut elements = Vec::new();
        for (rank, ghosts) in per_rank {
            if ghosts.is_empty() {
                continue;
            }
            let start = elements.len();
            elements.extend(ghosts);
            remotes.push(RemoteGhosts {
                rank,
                range: start..elements.len(),
            });
        }
        let mut by_tree: BTreeMap<u64, GhostTree> = BTreeMap::new();
        for (index, ghost) in elements.iter().enumerate() {
            let tree = by_tree.entry(ghost.tree).or_insert_with(|| GhostTree {
                global_id: ghost.tree,
                eclass: ghost.eclass,
                elements: Vec::new(),
                indices: Vec::new(),
            });
            tree.elements.push(ghost.element);
            tree.indices.push(index);
        }
        Self {
            remotes,
            elements,
            trees: by_tree.into_values().collect(),
        }
    }
}

fn narrow_index(index: u64) -> Result<u32, MeshForestError> {
    u32::try_from(index).map_err(|_| MeshForestError::Overflow("ghost owner index"))
}

/// Computes the processes owning the touching part of neighbor regions.
struct OwnerFinder<'a> {
    forest: &'a Forest,
    version: u8,
    memo: HashMap<(u64, Element, Contact), Vec<usize>>,
    children: Vec<Element>,
}

impl<'a> OwnerFinder<'a> {
    fn new(forest: &'a Forest, version: u8) -> Self {
        Self {
            forest,
            version,
            memo: HashMap::new(),
            children: Vec::new(),
        }
    }

    fn bounds(&self, scheme: &dyn Scheme, tree: u64, region: &Element, contact: Contact) -> (usize, usize) {
        let first = scheme.first_contact_descendant(region, contact);
        let last = scheme.last_contact_descendant(region, contact);
        let owner = |e: &Element| {
            self.forest.owner_of(CurvePosition {
                tree,
                key: scheme.curve_key(e),
            })
        };
        (owner(&first), owner(&last))
    }

    /// Add the owners of `region`'s touching part to `out`.
    fn owners(
        &mut self,
        scheme: &dyn Scheme,
        tree: u64,
        region: Element,
        contact: Contact,
        out: &mut BTreeSet<usize>,
    ) {
        match self.version {
            1 => self.owners_recursive(scheme, tree, region, contact, out),
            2 => self.owners_stack(scheme, tree, region, contact, out),
            _ => {
                let key = (tree, region, contact);
                if let Some(known) = self.memo.get(&key) {
                    out.extend(known.iter().copied());
                    return;
                }
                let mut found = BTreeSet::new();
                self.owners_stack(scheme, tree, region, contact, &mut found);
                out.extend(found.iter().copied());
                self.memo.insert(key, found.into_iter().collect());
            }
        }
    }

    fn owners_recursive(
        &mut self,
        scheme: &dyn Scheme,
        tree: u64,
        region: Element,
        contact: Contact,
        out: &mut BTreeSet<usize>,
    ) {
        let (lower, upper) = self.bounds(scheme, tree, &region, contact);
        if lower == upper {
            out.insert(lower);
            return;
        }
        let mut children = Vec::new();
        scheme.contact_children(&region, contact, &mut children);
        for child in children {
            self.owners_recursive(scheme, tree, child, contact, out);
        }
    }

    fn owners_stack(
        &mut self,
        scheme: &dyn Scheme,
        tree: u64,
        region: Element,
        contact: Contact,
        out: &mut BTreeSet<usize>,
    ) {
        let mut stack = vec![region];
        while let Some(region) = stack.pop() {
            let (lower, upper) = self.bounds(scheme, tree, &region, contact);
            if lower == upper {
                out.insert(lower);
                continue;
            }
            scheme.contact_children(&region, contact, &mut self.children);
            stack.extend(self.children.iter().rev().copied());
        }
    }
}

/// Build the ghost layer of `forest` collectively.
pub(crate) fn build_layer<C: Communicator>(
    forest: &Forest,
    comm: &C,
    config: GhostConfig,
) -> Result<GhostLayer, MeshForestError> {
    if !(1..=3).contains(&config.version) {
        return Err(MeshForestError::InvalidGhostVersion(config.version));
    }
    let rank = comm.rank();
    let mut finder = OwnerFinder::new(forest, config.version);
    let mut outgoing: Vec<Vec<WireGhost>> = vec![Vec::new(); comm.size()];
    let mut owners = BTreeSet::new();

    for tree in &forest.trees {
        let scheme = forest.schemes.scheme(tree.eclass())?;
        let offsets = scheme.neighbor_offsets(config.kind);
        for (index, e) in tree.elements.iter().enumerate() {
            owners.clear();
            let base = e.without_subelement();
            for &offset in &offsets {
                if let Resolution::Found(found) = resolve_offset(forest, &tree.tree, scheme, &base, offset)? {
                    let region_scheme = forest.schemes.scheme(found.eclass)?;
                    finder.owners(region_scheme, found.tree, found.region, found.contact, &mut owners);
                }
            }
            let owner_index = narrow_index(tree.element_offset + index as u64)?;
            for &owner in owners.iter().filter(|&&o| o != rank) {
                outgoing[owner].push(WireGhost::new(tree.global_id(), tree.eclass(), e, owner_index));
            }
        }
    }

    let buffers = outgoing
        .iter()
        .map(|records| encode_records(kind::GHOSTS, records))
        .collect();
    let incoming = all_to_all(comm, CommTag::ALL_TO_ALL, buffers)?;

    let per_rank = incoming
        .iter()
        .enumerate()
        .filter(|(source, _)| *source != rank)
        .map(|(source, bytes)| {
            let records = decode_records::<WireGhost>(kind::GHOSTS, bytes)?;
            let ghosts = records
                .iter()
                .map(|r| {
                    Ok(GhostElement {
                        tree: r.element.tree(),
                        eclass: r.eclass()?,
                        element: r.element.element(),
                        owner: source,
                        owner_index: u64::from(r.owner_index()),
                    })
                })
                .collect::<Result<Vec<_>, MeshForestError>>()?;
            Ok((source, ghosts))
        })
        .collect::<Result<Vec<_>, MeshForestError>>()?;
    let layer = GhostLayer::from_received(per_rank);

    log::debug!(
        "[ghost] rank {rank}: {} ghosts from {} processes ({:?}, version {}), sent {}",
        layer.num_ghosts(),
        layer.remotes.len(),
        config.kind,
        config.version,
        outgoing.iter().map(Vec::len).sum::<usize>()
    );
    debug_assert!(
        layer
            .trees
            .iter()
            .all(|t| t.elements.iter().tuple_windows().all(|(a, b)| a != b)),
        "ghost trees hold duplicate leaves"
    );
    Ok(layer)
}
