//! Curve-order searches over sorted leaf arrays.
//!
//! Leaves of one tree are sorted by [`Scheme::compare`], so every region
//! query reduces to two binary searches: the leaf covering a region is the
//! last leaf not after it, and the leaves inside a region form the run of
//! curve keys up to its last finest descendant.

use super::ghost::GhostLayer;
use super::lfn::LeafLocation;
use super::Forest;
use crate::cmesh::Tree;
use crate::eclass::ElementClass;
use crate::mesh_error::MeshForestError;
use crate::scheme::{Contact, Element, NeighborRegion, Scheme};
use std::ops::Range;

/// Leaves covering `region`: one leaf equal to or containing it, or the
/// subelement group replacing it or one of its ancestors.
pub(crate) fn covering_range(
    scheme: &dyn Scheme,
    elements: &[Element],
    region: &Element,
) -> Option<Range<usize>> {
    let end = elements.partition_point(|l| scheme.compare(&l.without_subelement(), region).is_le());
    let candidate = elements.get(end.checked_sub(1)?)?;
    if !scheme.is_ancestor(candidate, region) {
        return None;
    }
    if candidate.subelement().is_none() {
        return Some(end - 1..end);
    }
    let base = candidate.without_subelement();
    let start = elements[..end]
        .iter()
        .rposition(|l| l.subelement().is_none() || l.without_subelement() != base)
        .map_or(0, |p| p + 1);
    Some(start..end)
}

/// Leaves equal to or inside `region`.
pub(crate) fn descendants_range(
    scheme: &dyn Scheme,
    elements: &[Element],
    region: &Element,
) -> Range<usize> {
    let start = elements.partition_point(|l| scheme.compare(&l.without_subelement(), region).is_lt());
    let last_key = scheme.curve_key(&scheme.last_descendant(region, scheme.max_level()));
    let end = start + elements[start..].partition_point(|l| scheme.curve_key(l) <= last_key);
    start..end
}

/// Offset pointing through face `face` of a cube-like element.
pub(crate) fn face_offset(face: usize) -> [i8; 3] {
    let mut offset = [0i8; 3];
    offset[face / 2] = if face % 2 == 0 { -1 } else { 1 };
    offset
}

/// A same-level neighbor region, resolved into the tree that contains it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ResolvedRegion {
    pub(crate) tree: u64,
    pub(crate) eclass: ElementClass,
    pub(crate) region: Element,
    /// The part of `region` facing the element the query started from.
    pub(crate) contact: Contact,
}

/// Outcome of following a neighbor offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    Found(ResolvedRegion),
    /// The offset leaves the domain through an unconnected tree face.
    Boundary,
}

/// Follow `offset` from `e` in `tree`. An offset leaving the tree through
/// more than one face is walked one axis at a time across the face links.
pub(crate) fn resolve_offset(
    forest: &Forest,
    tree: &Tree,
    scheme: &dyn Scheme,
    e: &Element,
    offset: [i8; 3],
) -> Result<Resolution, MeshForestError> {
    let contact = scheme.offset_contact(offset);
    let resolution = match scheme.neighbor_region(e, offset) {
        NeighborRegion::Inside(region) => Resolution::Found(ResolvedRegion {
            tree: tree.global_id(),
            eclass: tree.eclass(),
            region,
            contact,
        }),
        NeighborRegion::AcrossFace { face, touching } => match tree.face_link(face) {
            Some(link) => {
                let neighbor_face = link.face as usize;
                Resolution::Found(ResolvedRegion {
                    tree: link.tree,
                    eclass: link.eclass,
                    region: scheme.transform_across_face(&touching, face, neighbor_face, link.orientation),
                    contact: scheme.transform_contact(contact, face, neighbor_face, link.orientation),
                })
            }
            None => Resolution::Boundary,
        },
        NeighborRegion::Beyond => walk(forest, tree, scheme, *e, offset, contact)?
            .map_or(Resolution::Boundary, Resolution::Found),
    };
    Ok(resolution)
}

/// Move `e` along `offset` one axis at a time, crossing tree faces through
/// their links. Axis orders are tried until one reaches a tree, so a corner
/// shared by trees that are not all face-connected to `tree` is still found.
fn walk(
    forest: &Forest,
    tree: &Tree,
    scheme: &dyn Scheme,
    e: Element,
    offset: [i8; 3],
    contact: Contact,
) -> Result<Option<ResolvedRegion>, MeshForestError> {
    if offset.iter().all(|&o| o == 0) {
        return Ok(Some(ResolvedRegion {
            tree: tree.global_id(),
            eclass: tree.eclass(),
            region: e,
            contact,
        }));
    }
    for axis in (0..3).filter(|&a| offset[a] != 0) {
        let mut step = [0i8; 3];
        step[axis] = offset[axis];
        let mut rest = offset;
        rest[axis] = 0;
        let found = match scheme.neighbor_region(&e, step) {
            NeighborRegion::Inside(region) => walk(forest, tree, scheme, region, rest, contact)?,
            NeighborRegion::AcrossFace { face, touching } => {
                let Some(link) = tree.face_link(face) else {
                    continue;
                };
                let next = forest
                    .cmesh
                    .tree(link.tree)
                    .ok_or(MeshForestError::MissingTree(link.tree))?;
                let next_scheme = forest.schemes.scheme(link.eclass)?;
                let neighbor_face = link.face as usize;
                walk(
                    forest,
                    next,
                    next_scheme,
                    scheme.transform_across_face(&touching, face, neighbor_face, link.orientation),
                    transform_offset(scheme, rest, face, neighbor_face, link.orientation),
                    scheme.transform_contact(contact, face, neighbor_face, link.orientation),
                )?
            }
            NeighborRegion::Beyond => None,
        };
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

/// Express the part of `offset` tangent to `face` in the frame of the tree
/// behind it.
fn transform_offset(
    scheme: &dyn Scheme,
    offset: [i8; 3],
    face: usize,
    neighbor_face: usize,
    orientation: u8,
) -> [i8; 3] {
    let moved = scheme.transform_contact(scheme.offset_contact(offset), face, neighbor_face, orientation);
    let mut out = [0i8; 3];
    for (axis, slot) in out.iter_mut().enumerate() {
        if axis != neighbor_face / 2 {
            *slot = match moved.side(axis) {
                Some(0) => 1,
                Some(_) => -1,
                None => 0,
            };
        }
    }
    out
}

/// Face neighbor region of `e` across `face`, with the dual face seen from
/// the neighbor. `None` on the domain boundary.
pub(crate) fn resolve_face(
    tree: &Tree,
    scheme: &dyn Scheme,
    e: &Element,
    face: usize,
) -> Option<(ResolvedRegion, usize)> {
    match scheme.tree_face(e, face) {
        None => {
            let (region, dual) = scheme.face_neighbor_inside(e, face)?;
            Some((
                ResolvedRegion {
                    tree: tree.global_id(),
                    eclass: tree.eclass(),
                    region,
                    contact: Contact::face(dual),
                },
                dual,
            ))
        }
        Some(tree_face) => {
            let link = tree.face_link(tree_face)?;
            let dual = link.face as usize;
            Some((
                ResolvedRegion {
                    tree: link.tree,
                    eclass: link.eclass,
                    region: scheme.transform_across_face(e, tree_face, dual, link.orientation),
                    contact: Contact::face(dual),
                },
                dual,
            ))
        }
    }
}

/// The leaves of one tree visible to this process: its local leaves and the
/// ghosts of that tree.
pub(crate) struct TreeView<'a> {
    pub(crate) scheme: &'a dyn Scheme,
    local: Option<(usize, &'a [Element])>,
    ghost: Option<(&'a [Element], &'a [usize])>,
}

impl<'a> TreeView<'a> {
    pub(crate) fn new(
        forest: &'a Forest,
        ghosts: Option<&'a GhostLayer>,
        tree: u64,
        eclass: ElementClass,
    ) -> Result<Self, MeshForestError> {
        let scheme = forest.schemes.scheme(eclass)?;
        let local = forest
            .local_tree_index(tree)
            .map(|t| (t, forest.trees[t].elements.as_slice()));
        let ghost = ghosts
            .and_then(|g| g.tree(tree))
            .map(|g| (g.elements.as_slice(), g.indices.as_slice()));
        Ok(Self { scheme, local, ghost })
    }

    /// Leaves covering `region`, with their locations.
    pub(crate) fn covering(&self, region: &Element) -> Vec<(LeafLocation, Element)> {
        if let Some((t, elements)) = self.local {
            if let Some(range) = covering_range(self.scheme, elements, region) {
                return range
                    .map(|i| (LeafLocation::Local { tree: t, index: i }, elements[i]))
                    .collect();
            }
        }
        if let Some((elements, indices)) = self.ghost {
            if let Some(range) = covering_range(self.scheme, elements, region) {
                return range
                    .map(|i| (LeafLocation::Ghost { index: indices[i] }, elements[i]))
                    .collect();
            }
        }
        Vec::new()
    }

    /// Whether some visible leaf lies inside `region`.
    pub(crate) fn has_descendants(&self, region: &Element) -> bool {
        self.local
            .is_some_and(|(_, elements)| !descendants_range(self.scheme, elements, region).is_empty())
            || self
                .ghost
                .is_some_and(|(elements, _)| !descendants_range(self.scheme, elements, region).is_empty())
    }

    /// Visible leaves inside `region`, local leaves first.
    pub(crate) fn descendants(&self, region: &Element) -> Vec<(LeafLocation, Element)> {
        let mut found = Vec::new();
        if let Some((t, elements)) = self.local {
            found.extend(
                descendants_range(self.scheme, elements, region)
                    .map(|i| (LeafLocation::Local { tree: t, index: i }, elements[i])),
            );
        }
        if let Some((elements, indices)) = self.ghost {
            found.extend(
                descendants_range(self.scheme, elements, region)
                    .map(|i| (LeafLocation::Ghost { index: indices[i] }, elements[i])),
            );
        }
        found
    }

    /// Whether `region` is refined: no visible leaf covers it, but some
    /// visible leaf lies strictly inside.
    pub(crate) fn is_refined(&self, region: &Element) -> bool {
        self.covering(region).is_empty() && self.has_descendants(region)
    }
}
