//! Quad scheme with transition subelements.
//!
//! A quad whose faces carry hanging neighbors can be replaced by a conformal
//! group of triangular subelements around its center. The transition type is
//! the bitmask of split faces; every face contributes one subelement, or two
//! when split, so a group holds `4 + popcount(type)` subelements.
//!
//! Subelements are enumerated counterclockwise starting at the low-`y` face:
//! faces `2, 1, 3, 0`. Each subelement has three faces: face 0 towards the
//! previous sibling, face 1 on the parent boundary, face 2 towards the next
//! sibling.

use super::cube::QuadScheme;
use super::element::{Element, SubelementId};
use super::{Adjacency, Contact, NeighborRegion, Scheme};
use crate::eclass::ElementClass;
use std::cmp::Ordering;

/// Face of a subelement lying on the boundary of its parent quad.
pub const SUBELEMENT_OUTER_FACE: usize = 1;

const SEGMENT_FACES: [usize; 4] = [2, 1, 3, 0];

/// Counterclockwise order of the two halves along each face.
const HALF_ORDER: [[u8; 2]; 4] = [[1, 0], [0, 1], [0, 1], [1, 0]];

/// Quad scheme that additionally understands transition subelements.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionQuadScheme {
    quad: QuadScheme,
}

/// Where a subelement's outer face sits on its parent.
fn segment(transition_type: u8, index: u8) -> Option<(usize, Option<u8>)> {
    let mut position = 0u8;
    for face in SEGMENT_FACES {
        if transition_type & (1 << face) != 0 {
            for half in HALF_ORDER[face] {
                if position == index {
                    return Some((face, Some(half)));
                }
                position += 1;
            }
        } else {
            if position == index {
                return Some((face, None));
            }
            position += 1;
        }
    }
    None
}

/// Child id of the quad child covering `half` of `face`.
fn half_child(face: usize, half: u8) -> usize {
    ((face % 2) << (face / 2)) | ((half as usize) << (1 - face / 2))
}

impl TransitionQuadScheme {
    fn group_len(sub: SubelementId) -> usize {
        4 + sub.transition_type.count_ones() as usize
    }
}

impl Scheme for TransitionQuadScheme {
    fn eclass(&self) -> ElementClass {
        ElementClass::Quad
    }

    fn num_faces(&self, e: &Element) -> usize {
        if e.sub.is_some() { 3 } else { 4 }
    }

    fn num_children(&self, e: &Element) -> usize {
        self.quad.num_children(e)
    }

    fn num_face_children(&self, e: &Element, face: usize) -> usize {
        if e.sub.is_some() {
            1
        } else {
            self.quad.num_face_children(e, face)
        }
    }

    fn child_id(&self, e: &Element) -> usize {
        match e.sub {
            Some(sub) => sub.index as usize,
            None => self.quad.child_id(e),
        }
    }

    /// A hierarchical family, or a complete subelement group in index order.
    fn is_family(&self, elements: &[Element]) -> bool {
        let Some(first) = elements.first() else {
            return false;
        };
        match first.sub {
            None => self.quad.is_family(elements),
            Some(sub) => {
                elements.len() == Self::group_len(sub)
                    && elements.iter().enumerate().all(|(i, e)| {
                        e.level == first.level
                            && e.anchor == first.anchor
                            && e.sub.map(|s| (s.transition_type, s.index as usize))
                                == Some((sub.transition_type, i))
                    })
            }
        }
    }

    fn compare(&self, a: &Element, b: &Element) -> Ordering {
        self.quad.compare(a, b)
    }

    /// The parent of a subelement is the quad its group replaces.
    fn parent(&self, e: &Element) -> Element {
        if e.sub.is_some() {
            e.without_subelement()
        } else {
            self.quad.parent(e)
        }
    }

    fn children(&self, e: &Element, out: &mut Vec<Element>) {
        self.quad.children(&e.without_subelement(), out);
    }

    fn children_at_face(&self, e: &Element, face: usize, out: &mut Vec<Element>) {
        self.quad.children_at_face(&e.without_subelement(), face, out);
    }

    fn is_ancestor(&self, ancestor: &Element, e: &Element) -> bool {
        self.quad.is_ancestor(ancestor, e)
    }

    fn first_descendant(&self, e: &Element, level: u8) -> Element {
        self.quad.first_descendant(e, level)
    }

    fn last_descendant(&self, e: &Element, level: u8) -> Element {
        self.quad.last_descendant(e, level)
    }

    fn linear_id(&self, e: &Element, level: u8) -> u64 {
        self.quad.linear_id(e, level)
    }

    fn from_linear_id(&self, id: u64, level: u8) -> Element {
        self.quad.from_linear_id(id, level)
    }

    fn count_leaves(&self, e: &Element, level: u8) -> u64 {
        self.quad.count_leaves(e, level)
    }

    fn is_valid(&self, e: &Element) -> bool {
        if !self.quad.is_valid(&e.without_subelement()) {
            return false;
        }
        match e.sub {
            None => true,
            Some(sub) => {
                sub.transition_type != 0
                    && sub.transition_type < 16
                    && (sub.index as usize) < Self::group_len(sub)
            }
        }
    }

    fn to_string(&self, e: &Element) -> String {
        let base = self.quad.to_string(&e.without_subelement());
        match e.sub {
            Some(sub) => format!(
                "{base} subelement {} of type {:#06b}",
                sub.index, sub.transition_type
            ),
            None => base,
        }
    }

    fn face_neighbor_inside(&self, e: &Element, face: usize) -> Option<(Element, usize)> {
        if e.sub.is_none() {
            return self.quad.face_neighbor_inside(e, face);
        }
        if face == SUBELEMENT_OUTER_FACE {
            let (parent_face, region) = self.subelement_face_region(e)?;
            self.quad.face_neighbor_inside(&region, parent_face)
        } else {
            self.sibling_subelement(e, face)
        }
    }

    fn tree_face(&self, e: &Element, face: usize) -> Option<usize> {
        if e.sub.is_none() {
            return self.quad.tree_face(e, face);
        }
        if face != SUBELEMENT_OUTER_FACE {
            return None;
        }
        let (parent_face, region) = self.subelement_face_region(e)?;
        self.quad.tree_face(&region, parent_face)
    }

    fn neighbor_offsets(&self, adjacency: Adjacency) -> Vec<[i8; 3]> {
        self.quad.neighbor_offsets(adjacency)
    }

    fn neighbor_region(&self, e: &Element, offset: [i8; 3]) -> NeighborRegion {
        self.quad.neighbor_region(&e.without_subelement(), offset)
    }

    fn offset_contact(&self, offset: [i8; 3]) -> Contact {
        self.quad.offset_contact(offset)
    }

    fn transform_across_face(
        &self,
        e: &Element,
        face: usize,
        neighbor_face: usize,
        orientation: u8,
    ) -> Element {
        self.quad
            .transform_across_face(&e.without_subelement(), face, neighbor_face, orientation)
    }

    fn transform_contact(
        &self,
        contact: Contact,
        face: usize,
        neighbor_face: usize,
        orientation: u8,
    ) -> Contact {
        self.quad
            .transform_contact(contact, face, neighbor_face, orientation)
    }

    fn touches_contact(&self, region: &Element, e: &Element, contact: Contact) -> bool {
        self.quad.touches_contact(region, e, contact)
    }

    fn contact_children(&self, region: &Element, contact: Contact, out: &mut Vec<Element>) {
        self.quad.contact_children(region, contact, out)
    }

    fn first_contact_descendant(&self, region: &Element, contact: Contact) -> Element {
        self.quad.first_contact_descendant(region, contact)
    }

    fn last_contact_descendant(&self, region: &Element, contact: Contact) -> Element {
        self.quad.last_contact_descendant(region, contact)
    }

    fn curve_key(&self, e: &Element) -> u64 {
        self.quad.curve_key(e)
    }

    fn supports_transition(&self) -> bool {
        true
    }

    fn transition(&self, base: &Element, transition_type: u8, out: &mut Vec<Element>) {
        out.clear();
        let base = base.without_subelement();
        let n = self.num_subelements(transition_type);
        out.extend((0..n as u8).map(|index| {
            base.with_subelement(SubelementId {
                transition_type,
                index,
            })
        }));
    }

    fn num_subelements(&self, transition_type: u8) -> usize {
        if transition_type == 0 || transition_type >= 16 {
            0
        } else {
            4 + transition_type.count_ones() as usize
        }
    }

    fn subelement_face_region(&self, e: &Element) -> Option<(usize, Element)> {
        let sub = e.sub?;
        let base = e.without_subelement();
        match segment(sub.transition_type, sub.index)? {
            (face, None) => Some((face, base)),
            (face, Some(half)) => {
                let mut kids = Vec::with_capacity(4);
                self.quad.children(&base, &mut kids);
                Some((face, kids[half_child(face, half)]))
            }
        }
    }

    fn sibling_subelement(&self, e: &Element, face: usize) -> Option<(Element, usize)> {
        let sub = e.sub?;
        let n = Self::group_len(sub) as u8;
        let (index, dual) = match face {
            0 => ((sub.index + n - 1) % n, 2),
            2 => ((sub.index + 1) % n, 0),
            _ => return None,
        };
        Some((
            e.with_subelement(SubelementId {
                transition_type: sub.transition_type,
                index,
            }),
            dual,
        ))
    }
}
