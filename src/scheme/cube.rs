//! Default schemes for tensor-product classes (vertex, line, quad, hex).
//!
//! Elements are `D`-dimensional cubes refined by halving every axis; the
//! space-filling curve is the Morton (Z-order) curve obtained by
//! interleaving anchor bits, axis 0 fastest. Child `i` has bit `a` of `i`
//! set when it lies in the upper half along axis `a`, so child order equals
//! curve order.
//!
//! Faces follow the tensor convention: face `f` is normal to axis `f / 2`,
//! on the low side when `f` is even. Tree-to-tree orientation for a face
//! lists the face's tangent axes in increasing order; bit 2 swaps the two
//! tangents (3D only), then bit `i` reverses tangent `i`.

use super::element::{element_len, Element, MAX_LEVEL, ROOT_LEN};
use super::{Adjacency, Contact, NeighborRegion, Scheme};
use crate::eclass::ElementClass;
use std::cmp::Ordering;

/// Default scheme of the `D`-dimensional cube class.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCube<const D: usize>;

/// 0D vertices.
pub type VertexScheme = DefaultCube<0>;
/// 1D lines.
pub type LineScheme = DefaultCube<1>;
/// 2D quadrilaterals.
pub type QuadScheme = DefaultCube<2>;
/// 3D hexahedra.
pub type HexScheme = DefaultCube<3>;

/// Interleave the low `bits` bits of the first `dim` coordinates.
pub(crate) fn interleave(coords: [u32; 3], dim: usize, bits: u32) -> u64 {
    let mut id = 0u64;
    for bit in 0..bits {
        for axis in 0..dim {
            let b = ((coords[axis] >> bit) & 1) as u64;
            id |= b << (bit as usize * dim + axis);
        }
    }
    id
}

fn deinterleave(id: u64, dim: usize, bits: u32) -> [u32; 3] {
    let mut coords = [0u32; 3];
    for bit in 0..bits {
        for axis in 0..dim {
            let b = ((id >> (bit as usize * dim + axis)) & 1) as u32;
            coords[axis] |= b << bit;
        }
    }
    coords
}

/// Tangent axes of the face normal to `normal`, in increasing order.
fn tangent_axes(dim: usize, normal: usize) -> ([usize; 2], usize) {
    let mut axes = [0usize; 2];
    let mut n = 0;
    for axis in 0..dim {
        if axis != normal {
            axes[n] = axis;
            n += 1;
        }
    }
    (axes, n)
}

/// Orientation seen from the other side of a face link.
pub fn inverse_orientation(orientation: u8) -> u8 {
    if orientation & 4 != 0 {
        4 | ((orientation & 1) << 1) | ((orientation >> 1) & 1)
    } else {
        orientation
    }
}

impl<const D: usize> DefaultCube<D> {
    const CLASS: ElementClass = match D {
        0 => ElementClass::Vertex,
        1 => ElementClass::Line,
        2 => ElementClass::Quad,
        _ => ElementClass::Hex,
    };

    fn morton(e: &Element) -> u64 {
        interleave(e.anchor, D, MAX_LEVEL as u32)
    }

    fn child(e: &Element, index: usize) -> Element {
        let h = element_len(e.level + 1);
        let mut anchor = e.anchor;
        for (axis, coord) in anchor.iter_mut().enumerate().take(D) {
            if (index >> axis) & 1 == 1 {
                *coord += h;
            }
        }
        Element::new(e.level + 1, anchor)
    }

    fn contact_child_matches(index: usize, contact: Contact) -> bool {
        (0..D).all(|axis| match contact.side(axis) {
            Some(side) => ((index >> axis) & 1) as u8 == side,
            None => true,
        })
    }
}

impl<const D: usize> Scheme for DefaultCube<D> {
    fn eclass(&self) -> ElementClass {
        Self::CLASS
    }

    fn num_faces(&self, _e: &Element) -> usize {
        2 * D
    }

    fn num_children(&self, _e: &Element) -> usize {
        1 << D
    }

    fn num_face_children(&self, _e: &Element, _face: usize) -> usize {
        (1usize << D) >> 1
    }

    fn child_id(&self, e: &Element) -> usize {
        if e.level == 0 {
            return 0;
        }
        let shift = MAX_LEVEL - e.level;
        (0..D)
            .map(|axis| (((e.anchor[axis] >> shift) & 1) as usize) << axis)
            .sum()
    }

    fn is_family(&self, elements: &[Element]) -> bool {
        if elements.len() != 1 << D {
            return false;
        }
        let first = &elements[0];
        if first.level == 0 {
            return false;
        }
        let parent = self.parent(first);
        elements.iter().enumerate().all(|(i, e)| {
            e.sub.is_none() && e.level == first.level && self.parent(e) == parent && self.child_id(e) == i
        })
    }

    fn compare(&self, a: &Element, b: &Element) -> Ordering {
        (Self::morton(a), a.level)
            .cmp(&(Self::morton(b), b.level))
            .then_with(|| a.sub.cmp(&b.sub))
    }

    fn parent(&self, e: &Element) -> Element {
        debug_assert!(e.level > 0, "the root has no parent");
        let h = element_len(e.level);
        let mut anchor = e.anchor;
        for coord in anchor.iter_mut().take(D) {
            *coord &= !h;
        }
        Element::new(e.level - 1, anchor)
    }

    fn children(&self, e: &Element, out: &mut Vec<Element>) {
        out.clear();
        out.extend((0..1usize << D).map(|i| Self::child(e, i)));
    }

    fn children_at_face(&self, e: &Element, face: usize, out: &mut Vec<Element>) {
        out.clear();
        let contact = Contact::face(face);
        out.extend(
            (0..1usize << D)
                .filter(|&i| Self::contact_child_matches(i, contact))
                .map(|i| Self::child(e, i)),
        );
    }

    fn is_ancestor(&self, ancestor: &Element, e: &Element) -> bool {
        if ancestor.level > e.level {
            return false;
        }
        let shift = MAX_LEVEL - ancestor.level;
        (0..D).all(|axis| (ancestor.anchor[axis] >> shift) == (e.anchor[axis] >> shift))
    }

    fn first_descendant(&self, e: &Element, level: u8) -> Element {
        Element::new(level, e.anchor)
    }

    fn last_descendant(&self, e: &Element, level: u8) -> Element {
        let offset = element_len(e.level) - element_len(level);
        let mut anchor = e.anchor;
        for coord in anchor.iter_mut().take(D) {
            *coord += offset;
        }
        Element::new(level, anchor)
    }

    fn linear_id(&self, e: &Element, level: u8) -> u64 {
        let shift = MAX_LEVEL - level;
        let mut coords = [0u32; 3];
        for axis in 0..D {
            coords[axis] = e.anchor[axis] >> shift;
        }
        interleave(coords, D, level as u32)
    }

    fn from_linear_id(&self, id: u64, level: u8) -> Element {
        let shift = MAX_LEVEL - level;
        let mut anchor = deinterleave(id, D, level as u32);
        for coord in anchor.iter_mut().take(D) {
            *coord <<= shift;
        }
        Element::new(level, anchor)
    }

    fn count_leaves(&self, e: &Element, level: u8) -> u64 {
        if level < e.level {
            0
        } else {
            1u64 << (D * (level - e.level) as usize)
        }
    }

    fn is_valid(&self, e: &Element) -> bool {
        if e.level > MAX_LEVEL || e.sub.is_some() {
            return false;
        }
        let h = element_len(e.level);
        (0..3).all(|axis| {
            let c = e.anchor[axis];
            if axis < D { c < ROOT_LEN && c % h == 0 } else { c == 0 }
        })
    }

    fn to_string(&self, e: &Element) -> String {
        format!("{} level {} anchor {:?}", Self::CLASS, e.level, &e.anchor[..D])
    }

    fn face_neighbor_inside(&self, e: &Element, face: usize) -> Option<(Element, usize)> {
        let axis = face / 2;
        let h = element_len(e.level);
        let mut anchor = e.anchor;
        if face % 2 == 0 {
            anchor[axis] = anchor[axis].checked_sub(h)?;
        } else {
            if anchor[axis] + h >= ROOT_LEN {
                return None;
            }
            anchor[axis] += h;
        }
        Some((Element::new(e.level, anchor), face ^ 1))
    }

    fn tree_face(&self, e: &Element, face: usize) -> Option<usize> {
        let axis = face / 2;
        let on_boundary = if face % 2 == 0 {
            e.anchor[axis] == 0
        } else {
            e.anchor[axis] + element_len(e.level) == ROOT_LEN
        };
        on_boundary.then_some(face)
    }

    fn neighbor_offsets(&self, adjacency: Adjacency) -> Vec<[i8; 3]> {
        let max_codim = match adjacency {
            Adjacency::Faces => 1,
            Adjacency::Edges if D == 3 => 2,
            Adjacency::Edges => 1,
            Adjacency::Corners => D,
        };
        let mut offsets = Vec::new();
        let total = 3usize.pow(D as u32);
        for code in 0..total {
            let mut offset = [0i8; 3];
            let mut rest = code;
            for slot in offset.iter_mut().take(D) {
                *slot = (rest % 3) as i8 - 1;
                rest /= 3;
            }
            let codim = offset.iter().filter(|&&o| o != 0).count();
            if codim >= 1 && codim <= max_codim {
                offsets.push(offset);
            }
        }
        offsets
    }

    fn neighbor_region(&self, e: &Element, offset: [i8; 3]) -> NeighborRegion {
        let h = element_len(e.level) as i64;
        let mut anchor = e.anchor;
        let mut exit = None;
        let mut exits = 0;
        for axis in 0..D {
            if offset[axis] == 0 {
                continue;
            }
            let c = e.anchor[axis] as i64 + offset[axis] as i64 * h;
            if c < 0 || c >= ROOT_LEN as i64 {
                exits += 1;
                exit = Some(2 * axis + usize::from(offset[axis] > 0));
            } else {
                anchor[axis] = c as u32;
            }
        }
        let shifted = Element::new(e.level, anchor);
        match (exits, exit) {
            (0, _) => NeighborRegion::Inside(shifted),
            (1, Some(face)) => NeighborRegion::AcrossFace {
                face,
                touching: shifted,
            },
            _ => NeighborRegion::Beyond,
        }
    }

    fn offset_contact(&self, offset: [i8; 3]) -> Contact {
        let mut sides = [None; 3];
        for axis in 0..D {
            sides[axis] = match offset[axis] {
                1 => Some(0),
                -1 => Some(1),
                _ => None,
            };
        }
        Contact::from_sides(sides)
    }

    fn transform_across_face(
        &self,
        e: &Element,
        face: usize,
        neighbor_face: usize,
        orientation: u8,
    ) -> Element {
        let h = element_len(e.level);
        let (src_axes, n) = tangent_axes(D, face / 2);
        let (dst_axes, _) = tangent_axes(D, neighbor_face / 2);
        let mut tangent = [0u32; 2];
        for i in 0..n {
            tangent[i] = e.anchor[src_axes[i]];
        }
        if n == 2 && orientation & 4 != 0 {
            tangent.swap(0, 1);
        }
        for (i, t) in tangent.iter_mut().enumerate().take(n) {
            if (orientation >> i) & 1 == 1 {
                *t = ROOT_LEN - *t - h;
            }
        }
        let mut anchor = [0u32; 3];
        anchor[neighbor_face / 2] = if neighbor_face % 2 == 0 { 0 } else { ROOT_LEN - h };
        for i in 0..n {
            anchor[dst_axes[i]] = tangent[i];
        }
        Element::new(e.level, anchor)
    }

    fn transform_contact(
        &self,
        contact: Contact,
        face: usize,
        neighbor_face: usize,
        orientation: u8,
    ) -> Contact {
        let (src_axes, n) = tangent_axes(D, face / 2);
        let (dst_axes, _) = tangent_axes(D, neighbor_face / 2);
        let mut tangent = [None; 2];
        for i in 0..n {
            tangent[i] = contact.side(src_axes[i]);
        }
        if n == 2 && orientation & 4 != 0 {
            tangent.swap(0, 1);
        }
        for (i, t) in tangent.iter_mut().enumerate().take(n) {
            if (orientation >> i) & 1 == 1 {
                *t = t.map(|side| 1 - side);
            }
        }
        let mut sides = [None; 3];
        sides[neighbor_face / 2] = Some((neighbor_face % 2) as u8);
        for i in 0..n {
            sides[dst_axes[i]] = tangent[i];
        }
        Contact::from_sides(sides)
    }

    fn touches_contact(&self, region: &Element, e: &Element, contact: Contact) -> bool {
        let region_len = element_len(region.level);
        let len = element_len(e.level);
        (0..D).all(|axis| match contact.side(axis) {
            Some(0) => e.anchor[axis] == region.anchor[axis],
            Some(_) => e.anchor[axis] + len == region.anchor[axis] + region_len,
            None => true,
        })
    }

    fn contact_children(&self, region: &Element, contact: Contact, out: &mut Vec<Element>) {
        out.clear();
        out.extend(
            (0..1usize << D)
                .filter(|&i| Self::contact_child_matches(i, contact))
                .map(|i| Self::child(region, i)),
        );
    }

    fn first_contact_descendant(&self, region: &Element, contact: Contact) -> Element {
        let span = element_len(region.level) - 1;
        let mut anchor = region.anchor;
        for axis in 0..D {
            if contact.side(axis) == Some(1) {
                anchor[axis] += span;
            }
        }
        Element::new(MAX_LEVEL, anchor)
    }

    fn last_contact_descendant(&self, region: &Element, contact: Contact) -> Element {
        let span = element_len(region.level) - 1;
        let mut anchor = region.anchor;
        for axis in 0..D {
            if contact.side(axis) != Some(0) {
                anchor[axis] += span;
            }
        }
        Element::new(MAX_LEVEL, anchor)
    }

    fn curve_key(&self, e: &Element) -> u64 {
        Self::morton(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn quad() -> QuadScheme {
        QuadScheme::default()
    }

    #[test]
    fn children_are_a_contiguous_family_in_curve_order() {
        let s = quad();
        let root = s.root();
        let mut kids = Vec::new();
        s.children(&root, &mut kids);
        assert_eq!(kids.len(), 4);
        assert!(s.is_family(&kids));
        for pair in kids.windows(2) {
            assert_eq!(s.compare(&pair[0], &pair[1]), Ordering::Less);
        }
        assert_eq!(s.compare(&root, &kids[0]), Ordering::Less);
        for (i, kid) in kids.iter().enumerate() {
            assert_eq!(s.child_id(kid), i);
            assert_eq!(s.parent(kid), root);
        }
        let mut grandkids = Vec::new();
        s.children(&kids[0], &mut grandkids);
        assert_eq!(s.compare(grandkids.last().unwrap(), &kids[1]), Ordering::Less);
        assert!(!s.is_family(&grandkids[..3]));
    }

    #[test]
    fn linear_ids_enumerate_uniform_level() {
        let s = HexScheme::default();
        let mut previous: Option<Element> = None;
        for id in 0..64 {
            let e = s.from_linear_id(id, 2);
            assert!(s.is_valid(&e));
            assert_eq!(s.linear_id(&e, 2), id);
            if let Some(p) = previous {
                assert_eq!(s.compare(&p, &e), Ordering::Less);
            }
            previous = Some(e);
        }
    }

    #[test]
    fn face_neighbors_stay_inside_tree() {
        let s = quad();
        let e = s.from_linear_id(0, 1);
        assert_eq!(s.face_neighbor_inside(&e, 0), None);
        assert_eq!(s.tree_face(&e, 0), Some(0));
        let (n, dual) = s.face_neighbor_inside(&e, 1).unwrap();
        assert_eq!(dual, 0);
        assert_eq!(s.child_id(&n), 1);
        let (back, _) = s.face_neighbor_inside(&n, dual).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn neighbor_offsets_per_adjacency() {
        let q = quad();
        assert_eq!(q.neighbor_offsets(Adjacency::Faces).len(), 4);
        assert_eq!(q.neighbor_offsets(Adjacency::Edges).len(), 4);
        assert_eq!(q.neighbor_offsets(Adjacency::Corners).len(), 8);
        let h = HexScheme::default();
        assert_eq!(h.neighbor_offsets(Adjacency::Faces).len(), 6);
        assert_eq!(h.neighbor_offsets(Adjacency::Edges).len(), 18);
        assert_eq!(h.neighbor_offsets(Adjacency::Corners).len(), 26);
    }

    #[test]
    fn transform_with_flip_reverses_tangent() {
        let s = quad();
        // level-2 element touching the +x face in the lowest row
        let e = Element::new(2, [3 * element_len(2), 0, 0]);
        let plain = s.transform_across_face(&e, 1, 0, 0);
        assert_eq!(plain.anchor(), [0, 0, 0]);
        let flipped = s.transform_across_face(&e, 1, 0, 1);
        assert_eq!(flipped.anchor(), [0, 3 * element_len(2), 0]);
        // transforming back with the inverse lands on the start element
        let back = s.transform_across_face(&flipped, 0, 1, inverse_orientation(1));
        assert_eq!(back, e);
    }

    #[test]
    fn contact_descendants_bound_the_touching_cells() {
        let s = quad();
        let region = s.from_linear_id(0, 0);
        let contact = Contact::face(1);
        let first = s.first_contact_descendant(&region, contact);
        let last = s.last_contact_descendant(&region, contact);
        assert!(s.touches_contact(&region, &first, contact));
        assert!(s.touches_contact(&region, &last, contact));
        assert_eq!(s.compare(&first, &last), Ordering::Less);
        let mut kids = Vec::new();
        s.contact_children(&region, contact, &mut kids);
        assert_eq!(kids.iter().map(|k| s.child_id(k)).collect::<Vec<_>>(), vec![1, 3]);
    }

    proptest! {
        #[test]
        fn parent_of_child_roundtrips(level in 0u8..10, id in 0u64..1_000_000) {
            let s = HexScheme::default();
            let id = id % s.count_leaves(&s.root(), level);
            let e = s.from_linear_id(id, level);
            let mut kids = Vec::new();
            s.children(&e, &mut kids);
            for kid in &kids {
                prop_assert_eq!(s.parent(kid), e);
                prop_assert!(s.is_ancestor(&e, kid));
                prop_assert!(!s.is_ancestor(kid, &e));
            }
            prop_assert_eq!(s.first_descendant(&e, level + 1), kids[0]);
            prop_assert_eq!(s.last_descendant(&e, level + 1), *kids.last().unwrap());
        }

        #[test]
        fn orientation_inverse_is_involution(o in 0u8..8) {
            prop_assert_eq!(inverse_orientation(inverse_orientation(o)), o);
        }
    }
}
