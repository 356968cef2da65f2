//! Element schemes: the per-class capability interface used by every other
//! component.
//!
//! A [`Scheme`] is a pure function table over [`Element`] values. The forest
//! never inspects element encodings directly; it asks the scheme of the
//! tree's class for levels, curve order, family relations, neighbors and
//! tree-to-tree transforms. One scheme exists per element class, selected
//! once per tree through a [`SchemeSet`].
//!
//! The contract every implementation upholds: the children of an element are
//! contiguous under [`Scheme::compare`] and ordered consistently with the
//! space-filling curve, so storage order within a tree is curve order.

pub mod cube;
pub mod element;
pub mod transition;

pub use cube::{DefaultCube, HexScheme, LineScheme, QuadScheme, VertexScheme};
pub use element::{element_len, Element, SubelementId, MAX_LEVEL, ROOT_LEN};
pub use transition::{TransitionQuadScheme, SUBELEMENT_OUTER_FACE};

use crate::eclass::ElementClass;
use crate::mesh_error::MeshForestError;
use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Adjacency breadth for neighbor enumeration (ghosts, balance).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Adjacency {
    /// Elements sharing a face.
    #[default]
    Faces,
    /// Faces plus edges (in 2D edges coincide with faces).
    Edges,
    /// Faces, edges and corners.
    Corners,
}

/// Which side of a region touches the element a query starts from, per axis.
///
/// `Some(0)` pins the region's low side on that axis, `Some(1)` its high
/// side, `None` leaves the axis free.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Contact {
    sides: [Option<u8>; 3],
}

impl Contact {
    /// A contact on the given face of a cube-like region.
    pub fn face(face: usize) -> Self {
        let mut sides = [None; 3];
        sides[face / 2] = Some((face % 2) as u8);
        Self { sides }
    }

    pub(crate) fn from_sides(sides: [Option<u8>; 3]) -> Self {
        Self { sides }
    }

    /// The pinned side on `axis`, if any.
    pub fn side(&self, axis: usize) -> Option<u8> {
        self.sides[axis]
    }
}

/// Location of a same-level neighbor region relative to the element's tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeighborRegion {
    /// The region lies inside the same tree.
    Inside(Element),
    /// The region leaves the tree through exactly one tree face. `touching`
    /// is the element shifted along the in-tree axes; transform it with
    /// [`Scheme::transform_across_face`] to obtain the region.
    AcrossFace { face: usize, touching: Element },
    /// The region leaves the tree through more than one face.
    Beyond,
}

/// Capability interface of one element class.
pub trait Scheme: fmt::Debug + Send + Sync {
    /// The class this scheme implements.
    fn eclass(&self) -> ElementClass;

    /// Bytes occupied by one element.
    fn size(&self) -> usize {
        std::mem::size_of::<Element>()
    }

    /// Topological dimension.
    fn dimension(&self) -> usize {
        self.eclass().dimension()
    }

    /// Finest level elements of this scheme may reach.
    fn max_level(&self) -> u8 {
        MAX_LEVEL
    }

    /// Refinement level of `e`.
    fn level(&self, e: &Element) -> u8 {
        e.level
    }

    fn num_faces(&self, e: &Element) -> usize;

    fn num_children(&self, e: &Element) -> usize;

    /// Number of children of `e` touching `face`.
    fn num_face_children(&self, e: &Element, face: usize) -> usize;

    /// Position of `e` among its siblings.
    fn child_id(&self, e: &Element) -> usize;

    /// Whether `elements` is a complete family in child order.
    fn is_family(&self, elements: &[Element]) -> bool;

    fn is_subelement(&self, e: &Element) -> bool {
        e.sub.is_some()
    }

    fn equal(&self, a: &Element, b: &Element) -> bool {
        a == b
    }

    /// Total curve order; ancestors sort before their descendants.
    fn compare(&self, a: &Element, b: &Element) -> Ordering;

    fn parent(&self, e: &Element) -> Element;

    /// Replace the contents of `out` with the children of `e` in curve order.
    fn children(&self, e: &Element, out: &mut Vec<Element>);

    /// Replace the contents of `out` with the children of `e` touching `face`.
    fn children_at_face(&self, e: &Element, face: usize, out: &mut Vec<Element>);

    /// Whether `ancestor` equals `e` or contains it (subelement tags are ignored).
    fn is_ancestor(&self, ancestor: &Element, e: &Element) -> bool;

    fn first_descendant(&self, e: &Element, level: u8) -> Element;

    fn last_descendant(&self, e: &Element, level: u8) -> Element;

    /// Index of the ancestor or first descendant of `e` at `level` in a
    /// uniform refinement of the tree.
    fn linear_id(&self, e: &Element, level: u8) -> u64;

    fn from_linear_id(&self, id: u64, level: u8) -> Element;

    /// Number of descendants of `e` at `level`.
    fn count_leaves(&self, e: &Element, level: u8) -> u64;

    fn root(&self) -> Element {
        Element::root()
    }

    fn is_valid(&self, e: &Element) -> bool;

    fn to_string(&self, e: &Element) -> String;

    /// Allocate `n` elements initialised to the root.
    fn new_elements(&self, n: usize) -> Vec<Element> {
        vec![self.root(); n]
    }

    /// Same-level neighbor across `face` inside the tree, with the dual face.
    fn face_neighbor_inside(&self, e: &Element, face: usize) -> Option<(Element, usize)>;

    /// Tree face `face` of `e` lies on, if any.
    fn tree_face(&self, e: &Element, face: usize) -> Option<usize>;

    /// Neighbor offsets covered by `adjacency`, in a fixed order.
    fn neighbor_offsets(&self, adjacency: Adjacency) -> Vec<[i8; 3]>;

    fn neighbor_region(&self, e: &Element, offset: [i8; 3]) -> NeighborRegion;

    /// Contact of the region at `offset` with the element it was built from.
    fn offset_contact(&self, offset: [i8; 3]) -> Contact;

    /// The same-level neighbor in the tree behind tree face `face`, reached
    /// through that tree's `neighbor_face` with the stored `orientation`.
    /// `e` must touch `face`.
    fn transform_across_face(
        &self,
        e: &Element,
        face: usize,
        neighbor_face: usize,
        orientation: u8,
    ) -> Element;

    /// Map a contact through the same transform as
    /// [`transform_across_face`](Scheme::transform_across_face).
    fn transform_contact(
        &self,
        contact: Contact,
        face: usize,
        neighbor_face: usize,
        orientation: u8,
    ) -> Contact;

    /// Whether descendant `e` of `region` touches the region's `contact` part.
    fn touches_contact(&self, region: &Element, e: &Element, contact: Contact) -> bool;

    fn contact_children(&self, region: &Element, contact: Contact, out: &mut Vec<Element>);

    /// First finest-level descendant of `region` touching `contact`, in curve order.
    fn first_contact_descendant(&self, region: &Element, contact: Contact) -> Element;

    /// Last finest-level descendant of `region` touching `contact`, in curve order.
    fn last_contact_descendant(&self, region: &Element, contact: Contact) -> Element;

    /// Curve position of the element's first finest-level descendant.
    fn curve_key(&self, e: &Element) -> u64;

    /// Whether this scheme can replace elements by transition subelements.
    fn supports_transition(&self) -> bool {
        false
    }

    /// Replace the contents of `out` with the subelements of `base` for the
    /// given split-face mask.
    fn transition(&self, _base: &Element, _transition_type: u8, out: &mut Vec<Element>) {
        out.clear();
    }

    /// Number of subelements a transition of this type produces.
    fn num_subelements(&self, _transition_type: u8) -> usize {
        0
    }

    /// For a subelement: the parent face its outer face lies on and the
    /// hierarchical region whose face matches the outer face exactly.
    fn subelement_face_region(&self, _e: &Element) -> Option<(usize, Element)> {
        None
    }

    /// For a subelement and one of its inner faces: the sibling subelement
    /// across it and the dual face.
    fn sibling_subelement(&self, _e: &Element, _face: usize) -> Option<(Element, usize)> {
        None
    }
}

/// The scheme chosen for each element class.
#[derive(Debug, Clone)]
pub struct SchemeSet {
    schemes: [Option<Arc<dyn Scheme>>; 8],
}

static DEFAULT_SCHEMES: Lazy<Arc<SchemeSet>> = Lazy::new(|| {
    let mut set = SchemeSet::empty();
    set.insert(Arc::new(VertexScheme::default()));
    set.insert(Arc::new(LineScheme::default()));
    set.insert(Arc::new(QuadScheme::default()));
    set.insert(Arc::new(HexScheme::default()));
    Arc::new(set)
});

static TRANSITION_SCHEMES: Lazy<Arc<SchemeSet>> = Lazy::new(|| {
    let mut set = (**DEFAULT_SCHEMES).clone();
    set.insert(Arc::new(TransitionQuadScheme::default()));
    Arc::new(set)
});

impl SchemeSet {
    /// A set without any scheme.
    pub fn empty() -> Self {
        Self {
            schemes: Default::default(),
        }
    }

    /// Vertex, line, quad and hex default schemes.
    pub fn default_schemes() -> Arc<SchemeSet> {
        Arc::clone(&DEFAULT_SCHEMES)
    }

    /// The default set with quads replaced by the transitioned variant.
    pub fn transition_schemes() -> Arc<SchemeSet> {
        Arc::clone(&TRANSITION_SCHEMES)
    }

    /// Register `scheme` for its class, replacing any previous one.
    pub fn insert(&mut self, scheme: Arc<dyn Scheme>) {
        let slot = scheme.eclass() as usize;
        self.schemes[slot] = Some(scheme);
    }

    /// The scheme of `eclass`.
    pub fn scheme(&self, eclass: ElementClass) -> Result<&dyn Scheme, MeshForestError> {
        self.schemes[eclass as usize]
            .as_deref()
            .ok_or(MeshForestError::UnsupportedElementClass(eclass))
    }

    /// Leaves of one tree of `eclass` at uniform `level`, through the scheme
    /// when one is registered and the class rule otherwise.
    pub fn count_leaves_from_root(&self, eclass: ElementClass, level: u8) -> Option<u64> {
        match self.schemes[eclass as usize].as_deref() {
            Some(scheme) if level <= scheme.max_level() => {
                Some(scheme.count_leaves(&scheme.root(), level))
            }
            Some(_) => None,
            None => eclass.count_leaves_from_root(level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_covers_cube_classes_only() {
        let set = SchemeSet::default_schemes();
        for class in [
            ElementClass::Vertex,
            ElementClass::Line,
            ElementClass::Quad,
            ElementClass::Hex,
        ] {
            assert_eq!(set.scheme(class).unwrap().eclass(), class);
        }
        assert_eq!(
            set.scheme(ElementClass::Tet).unwrap_err(),
            MeshForestError::UnsupportedElementClass(ElementClass::Tet)
        );
        assert!(!set.scheme(ElementClass::Quad).unwrap().supports_transition());
        let transition = SchemeSet::transition_schemes();
        assert!(transition.scheme(ElementClass::Quad).unwrap().supports_transition());
    }

    #[test]
    fn leaf_counts_fall_back_to_class_rule() {
        let set = SchemeSet::default_schemes();
        assert_eq!(set.count_leaves_from_root(ElementClass::Quad, 2), Some(16));
        assert_eq!(set.count_leaves_from_root(ElementClass::Triangle, 2), Some(16));
        assert_eq!(set.count_leaves_from_root(ElementClass::Pyramid, 1), Some(10));
    }
}
