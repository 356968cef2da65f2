//! Element class (cell topology) metadata for trees and elements.

use std::fmt;

/// Topology class of a tree or element.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum ElementClass {
    /// 0D vertex.
    #[default]
    Vertex = 0,
    /// 1D line segment.
    Line = 1,
    /// 2D tensor-product cell.
    Quad = 2,
    /// 2D simplex.
    Triangle = 3,
    /// 3D tensor-product cell.
    Hex = 4,
    /// 3D simplex.
    Tet = 5,
    /// 3D wedge.
    Prism = 6,
    /// 3D pyramid.
    Pyramid = 7,
}

impl ElementClass {
    /// All classes in tag order.
    pub const ALL: [ElementClass; 8] = [
        ElementClass::Vertex,
        ElementClass::Line,
        ElementClass::Quad,
        ElementClass::Triangle,
        ElementClass::Hex,
        ElementClass::Tet,
        ElementClass::Prism,
        ElementClass::Pyramid,
    ];

    /// Decode a wire tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Topological dimension.
    pub fn dimension(self) -> usize {
        match self {
            ElementClass::Vertex => 0,
            ElementClass::Line => 1,
            ElementClass::Quad | ElementClass::Triangle => 2,
            ElementClass::Hex | ElementClass::Tet | ElementClass::Prism | ElementClass::Pyramid => 3,
        }
    }

    /// Number of faces (codimension-1 boundary entities).
    pub fn num_faces(self) -> usize {
        match self {
            ElementClass::Vertex => 0,
            ElementClass::Line => 2,
            ElementClass::Quad => 4,
            ElementClass::Triangle => 3,
            ElementClass::Hex => 6,
            ElementClass::Tet => 4,
            ElementClass::Prism | ElementClass::Pyramid => 5,
        }
    }

    /// Number of corner vertices.
    pub fn num_vertices(self) -> usize {
        match self {
            ElementClass::Vertex => 1,
            ElementClass::Line => 2,
            ElementClass::Quad => 4,
            ElementClass::Triangle => 3,
            ElementClass::Hex => 8,
            ElementClass::Tet => 4,
            ElementClass::Prism => 6,
            ElementClass::Pyramid => 5,
        }
    }

    /// Number of children under the default refinement rule.
    pub fn num_children(self) -> usize {
        match self {
            ElementClass::Vertex => 1,
            ElementClass::Line => 2,
            ElementClass::Quad | ElementClass::Triangle => 4,
            ElementClass::Hex | ElementClass::Tet | ElementClass::Prism => 8,
            ElementClass::Pyramid => 10,
        }
    }

    /// Number of leaves a single tree of this class holds after uniform
    /// refinement to `level`, or `None` on overflow.
    ///
    /// Pyramids refine into six pyramids and four tets, which gives
    /// `2 * 8^level - 6^level` leaves.
    pub fn count_leaves_from_root(self, level: u8) -> Option<u64> {
        let level = level as u32;
        match self {
            ElementClass::Pyramid => {
                let eight = 8u64.checked_pow(level)?;
                let six = 6u64.checked_pow(level)?;
                eight.checked_mul(2)?.checked_sub(six)
            }
            other => (other.num_children() as u64).checked_pow(level),
        }
    }

    /// Short lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ElementClass::Vertex => "vertex",
            ElementClass::Line => "line",
            ElementClass::Quad => "quad",
            ElementClass::Triangle => "triangle",
            ElementClass::Hex => "hex",
            ElementClass::Tet => "tet",
            ElementClass::Prism => "prism",
            ElementClass::Pyramid => "pyramid",
        }
    }
}

impl fmt::Display for ElementClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_counts_follow_refinement_rule() {
        assert_eq!(ElementClass::Quad.count_leaves_from_root(3), Some(64));
        assert_eq!(ElementClass::Hex.count_leaves_from_root(2), Some(64));
        assert_eq!(ElementClass::Line.count_leaves_from_root(0), Some(1));
        assert_eq!(ElementClass::Vertex.count_leaves_from_root(7), Some(1));
        assert_eq!(ElementClass::Pyramid.count_leaves_from_root(1), Some(10));
        assert_eq!(ElementClass::Pyramid.count_leaves_from_root(2), Some(92));
        assert_eq!(ElementClass::Hex.count_leaves_from_root(30), None);
    }

    #[test]
    fn wire_tag_roundtrip() {
        for class in ElementClass::ALL {
            assert_eq!(ElementClass::from_u8(class as u8), Some(class));
        }
        assert_eq!(ElementClass::from_u8(8), None);
        assert_eq!(ElementClass::default(), ElementClass::Vertex);
    }
}
