//! `Element`: the value stored in forest leaf arrays and ghost layers.
//!
//! An element is identified by its refinement level and the anchor (lowest
//! corner) on the integer lattice of the finest level. Transition
//! subelements additionally carry a [`SubelementId`]. The encoding is shared
//! by all default schemes; only the scheme interprets it.

use std::fmt;

/// Finest refinement level of the default schemes.
pub const MAX_LEVEL: u8 = 21;

/// Side length of a tree root on the finest-level lattice.
pub const ROOT_LEN: u32 = 1 << MAX_LEVEL;

/// Length of an element of `level` on the finest-level lattice.
#[inline]
pub const fn element_len(level: u8) -> u32 {
    ROOT_LEN >> level
}

/// Identifies a transition subelement within its parent quad.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct SubelementId {
    /// Bitmask of the parent's split faces (bit `f` set when face `f` is split).
    pub transition_type: u8,
    /// Position of the subelement around the parent's center.
    pub index: u8,
}

/// A leaf or candidate element of a tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Element {
    pub(crate) level: u8,
    pub(crate) anchor: [u32; 3],
    pub(crate) sub: Option<SubelementId>,
}

impl Element {
    /// The root element of a tree.
    pub const fn root() -> Self {
        Self {
            level: 0,
            anchor: [0; 3],
            sub: None,
        }
    }

    /// Construct an element from its level and anchor.
    ///
    /// No validity check is performed; use [`Scheme::is_valid`](super::Scheme::is_valid).
    pub const fn new(level: u8, anchor: [u32; 3]) -> Self {
        Self {
            level,
            anchor,
            sub: None,
        }
    }

    /// Refinement level.
    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Anchor coordinates on the finest-level lattice.
    #[inline]
    pub fn anchor(&self) -> [u32; 3] {
        self.anchor
    }

    /// Subelement tag, if this is a transition subelement.
    #[inline]
    pub fn subelement(&self) -> Option<SubelementId> {
        self.sub
    }

    /// The hierarchical element a subelement belongs to (identity otherwise).
    #[inline]
    pub fn without_subelement(&self) -> Element {
        Element {
            level: self.level,
            anchor: self.anchor,
            sub: None,
        }
    }

    pub(crate) fn with_subelement(&self, sub: SubelementId) -> Element {
        Element {
            level: self.level,
            anchor: self.anchor,
            sub: Some(sub),
        }
    }
}

impl Default for Element {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub {
            Some(sub) => write!(
                f,
                "Element(l{} {:?} sub {}/{:#06b})",
                self.level, self.anchor, sub.index, sub.transition_type
            ),
            None => write!(f, "Element(l{} {:?})", self.level, self.anchor),
        }
    }
}
