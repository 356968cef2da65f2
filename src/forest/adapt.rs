//! Adapt engine: refine and coarsen the leaves of a forest.
//!
//! The traversal walks every local tree in curve order. When the next leaves
//! form a complete family they are presented together, otherwise a single
//! leaf is presented. The answer applies to the first presented leaf only,
//! except for [`AdaptAction::Coarsen`], which replaces the whole family by
//! its parent. Batch markers are applied through the same traversal, so a
//! marker array and a callback returning the same values agree leaf by leaf.

use super::{Forest, LocalTree};
use crate::eclass::ElementClass;
use crate::mesh_error::MeshForestError;
use crate::scheme::{Element, Scheme};

/// Decision for a presented leaf or family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum AdaptAction {
    /// Replace the presented family by its parent.
    Coarsen = -1,
    Keep = 0,
    /// Replace the first presented leaf by its children.
    Refine = 1,
}

impl TryFrom<i8> for AdaptAction {
    type Error = i8;

    fn try_from(value: i8) -> Result<Self, i8> {
        match value {
            -1 => Ok(Self::Coarsen),
            0 => Ok(Self::Keep),
            1 => Ok(Self::Refine),
            other => Err(other),
        }
    }
}

impl From<AdaptAction> for i8 {
    fn from(action: AdaptAction) -> i8 {
        action as i8
    }
}

/// What the decision function sees.
#[derive(Clone, Copy)]
pub struct AdaptQuery<'a> {
    /// The forest being adapted.
    pub forest_from: &'a Forest,
    pub local_tree: usize,
    pub global_tree: u64,
    pub eclass: ElementClass,
    pub scheme: &'a dyn Scheme,
    /// Index in the source tree of the first presented leaf, or of the leaf
    /// a recursively presented element descends from.
    pub element_index: usize,
    /// The presented leaves: a family when `is_family`, otherwise one leaf.
    pub elements: &'a [Element],
    pub is_family: bool,
}

impl AdaptQuery<'_> {
    /// The first presented leaf.
    pub fn element(&self) -> &Element {
        &self.elements[0]
    }
}

/// Decision function of callback adapt.
pub type AdaptFn = dyn Fn(&AdaptQuery<'_>) -> AdaptAction + Send + Sync;

/// The two refinement frontends.
pub(crate) enum Decision<'a> {
    Callback(&'a AdaptFn),
    /// One marker per local leaf of the source forest.
    Batch(&'a [i8]),
}

impl Decision<'_> {
    fn decide(&self, query: &AdaptQuery<'_>, tree_offset: u64) -> Result<AdaptAction, MeshForestError> {
        match self {
            Decision::Callback(f) => Ok(f(query)),
            Decision::Batch(markers) => {
                let value = markers[(tree_offset as usize) + query.element_index];
                AdaptAction::try_from(value).map_err(|value| MeshForestError::InvalidAdaptMarker {
                    tree: query.local_tree,
                    element: query.element_index,
                    value: value.into(),
                })
            }
        }
    }
}

/// Check a batch marker array against the leaves of `forest`.
pub(crate) fn validate_markers(forest: &Forest, markers: &[i8]) -> Result<(), MeshForestError> {
    let expected = forest.local_num_elements() as usize;
    if markers.len() != expected {
        return Err(MeshForestError::MarkerCountMismatch {
            expected,
            found: markers.len(),
        });
    }
    for (t, tree) in forest.trees.iter().enumerate() {
        let start = tree.element_offset as usize;
        for (i, &value) in markers[start..start + tree.elements.len()].iter().enumerate() {
            if AdaptAction::try_from(value).is_err() {
                return Err(MeshForestError::InvalidAdaptMarker {
                    tree: t,
                    element: i,
                    value: value.into(),
                });
            }
        }
    }
    Ok(())
}

/// Counters of one adapt pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct AdaptStats {
    pub(crate) refined: usize,
    pub(crate) coarsened: usize,
}

struct TreeAdapter<'a> {
    from: &'a Forest,
    source: &'a LocalTree,
    local_tree: usize,
    scheme: &'a dyn Scheme,
    decision: &'a Decision<'a>,
    recursive: bool,
    out: Vec<Element>,
    children: Vec<Element>,
    stats: AdaptStats,
}

impl<'a> TreeAdapter<'a> {
    fn query<'q>(&'q self, element_index: usize, elements: &'q [Element], is_family: bool) -> AdaptQuery<'q> {
        AdaptQuery {
            forest_from: self.from,
            local_tree: self.local_tree,
            global_tree: self.source.global_id(),
            eclass: self.source.eclass(),
            scheme: self.scheme,
            element_index,
            elements,
            is_family,
        }
    }

    fn check_level(&self, e: &Element, index: usize) -> Result<(), MeshForestError> {
        if self.scheme.level(e) >= self.scheme.max_level() {
            return Err(MeshForestError::LevelOverflow {
                tree: self.local_tree,
                element: index,
                max_level: self.scheme.max_level(),
            });
        }
        Ok(())
    }

    fn run(mut self) -> Result<(Vec<Element>, AdaptStats), MeshForestError> {
        let source = self.source;
        let elements = source.elements.as_slice();
        let mut i = 0;
        while i < elements.len() {
            let e = &elements[i];
            let family_len = self.scheme.num_children(e);
            let is_family = self.scheme.level(e) > 0
                && i + family_len <= elements.len()
                && self.scheme.is_family(&elements[i..i + family_len]);
            let presented = if is_family {
                &elements[i..i + family_len]
            } else {
                std::slice::from_ref(e)
            };
            let query = self.query(i, presented, is_family);
            match self.decision.decide(&query, source.element_offset)? {
                AdaptAction::Keep => {
                    self.out.push(*e);
                    i += 1;
                }
                AdaptAction::Refine => {
                    self.refine(e, i)?;
                    i += 1;
                }
                AdaptAction::Coarsen if is_family => {
                    self.out.push(self.scheme.parent(e));
                    self.stats.coarsened += 1;
                    i += family_len;
                    if self.recursive {
                        self.coarsen_tail(i - family_len)?;
                    }
                }
                AdaptAction::Coarsen => {
                    return Err(MeshForestError::CoarsenNonFamily {
                        tree: self.local_tree,
                        element: i,
                    });
                }
            }
        }
        Ok((self.out, self.stats))
    }

    /// Replace `e` by its children; recursively, children are presented
    /// again one at a time and refined while the answer is `Refine`.
    fn refine(&mut self, e: &Element, index: usize) -> Result<(), MeshForestError> {
        self.check_level(e, index)?;
        self.stats.refined += 1;
        self.scheme.children(e, &mut self.children);
        if !self.recursive {
            self.out.extend_from_slice(&self.children);
            return Ok(());
        }
        let mut stack: Vec<Element> = self.children.iter().rev().copied().collect();
        while let Some(child) = stack.pop() {
            let query = self.query(index, std::slice::from_ref(&child), false);
            if self.decision.decide(&query, self.source.element_offset)? == AdaptAction::Refine {
                self.check_level(&child, index)?;
                self.stats.refined += 1;
                self.scheme.children(&child, &mut self.children);
                stack.extend(self.children.iter().rev().copied());
            } else {
                self.out.push(child);
            }
        }
        Ok(())
    }

    /// Present a family completed at the end of the new leaves again, while
    /// the answer is `Coarsen`.
    fn coarsen_tail(&mut self, index: usize) -> Result<(), MeshForestError> {
        loop {
            let Some(last) = self.out.last() else {
                return Ok(());
            };
            let family_len = self.scheme.num_children(last);
            if self.scheme.level(last) == 0
                || self.out.len() < family_len
                || self.scheme.child_id(last) != family_len - 1
            {
                return Ok(());
            }
            let tail_start = self.out.len() - family_len;
            let tail = &self.out[tail_start..];
            if !self.scheme.is_family(tail) {
                return Ok(());
            }
            let query = self.query(index, tail, true);
            if self.decision.decide(&query, self.source.element_offset)? != AdaptAction::Coarsen {
                return Ok(());
            }
            let parent = self.scheme.parent(&self.out[tail_start]);
            self.out.truncate(tail_start);
            self.out.push(parent);
            self.stats.coarsened += 1;
        }
    }
}

/// Adapt every local tree of `from`.
pub(crate) fn adapt_trees(
    from: &Forest,
    decision: &Decision<'_>,
    recursive: bool,
) -> Result<(Vec<LocalTree>, AdaptStats), MeshForestError> {
    let mut trees = Vec::with_capacity(from.trees.len());
    let mut total = AdaptStats::default();
    for (local_tree, source) in from.trees.iter().enumerate() {
        let scheme = from.schemes.scheme(source.eclass())?;
        let adapter = TreeAdapter {
            from,
            source,
            local_tree,
            scheme,
            decision,
            recursive,
            out: Vec::with_capacity(source.elements.len()),
            children: Vec::new(),
            stats: AdaptStats::default(),
        };
        let (elements, stats) = adapter.run()?;
        total.refined += stats.refined;
        total.coarsened += stats.coarsened;
        trees.push(LocalTree::new(source.tree.clone(), elements));
    }
    Ok((trees, total))
}
