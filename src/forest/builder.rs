//! Forest construction and derivation.
//!
//! A [`ForestBuilder`] collects exactly one source (a coarse mesh with a
//! uniform level, or a committed forest to copy, adapt or repartition) and
//! the optional passes. [`ForestBuilder::commit`] runs them collectively in
//! the fixed order source, balance, transition, partition, ghost.

use super::adapt::{adapt_trees, validate_markers, AdaptFn, Decision};
use super::ghost::{build_layer, GhostConfig};
use super::transition::untransition;
use super::{balance, partition, transition, Forest};
use crate::algs::communicator::Communicator;
use crate::cmesh::Cmesh;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshForestError;
use crate::scheme::{Adjacency, SchemeSet};
use std::sync::Arc;

enum Refinement {
    Copy,
    Callback { decide: Box<AdaptFn>, recursive: bool },
    Batch(Vec<i8>),
}

/// Configuring state of a forest.
#[derive(Default)]
pub struct ForestBuilder {
    cmesh: Option<(Arc<Cmesh>, Arc<SchemeSet>)>,
    level: Option<u8>,
    from: Option<Arc<Forest>>,
    refinement: Option<Refinement>,
    do_balance: bool,
    do_transition: bool,
    do_partition: bool,
    ghost: Option<GhostConfig>,
    conflict: Option<MeshForestError>,
}

impl ForestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn conflict(&mut self, a: &'static str, b: &'static str) {
        if self.conflict.is_none() {
            self.conflict = Some(MeshForestError::ConflictingConfiguration(a, b));
        }
    }

    fn set_source(&mut self, name: &'static str, from: Arc<Forest>, refinement: Refinement) {
        if self.cmesh.is_some() {
            self.conflict(name, "set_cmesh");
        }
        if self.refinement.is_some() {
            self.conflict(name, "another refinement source");
        }
        self.from = Some(from);
        self.refinement = Some(refinement);
    }

    /// Build from a coarse mesh; requires [`set_level`](Self::set_level).
    pub fn set_cmesh(&mut self, cmesh: Arc<Cmesh>, schemes: Arc<SchemeSet>) -> &mut Self {
        if self.from.is_some() {
            self.conflict("set_cmesh", "set_from");
        }
        self.cmesh = Some((cmesh, schemes));
        self
    }

    /// Uniform refinement level of a forest built from a coarse mesh.
    pub fn set_level(&mut self, level: u8) -> &mut Self {
        if self.from.is_some() {
            self.conflict("set_level", "set_from");
        }
        self.level = Some(level);
        self
    }

    /// Copy the leaves of `from`; combine with a pass to derive from it.
    pub fn set_from(&mut self, from: Arc<Forest>) -> &mut Self {
        self.set_source("set_from", from, Refinement::Copy);
        self
    }

    /// Adapt `from` with a decision function. With `recursive`, new children
    /// and completed families are presented again.
    pub fn set_adapt(&mut self, from: Arc<Forest>, decide: Box<AdaptFn>, recursive: bool) -> &mut Self {
        self.set_source("set_adapt", from, Refinement::Callback { decide, recursive });
        self
    }

    /// Adapt `from` with one marker in `{-1, 0, 1}` per local leaf, in local order.
    pub fn set_adapt_batch(&mut self, from: Arc<Forest>, markers: Vec<i8>) -> &mut Self {
        self.set_source("set_adapt_batch", from, Refinement::Batch(markers));
        self
    }

    /// Establish the 2:1 condition across faces, edges and corners.
    pub fn set_balance(&mut self, do_balance: bool) -> &mut Self {
        if do_balance && self.do_transition {
            self.conflict("set_balance", "set_transition");
        }
        self.do_balance = do_balance;
        self
    }

    /// Replace leaves at hanging faces by subelement groups.
    pub fn set_transition(&mut self, do_transition: bool) -> &mut Self {
        if do_transition && self.do_balance {
            self.conflict("set_transition", "set_balance");
        }
        self.do_transition = do_transition;
        self
    }

    /// Redistribute leaves to equal shares after the other passes.
    pub fn set_partition(&mut self, do_partition: bool) -> &mut Self {
        self.do_partition = do_partition;
        self
    }

    /// Build a ghost layer of adjacency `kind` with algorithm `version`.
    pub fn set_ghost_ext(&mut self, do_ghost: bool, kind: Adjacency, version: u8) -> &mut Self {
        if !do_ghost {
            self.ghost = None;
            return self;
        }
        match GhostConfig::new(kind, version) {
            Ok(config) => self.ghost = Some(config),
            Err(err) => {
                if self.conflict.is_none() {
                    self.conflict = Some(err);
                }
            }
        }
        self
    }

    /// Face ghosts with the default algorithm.
    pub fn set_ghost(&mut self, do_ghost: bool) -> &mut Self {
        let config = GhostConfig::default();
        self.set_ghost_ext(do_ghost, config.kind, config.version)
    }

    fn has_pass(&self) -> bool {
        self.do_balance || self.do_transition || self.do_partition || self.ghost.is_some()
    }

    /// Commit collectively on `comm`.
    pub fn commit<C: Communicator>(self, comm: &C) -> Result<Arc<Forest>, MeshForestError> {
        if let Some(err) = &self.conflict {
            return Err(err.clone());
        }
        let mut forest = match (&self.cmesh, &self.from, &self.refinement) {
            (Some((cmesh, schemes)), None, _) => {
                let level = self.level.ok_or(MeshForestError::MissingConfiguration("set_level"))?;
                Forest::new_uniform(Arc::clone(cmesh), Arc::clone(schemes), level, comm)?
            }
            (None, Some(from), Some(refinement)) => self.derive(from, refinement, comm)?,
            _ => {
                return Err(MeshForestError::MissingConfiguration(
                    "set_cmesh, set_from, set_adapt or set_adapt_batch",
                ));
            }
        };

        if self.do_balance {
            balance::balance(&mut forest, comm, Adjacency::Corners)?;
            forest.is_balanced = true;
        }
        if self.do_transition {
            transition::transition(&mut forest, comm)?;
        }
        if self.do_partition {
            partition::partition(&mut forest, comm)?;
        }
        if let Some(config) = self.ghost {
            forest.ghosts = Some(build_layer(&forest, comm, config)?);
        }

        forest.validate_invariants()?;
        log::info!(
            "[forest] rank {}/{}: {} of {} elements in {} local trees{}{}",
            forest.rank,
            forest.size,
            forest.local_num_elements(),
            forest.global_num_elements(),
            forest.trees.len(),
            if forest.is_balanced { ", balanced" } else { "" },
            if forest.is_transitioned { ", transitioned" } else { "" }
        );
        Ok(Arc::new(forest))
    }

    fn derive<C: Communicator>(
        &self,
        from: &Forest,
        refinement: &Refinement,
        comm: &C,
    ) -> Result<Forest, MeshForestError> {
        if from.rank != comm.rank() || from.size != comm.size() {
            return Err(MeshForestError::InvalidCmesh(format!(
                "source forest lives on rank {}/{}, communicator is {}/{}",
                from.rank,
                from.size,
                comm.rank(),
                comm.size()
            )));
        }
        let adapting = !matches!(refinement, Refinement::Copy);
        if !adapting && !self.has_pass() {
            return Err(MeshForestError::MissingConfiguration(
                "a refinement or a pass on top of set_from",
            ));
        }
        if let Refinement::Batch(markers) = refinement {
            validate_markers(from, markers)?;
        }

        let untransitioned;
        let (base, origin) = if from.is_transitioned && (adapting || self.do_balance || self.do_transition) {
            let (trees, origin) = untransition(from);
            let mut forest = Forest::from_trees(
                Arc::clone(&from.cmesh),
                Arc::clone(&from.schemes),
                from.rank,
                from.size,
                trees,
            );
            forest.refresh_partition(comm)?;
            untransitioned = forest;
            (&untransitioned, Some(origin))
        } else {
            (from, None)
        };

        let decision_markers;
        let decision = match refinement {
            Refinement::Copy => return Ok(Forest::derive_copy(base)),
            Refinement::Callback { decide, .. } => Decision::Callback(decide.as_ref()),
            Refinement::Batch(markers) => {
                decision_markers = match &origin {
                    Some(origin) => origin.iter().map(|&old| markers[old]).collect(),
                    None => markers.clone(),
                };
                Decision::Batch(&decision_markers)
            }
        };
        let recursive = matches!(refinement, Refinement::Callback { recursive: true, .. });
        let (trees, stats) = adapt_trees(base, &decision, recursive)?;
        let mut forest = Forest::from_trees(
            Arc::clone(&base.cmesh),
            Arc::clone(&base.schemes),
            base.rank,
            base.size,
            trees,
        );
        forest.refresh_partition(comm)?;
        log::debug!(
            "[adapt] rank {}: refined {}, coarsened {} families, {} -> {} elements",
            forest.rank,
            stats.refined,
            stats.coarsened,
            base.local_num_elements(),
            forest.local_num_elements()
        );
        Ok(forest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::cmesh::CmeshBuilder;
    use crate::eclass::ElementClass;
    use crate::forest::{AdaptAction, AdaptQuery};

    fn unit_square() -> Arc<Cmesh> {
        CmeshBuilder::hypercube(ElementClass::Quad)
            .unwrap()
            .commit(&NoComm)
            .unwrap()
    }

    fn uniform(level: u8) -> Arc<Forest> {
        let mut builder = ForestBuilder::new();
        builder
            .set_cmesh(unit_square(), SchemeSet::default_schemes())
            .set_level(level);
        builder.commit(&NoComm).unwrap()
    }

    #[test]
    fn commit_without_source_fails() {
        assert_eq!(
            ForestBuilder::new().commit(&NoComm).unwrap_err(),
            MeshForestError::MissingConfiguration("set_cmesh, set_from, set_adapt or set_adapt_batch")
        );
        let mut builder = ForestBuilder::new();
        builder.set_cmesh(unit_square(), SchemeSet::default_schemes());
        assert_eq!(
            builder.commit(&NoComm).unwrap_err(),
            MeshForestError::MissingConfiguration("set_level")
        );
    }

    #[test]
    fn balance_and_transition_exclude_each_other() {
        let mut builder = ForestBuilder::new();
        builder.set_from(uniform(1)).set_balance(true).set_transition(true);
        assert_eq!(
            builder.commit(&NoComm).unwrap_err(),
            MeshForestError::ConflictingConfiguration("set_transition", "set_balance")
        );
    }

    #[test]
    fn two_refinement_sources_conflict() {
        let from = uniform(1);
        let mut builder = ForestBuilder::new();
        builder
            .set_adapt(Arc::clone(&from), Box::new(|_: &AdaptQuery<'_>| AdaptAction::Keep), false)
            .set_adapt_batch(from, vec![0; 4]);
        assert_eq!(
            builder.commit(&NoComm).unwrap_err(),
            MeshForestError::ConflictingConfiguration("set_adapt_batch", "another refinement source")
        );
    }

    #[test]
    fn plain_copy_needs_a_pass() {
        let mut builder = ForestBuilder::new();
        builder.set_from(uniform(1));
        assert!(matches!(
            builder.commit(&NoComm),
            Err(MeshForestError::MissingConfiguration(_))
        ));
        let mut builder = ForestBuilder::new();
        builder.set_from(uniform(1)).set_partition(true);
        assert_eq!(builder.commit(&NoComm).unwrap().local_num_elements(), 4);
    }

    #[test]
    fn invalid_ghost_version_is_reported_at_commit() {
        let mut builder = ForestBuilder::new();
        builder
            .set_cmesh(unit_square(), SchemeSet::default_schemes())
            .set_level(1)
            .set_ghost_ext(true, Adjacency::Faces, 7);
        assert_eq!(
            builder.commit(&NoComm).unwrap_err(),
            MeshForestError::InvalidGhostVersion(7)
        );
    }

    #[test]
    fn adapting_a_transitioned_forest_starts_from_its_quads() {
        let cmesh = unit_square();
        let mut builder = ForestBuilder::new();
        builder
            .set_cmesh(cmesh, SchemeSet::transition_schemes())
            .set_level(1);
        let coarse = builder.commit(&NoComm).unwrap();

        // refine quarter 0, then transition
        let mut builder = ForestBuilder::new();
        builder
            .set_adapt_batch(coarse, vec![1, 0, 0, 0])
            .set_transition(true);
        let transitioned = builder.commit(&NoComm).unwrap();
        assert!(transitioned.is_transitioned());
        assert_eq!(transitioned.local_num_elements(), 15);

        // marking every leaf with 0 keeps the hierarchical leaves only
        let markers = vec![0i8; 15];
        let mut builder = ForestBuilder::new();
        builder.set_adapt_batch(Arc::clone(&transitioned), markers);
        let plain = builder.commit(&NoComm).unwrap();
        assert!(!plain.is_transitioned());
        assert_eq!(plain.local_num_elements(), 7);
        assert!(plain.iter_elements().all(|(_, _, e)| e.subelement().is_none()));
    }
}
