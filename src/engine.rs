//! The orchestrator: one configuration value and one entry point that
//! sequences mining, initial partitioning, refinement and coarsening into
//! the final model. There is no global state; everything the pipeline
//! needs travels through [`Config`].

use thiserror::Error;
use tracing::info;

use crate::bisim::{coarsen, refine, BisimError, UnrefinablePolicy};
use crate::invariant::{BinaryInvariant, InvariantSet};
use crate::miner::{mine_invariants, mine_invariants_closure, MineError};
use crate::partition::{PartitionGraph, PartitionId};
use crate::trace_graph::{NodeId, TraceGraph};

/// Configuration of one inference run.
#[derive(Clone, Debug)]
pub struct Config {
    /// Mine with the transitive-closure reference miner instead of the
    /// chain-walking one.
    pub use_transitive_closure: bool,
    /// Run the counter-example guided refinement; when false the result is
    /// the maximally coarse initial partitioning.
    pub refine: bool,
    /// Run the coarsening pass after refinement.
    pub coarsen: bool,
    /// Whether the INITIAL partition appears among the model's states.
    pub show_initial: bool,
    /// Whether the TERMINAL partition appears among the model's states.
    pub show_terminal: bool,
    /// Reserved seed for deterministic tie-breaking; nothing consumes
    /// randomness at present.
    pub rng_seed: Option<u64>,
    /// How refinement treats a counter-example admitting no split.
    pub on_unrefinable: UnrefinablePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_transitive_closure: false,
            refine: true,
            coarsen: true,
            show_initial: true,
            show_terminal: true,
            rng_seed: None,
            on_unrefinable: UnrefinablePolicy::default(),
        }
    }
}

/// Errors surfaced by [`infer`].
#[derive(Error, Debug)]
pub enum InferenceError {
    /// Mining failed, typically because the trace graph is structurally
    /// invalid.
    #[error(transparent)]
    Mine(#[from] MineError),
    /// Refinement or coarsening failed.
    #[error(transparent)]
    Bisim(#[from] BisimError),
}

/// The result of an inference run: the final partition graph, the mined
/// invariants it satisfies, and the invariants refinement had to give up
/// on (empty unless [`UnrefinablePolicy::Drop`] fired).
pub struct InferredModel<'a> {
    model: PartitionGraph<'a>,
    invariants: InvariantSet,
    dropped: Vec<BinaryInvariant>,
    show_initial: bool,
    show_terminal: bool,
}

impl<'a> InferredModel<'a> {
    /// The final partition graph.
    pub fn partition_graph(&self) -> &PartitionGraph<'a> {
        &self.model
    }

    /// The mined invariant set.
    pub fn invariants(&self) -> &InvariantSet {
        &self.invariants
    }

    /// Invariants dropped as unrefinable during refinement.
    pub fn dropped_invariants(&self) -> &[BinaryInvariant] {
        &self.dropped
    }

    /// The states of the model in stable order, with the sentinel
    /// partitions filtered out according to the configuration.
    pub fn states(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.model.partition_ids().filter(move |&pid| {
            (self.show_initial || pid != self.model.initial_partition())
                && (self.show_terminal || pid != self.model.terminal_partition())
        })
    }

    /// Whether the INITIAL partition is part of [`Self::states`].
    pub fn shows_initial(&self) -> bool {
        self.show_initial
    }

    /// Whether the TERMINAL partition is part of [`Self::states`].
    pub fn shows_terminal(&self) -> bool {
        self.show_terminal
    }

    /// The event nodes a state of the model was merged from, for
    /// explaining the model in terms of the input.
    pub fn explanation(&self, state: PartitionId) -> impl Iterator<Item = NodeId> + '_ {
        self.model.partition(state).members().iter().copied()
    }
}

/// Runs the full pipeline on the given trace graph: mine invariants, build
/// the initial partition graph, refine it until every invariant holds and
/// coarsen it as far as the invariants allow.
pub fn infer<'a>(graph: &'a TraceGraph, config: &Config) -> Result<InferredModel<'a>, InferenceError> {
    let invariants = if config.use_transitive_closure {
        mine_invariants_closure(graph)?
    } else {
        mine_invariants(graph)?
    };

    let mut model = PartitionGraph::initial_from(graph);
    let mut dropped = Vec::new();
    if config.refine {
        dropped = refine(&mut model, &invariants, config.on_unrefinable)?.dropped;
    }
    if config.coarsen {
        let active: Vec<BinaryInvariant> = invariants
            .iter()
            .filter(|inv| !dropped.contains(inv))
            .cloned()
            .collect();
        coarsen(&mut model, &active)?;
    }
    debug_assert_eq!(model.check_consistency(), Ok(()));

    info!(
        invariants = invariants.len(),
        dropped = dropped.len(),
        states = model.size(),
        "inference complete"
    );
    Ok(InferredModel {
        model,
        invariants,
        dropped,
        show_initial: config.show_initial,
        show_terminal: config.show_terminal,
    })
}
