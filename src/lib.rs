#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Defines some containers with deterministic iteration order that are
/// used throughout the crate.
pub mod math;

/// The event model: event types with the INITIAL/TERMINAL sentinels,
/// events and relation labels.
pub mod event;

/// Per-trace chain graphs joined through shared sentinel nodes.
pub mod trace_graph;

/// Binary temporal invariants and the canonical set they live in.
pub mod invariant;

/// The invariant miners, one chain-walking and one closure-based.
pub mod miner;

/// The partition graph, the engine's mutable quotient over the traces.
pub mod partition;

/// The FSM invariant checker with its tracing state sets.
pub mod fsmcheck;

/// Refinement and coarsening of the partition graph.
pub mod bisim;

/// Configuration and the end-to-end inference entry point.
pub mod engine;

/// Export of inferred models to the dot (graphviz) format.
pub mod dot;

/// The prelude is supposed to make using this package easier. Including
/// everything, i.e. `use tracemine::prelude::*;` should be enough to use
/// the package.
pub mod prelude {
    pub use crate::bisim::{coarsen, refine, BisimError, Refinement, UnrefinablePolicy};
    pub use crate::dot::{DotShape, DotStateAttribute, DotTransitionAttribute, Dottable};
    pub use crate::engine::{infer, Config, InferenceError, InferredModel};
    pub use crate::event::{Event, EventType, Relation, SourceInfo};
    pub use crate::fsmcheck::{check, CounterExample, History, TracingStateSet};
    pub use crate::invariant::{BinaryInvariant, InvariantKind, InvariantSet};
    pub use crate::math;
    pub use crate::miner::{mine_invariants, mine_invariants_closure, MineError};
    pub use crate::partition::{Partition, PartitionError, PartitionGraph, PartitionId};
    pub use crate::trace_graph::{
        EventNode, NodeId, TraceGraph, TraceGraphBuilder, TraceGraphError, Transition,
    };
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    /// Builds a chain trace graph from whitespace-separated traces; shared
    /// by the test modules of the whole crate.
    pub(crate) fn chain_graph(traces: &[&str]) -> TraceGraph {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        traces
            .iter()
            .fold(TraceGraph::builder(), |builder, trace| {
                builder.words_trace(trace)
            })
            .build()
            .unwrap()
    }

    /// Enumerates the event-label sequences of all INITIAL-to-TERMINAL
    /// paths whose length stays within the given depth; longer paths (from
    /// cycles in the model) are pruned.
    fn accepted_sequences(model: &InferredModel<'_>, depth: usize) -> Vec<String> {
        let pg = model.partition_graph();
        let time = pg.graph().time_relation().clone();
        let mut sequences = Vec::new();
        let mut stack = vec![(pg.initial_partition(), Vec::<String>::new())];
        while let Some((p, words)) = stack.pop() {
            if words.len() > depth {
                continue;
            }
            for q in pg.successors(p, &time) {
                let etype = pg.partition(q).etype().clone();
                if etype.is_terminal() {
                    sequences.push(words.join(" "));
                } else {
                    let mut extended = words.clone();
                    extended.push(etype.to_string());
                    stack.push((q, extended));
                }
            }
        }
        sequences.sort();
        sequences
    }

    #[test]
    fn trivial_model_keeps_one_state_per_type() {
        let graph = chain_graph(&["a b", "a c b"]);
        let model = infer(&graph, &Config::default()).unwrap();
        // INITIAL, TERMINAL, one state each for a, b and c
        assert_eq!(model.partition_graph().size(), 5);
        for invariant in model.invariants() {
            assert!(check(invariant, model.partition_graph()).is_none());
        }
        assert_eq!(accepted_sequences(&model, 8), ["a b", "a c b"]);
    }

    #[test]
    fn remining_accepted_sequences_weakens_the_invariants() {
        for traces in [
            ["a b", "a c b"].as_slice(),
            ["a x b", "c x d"].as_slice(),
            ["login read", "login read read"].as_slice(),
        ] {
            let graph = chain_graph(traces);
            let model = infer(&graph, &Config::default()).unwrap();
            let sequences = accepted_sequences(&model, 16);
            let remined_graph = sequences
                .iter()
                .fold(TraceGraph::builder(), |builder, trace| {
                    builder.words_trace(trace)
                })
                .build()
                .unwrap();
            let remined = mine_invariants(&remined_graph).unwrap();
            assert!(
                remined.is_subset(model.invariants()),
                "remined invariants of {traces:?} are not a subset"
            );
        }
    }

    #[test]
    fn inference_is_deterministic_end_to_end() {
        let traces = ["a x b", "c x d", "a x b", "e"];
        let one = infer(&chain_graph(&traces), &Config::default())
            .unwrap()
            .invariants()
            .clone();
        let graph = chain_graph(&traces);
        let again = infer(&graph, &Config::default()).unwrap();
        assert_eq!(&one, again.invariants());
        let third = infer(&graph, &Config::default()).unwrap();
        let rendered: Vec<_> = again
            .states()
            .map(|p| again.partition_graph().partition(p).etype().to_string())
            .collect();
        let rendered_again: Vec<_> = third
            .states()
            .map(|p| third.partition_graph().partition(p).etype().to_string())
            .collect();
        assert_eq!(rendered, rendered_again);
    }
}
