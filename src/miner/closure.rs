//! The transitive-closure miner. Instead of counting, it materialises for
//! every event instance the set of event types reachable from it (resp.
//! reaching it) under the time relation, which for a chain is the
//! transitive closure of the successor relation. The three invariant
//! families then fall out of intersections and unions over these sets.
//! Kept as a reference implementation; produces the same invariant set as
//! the chain-walking miner on any finite chain trace graph.

use bit_set::BitSet;
use tracing::debug;

use super::MineError;
use crate::event::EventType;
use crate::invariant::{BinaryInvariant, InvariantSet};
use crate::math;
use crate::trace_graph::TraceGraph;

/// Hard cap on the number of distinct event types the closure miner will
/// attempt; beyond this the per-type bit rows become unreasonable.
const MAX_CLOSURE_TYPES: usize = 1 << 12;

/// Mines the same invariant families as [`super::mine_invariants`] via
/// per-instance reachability sets. Reports [`MineError::ClosureTooLarge`]
/// instead of attempting alphabets beyond its capacity.
pub fn mine_invariants_closure(graph: &TraceGraph) -> Result<InvariantSet, MineError> {
    graph.ensure_totally_ordered()?;

    let types: Vec<EventType> = graph
        .event_types()
        .into_iter()
        .filter(|t| !t.is_sentinel())
        .collect();
    if types.len() > MAX_CLOSURE_TYPES {
        return Err(MineError::ClosureTooLarge {
            nodes: graph.size(),
            types: types.len(),
        });
    }
    let index: math::Map<&EventType, usize> =
        types.iter().enumerate().map(|(i, t)| (t, i)).collect();

    // Per type a: the types that follow *every* instance of a, the types
    // that follow *some* instance of a, and the types that precede every
    // instance of a.
    let mut follows_all: Vec<Option<BitSet>> = vec![None; types.len()];
    let mut follows_any: Vec<BitSet> = vec![BitSet::with_capacity(types.len()); types.len()];
    let mut precedes_all: Vec<Option<BitSet>> = vec![None; types.len()];

    for &head in graph.trace_heads() {
        let chain: Vec<usize> = graph
            .trace_nodes(head)
            .map(|id| index[graph.node(id).etype()])
            .collect();

        let mut after = BitSet::with_capacity(types.len());
        for &ti in chain.iter().rev() {
            match &mut follows_all[ti] {
                Some(set) => set.intersect_with(&after),
                slot => *slot = Some(after.clone()),
            }
            follows_any[ti].union_with(&after);
            after.insert(ti);
        }

        let mut before = BitSet::with_capacity(types.len());
        for &ti in &chain {
            match &mut precedes_all[ti] {
                Some(set) => set.intersect_with(&before),
                slot => *slot = Some(before.clone()),
            }
            before.insert(ti);
        }
    }

    let relation = graph.time_relation().clone();
    let mut set = InvariantSet::new();
    for (ai, a) in types.iter().enumerate() {
        for (bi, b) in types.iter().enumerate() {
            if follows_all[ai].as_ref().is_some_and(|s| s.contains(bi)) {
                set.add(BinaryInvariant::always_followed_by(
                    a.clone(),
                    b.clone(),
                    relation.clone(),
                ));
            }
        }
    }
    for (ai, a) in types.iter().enumerate() {
        for (bi, b) in types.iter().enumerate() {
            if precedes_all[bi].as_ref().is_some_and(|s| s.contains(ai)) {
                set.add(BinaryInvariant::always_precedes(
                    a.clone(),
                    b.clone(),
                    relation.clone(),
                ));
            }
        }
    }
    for (ai, a) in types.iter().enumerate() {
        for (bi, b) in types.iter().enumerate() {
            if !follows_any[ai].contains(bi) {
                set.add(BinaryInvariant::never_followed_by(
                    a.clone(),
                    b.clone(),
                    relation.clone(),
                ));
            }
        }
    }

    debug!(
        traces = graph.trace_count(),
        types = types.len(),
        invariants = set.len(),
        "mined invariants by transitive closure"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::mine_invariants;
    use crate::tests::chain_graph;

    #[test]
    fn agrees_with_chain_walker() {
        let suites: &[&[&str]] = &[
            &["a b", "a c b"],
            &["x", "x y", "y x"],
            &["login read", "login read read"],
            &["a b c", "a b d"],
            &["a b", "a b a"],
            &["a a a", "a"],
            &["p q r s", "p r q s", "s"],
        ];
        for traces in suites {
            let graph = chain_graph(traces);
            let chained = mine_invariants(&graph).unwrap();
            let closed = mine_invariants_closure(&graph).unwrap();
            assert_eq!(chained, closed, "traces {traces:?}");
        }
    }

    #[test]
    fn closure_respects_instance_quantification() {
        // some a reaches a b, but not every a does
        let set = mine_invariants_closure(&chain_graph(&["a b a"])).unwrap();
        assert!(!set.contains(&BinaryInvariant::always_followed_by(
            EventType::label("a"),
            EventType::label("b"),
            crate::event::Relation::time(),
        )));
    }
}
