//! Mining of temporal invariants from chain trace graphs. The default
//! miner walks every trace once in time order and maintains occurrence,
//! followed-by and precedes counters per event-type pair; the three
//! invariant families are then decided from the aggregated counters. A
//! transitive-closure miner living in [`closure`] produces the same result
//! by set operations over per-instance reachability and is kept for
//! cross-validation.

use thiserror::Error;
use tracing::debug;

use crate::event::EventType;
use crate::invariant::{BinaryInvariant, InvariantSet};
use crate::math;
use crate::trace_graph::{NodeId, TraceGraph, TraceGraphError};

mod closure;
pub use closure::mine_invariants_closure;

/// Errors the miners can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MineError {
    /// The trace graph is not a valid chain trace graph.
    #[error(transparent)]
    Trace(#[from] TraceGraphError),
    /// The transitive-closure miner would exceed its capacity on this
    /// alphabet.
    #[error("transitive closure over {types} event types ({nodes} nodes) exceeds the supported size")]
    ClosureTooLarge {
        /// Number of nodes in the trace graph.
        nodes: usize,
        /// Number of distinct event types.
        types: usize,
    },
}

/// Counters collected while walking a single trace in time order.
///
/// `followed_by[(a, b)]` is the number of `a`s that appeared before the most
/// recently visited `b`; `precedes[(a, b)]` is the number of `b`s that
/// appeared after at least one `a`. Both are only populated for pairs that
/// actually co-occurred, absent entries count as zero.
#[derive(Default)]
struct TraceCounts {
    seen: math::Set<EventType>,
    counts: math::Map<EventType, usize>,
    followed_by: math::Map<(EventType, EventType), usize>,
    precedes: math::Map<(EventType, EventType), usize>,
}

fn count_trace(graph: &TraceGraph, head: NodeId) -> TraceCounts {
    let mut c = TraceCounts::default();
    for id in graph.trace_nodes(head) {
        let b = graph.node(id).etype().clone();
        for a in &c.seen {
            *c.precedes.entry((a.clone(), b.clone())).or_default() += 1;
        }
        for a in &c.seen {
            c.followed_by.insert((a.clone(), b.clone()), c.counts[a]);
        }
        c.seen.insert(b.clone());
        *c.counts.entry(b).or_default() += 1;
    }
    c
}

/// Mines the set of binary invariants that hold across all traces of the
/// given chain trace graph by a single forward walk per trace.
///
/// Candidate pairs are drawn from the event types that actually occur;
/// the INITIAL and TERMINAL sentinels never take part in an invariant.
pub fn mine_invariants(graph: &TraceGraph) -> Result<InvariantSet, MineError> {
    graph.ensure_totally_ordered()?;

    let mut g_counts: math::Map<EventType, usize> = math::Map::default();
    let mut g_followed_eq: math::Map<(EventType, EventType), usize> = math::Map::default();
    let mut g_followed_raw: math::Map<(EventType, EventType), usize> = math::Map::default();
    let mut g_precedes: math::Map<(EventType, EventType), usize> = math::Map::default();

    for &head in graph.trace_heads() {
        let c = count_trace(graph, head);
        for (etype, count) in &c.counts {
            *g_counts.entry(etype.clone()).or_default() += count;
        }
        for (pair, value) in &c.followed_by {
            *g_followed_raw.entry(pair.clone()).or_default() += value;
            // A trace only contributes to the AlwaysFollowedBy tally when
            // every one of its `a`s appeared before the last `b`.
            if *value == c.counts[&pair.0] {
                *g_followed_eq.entry(pair.clone()).or_default() += value;
            }
        }
        for (pair, value) in &c.precedes {
            *g_precedes.entry(pair.clone()).or_default() += value;
        }
    }

    let relation = graph.time_relation().clone();
    let types: Vec<EventType> = graph
        .event_types()
        .into_iter()
        .filter(|t| !t.is_sentinel())
        .collect();

    let mut set = InvariantSet::new();
    for a in &types {
        for b in &types {
            let pair = (a.clone(), b.clone());
            if g_followed_eq.get(&pair).copied().unwrap_or(0) == g_counts[a] {
                set.add(BinaryInvariant::always_followed_by(
                    a.clone(),
                    b.clone(),
                    relation.clone(),
                ));
            }
        }
    }
    for a in &types {
        for b in &types {
            let pair = (a.clone(), b.clone());
            if g_precedes.get(&pair).copied().unwrap_or(0) == g_counts[b] {
                set.add(BinaryInvariant::always_precedes(
                    a.clone(),
                    b.clone(),
                    relation.clone(),
                ));
            }
        }
    }
    for a in &types {
        for b in &types {
            let pair = (a.clone(), b.clone());
            if g_followed_raw.get(&pair).copied().unwrap_or(0) == 0 {
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
        "mined invariants by chain walking"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Relation;
    use crate::invariant::InvariantKind;
    use crate::tests::chain_graph;

    fn afby(a: &str, b: &str) -> BinaryInvariant {
        BinaryInvariant::always_followed_by(
            EventType::label(a),
            EventType::label(b),
            Relation::time(),
        )
    }
    fn ap(a: &str, b: &str) -> BinaryInvariant {
        BinaryInvariant::always_precedes(EventType::label(a), EventType::label(b), Relation::time())
    }
    fn nfby(a: &str, b: &str) -> BinaryInvariant {
        BinaryInvariant::never_followed_by(
            EventType::label(a),
            EventType::label(b),
            Relation::time(),
        )
    }

    #[test]
    fn trivial_afby() {
        let set = mine_invariants(&chain_graph(&["a b", "a c b"])).unwrap();
        assert!(set.contains(&afby("a", "b")));
        assert!(set.contains(&afby("c", "b")));
        assert!(set.contains(&ap("a", "b")));
        assert!(set.contains(&ap("a", "c")));
        assert!(set.contains(&nfby("b", "a")));
        assert!(!set.contains(&afby("a", "c")));
        assert!(!set.contains(&nfby("a", "b")));
    }

    #[test]
    fn singleton_occurrences() {
        let set = mine_invariants(&chain_graph(&["x", "x y", "y x"])).unwrap();
        // every trace has at most one x and one y
        assert!(set.contains(&nfby("x", "x")));
        assert!(set.contains(&nfby("y", "y")));
        assert!(!set.contains(&afby("x", "y")));
        assert!(!set.contains(&ap("y", "x")));
        assert!(!set.contains(&ap("x", "y")));
    }

    #[test]
    fn login_read() {
        let set = mine_invariants(&chain_graph(&["login read", "login read read"])).unwrap();
        assert!(set.contains(&ap("login", "read")));
        assert!(set.contains(&afby("login", "read")));
        assert!(set.contains(&nfby("read", "login")));
        // read recurs in the second trace
        assert!(!set.contains(&nfby("read", "read")));
        assert!(!set.contains(&afby("read", "login")));
    }

    #[test]
    fn repeated_first_needs_every_occurrence_followed() {
        // the trailing a of the second trace is not followed by a b
        let set = mine_invariants(&chain_graph(&["a b", "a b a"])).unwrap();
        assert!(!set.contains(&afby("a", "b")));
        assert!(set.contains(&ap("a", "b")));
    }

    #[test]
    fn sentinels_are_never_part_of_invariants() {
        let set = mine_invariants(&chain_graph(&["a"])).unwrap();
        for invariant in &set {
            assert!(!invariant.first().is_sentinel(), "{invariant}");
            assert!(!invariant.second().is_sentinel(), "{invariant}");
        }
        // a single one-event trace yields exactly the singleton invariant
        assert_eq!(set.len(), 1);
        assert!(set.contains(&nfby("a", "a")));
    }

    #[test]
    fn mining_is_deterministic() {
        let traces = ["a b c", "a c b", "b b a", "c"];
        let one = mine_invariants(&chain_graph(&traces)).unwrap();
        let two = mine_invariants(&chain_graph(&traces)).unwrap();
        assert_eq!(one, two);
        let rendered_one: Vec<String> = one.iter().map(|i| i.to_string()).collect();
        let rendered_two: Vec<String> = two.iter().map(|i| i.to_string()).collect();
        assert_eq!(rendered_one, rendered_two);
    }

    #[test]
    fn kind_counts() {
        let set = mine_invariants(&chain_graph(&["a b", "a b"])).unwrap();
        assert_eq!(
            set.len(),
            set.count_of_kind(InvariantKind::AlwaysFollowedBy)
                + set.count_of_kind(InvariantKind::AlwaysPrecedes)
                + set.count_of_kind(InvariantKind::NeverFollowedBy)
        );
    }
}
