//! The finite-state-machine invariant checker. For every invariant kind
//! there is a tracing state set: a small FSM whose substates each carry the
//! shortest [`History`] witnessing how that substate was reached. State
//! sets are pushed along the edges of the partition graph by a worklist
//! until no set grows any further; a populated failure substate then yields
//! the shortest violating partition path.

use std::collections::VecDeque;
use std::fmt;

use itertools::Itertools;
use tracing::trace;

use crate::event::EventType;
use crate::invariant::{BinaryInvariant, InvariantKind};
use crate::math;
use crate::partition::{PartitionGraph, PartitionId};

mod history;
pub use history::History;

/// Witness that a partition graph violates an invariant: the shortest
/// partition path leading into the violation, already shortened to its
/// meaningful prefix.
#[derive(Clone, Debug)]
pub struct CounterExample {
    invariant: BinaryInvariant,
    path: Vec<PartitionId>,
    types: Vec<EventType>,
}

impl CounterExample {
    /// The violated invariant.
    pub fn invariant(&self) -> &BinaryInvariant {
        &self.invariant
    }

    /// The violating partition path, starting at the initial partition.
    pub fn path(&self) -> &[PartitionId] {
        &self.path
    }

    /// The event types along [`Self::path`].
    pub fn types(&self) -> &[EventType] {
        &self.types
    }
}

impl fmt::Display for CounterExample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} violated along [{}]",
            self.invariant,
            self.types.iter().join(" ")
        )
    }
}

/// Substates of the AlwaysFollowedBy FSM: a pending `first` awaiting its
/// `second`, or no pending obligation.
#[derive(Clone, Debug)]
pub struct AFbyStates {
    first: EventType,
    second: EventType,
    awaiting: Option<History>,
    ok: Option<History>,
}

/// Substates of the AlwaysPrecedes FSM: no `first` seen yet, `first` seen,
/// or a `second` observed without any preceding `first`.
#[derive(Clone, Debug)]
pub struct APStates {
    first: EventType,
    second: EventType,
    before_first: Option<History>,
    after_first: Option<History>,
    violated: Option<History>,
}

/// Substates of the NeverFollowedBy FSM: `first` not seen, `first` seen, or
/// a `second` observed after a `first` (the permanent failure state).
#[derive(Clone, Debug)]
pub struct NFbyStates {
    first: EventType,
    second: EventType,
    first_not_seen: Option<History>,
    first_seen: Option<History>,
    second_after: Option<History>,
}

/// A tracing state set for one invariant: the tagged union over the three
/// per-kind FSMs.
#[derive(Clone, Debug)]
pub enum TracingStateSet {
    /// States of an AlwaysFollowedBy invariant.
    AlwaysFollowedBy(AFbyStates),
    /// States of an AlwaysPrecedes invariant.
    AlwaysPrecedes(APStates),
    /// States of a NeverFollowedBy invariant.
    NeverFollowedBy(NFbyStates),
}

impl TracingStateSet {
    /// An empty state set for the given invariant: no substate is
    /// populated until [`Self::start`] runs.
    pub fn new(invariant: &BinaryInvariant) -> Self {
        let (first, second) = (invariant.first().clone(), invariant.second().clone());
        match invariant.kind() {
            InvariantKind::AlwaysFollowedBy => TracingStateSet::AlwaysFollowedBy(AFbyStates {
                first,
                second,
                awaiting: None,
                ok: None,
            }),
            InvariantKind::AlwaysPrecedes => TracingStateSet::AlwaysPrecedes(APStates {
                first,
                second,
                before_first: None,
                after_first: None,
                violated: None,
            }),
            InvariantKind::NeverFollowedBy => TracingStateSet::NeverFollowedBy(NFbyStates {
                first,
                second,
                first_not_seen: None,
                first_seen: None,
                second_after: None,
            }),
        }
    }

    /// Initialises the set at its start partition, placing a fresh root
    /// history into the substate the partition's event type selects.
    pub fn start(&mut self, part: PartitionId, etype: &EventType) {
        let root = Some(History::root(part));
        match self {
            TracingStateSet::AlwaysFollowedBy(s) => {
                if *etype == s.first {
                    s.awaiting = root;
                } else {
                    s.ok = root;
                }
            }
            TracingStateSet::AlwaysPrecedes(s) => {
                if *etype == s.first {
                    s.after_first = root;
                } else if *etype == s.second {
                    s.violated = root;
                } else {
                    s.before_first = root;
                }
            }
            TracingStateSet::NeverFollowedBy(s) => {
                if *etype == s.first {
                    s.first_seen = root;
                } else {
                    s.first_not_seen = root;
                }
            }
        }
    }

    /// Consumes one step into the partition `part` of type `etype`: runs
    /// the per-kind event test and then extends every populated substate's
    /// history by `part`.
    pub fn transition(&mut self, part: PartitionId, etype: &EventType) {
        match self {
            TracingStateSet::AlwaysFollowedBy(s) => {
                if *etype == s.second {
                    s.ok = History::shorter(s.awaiting.take(), s.ok.take());
                } else if *etype == s.first {
                    s.awaiting = History::shorter(s.ok.take(), s.awaiting.take());
                }
                extend(&mut s.awaiting, part);
                extend(&mut s.ok, part);
            }
            TracingStateSet::AlwaysPrecedes(s) => {
                if *etype == s.first {
                    s.after_first = History::shorter(s.before_first.take(), s.after_first.take());
                } else if *etype == s.second {
                    s.violated = History::shorter(s.before_first.take(), s.violated.take());
                }
                extend(&mut s.before_first, part);
                extend(&mut s.after_first, part);
                extend(&mut s.violated, part);
            }
            TracingStateSet::NeverFollowedBy(s) => {
                // no `else` between the two tests: with first == second a
                // single event is simultaneously the offender and a fresh
                // first occurrence
                if *etype == s.second {
                    s.second_after = History::shorter(s.first_seen.take(), s.second_after.take());
                }
                if *etype == s.first {
                    s.first_seen = History::shorter(s.first_not_seen.take(), s.first_seen.take());
                }
                extend(&mut s.first_not_seen, part);
                extend(&mut s.first_seen, part);
                extend(&mut s.second_after, part);
            }
        }
    }

    /// Combines two state sets reaching the same partition, keeping per
    /// substate the shorter history. Both must trace the same invariant
    /// kind.
    pub fn merge_with(&mut self, other: &TracingStateSet) {
        match (self, other) {
            (TracingStateSet::AlwaysFollowedBy(s), TracingStateSet::AlwaysFollowedBy(o)) => {
                s.awaiting = History::shorter(s.awaiting.take(), o.awaiting.clone());
                s.ok = History::shorter(s.ok.take(), o.ok.clone());
            }
            (TracingStateSet::AlwaysPrecedes(s), TracingStateSet::AlwaysPrecedes(o)) => {
                s.before_first = History::shorter(s.before_first.take(), o.before_first.clone());
                s.after_first = History::shorter(s.after_first.take(), o.after_first.clone());
                s.violated = History::shorter(s.violated.take(), o.violated.clone());
            }
            (TracingStateSet::NeverFollowedBy(s), TracingStateSet::NeverFollowedBy(o)) => {
                s.first_not_seen =
                    History::shorter(s.first_not_seen.take(), o.first_not_seen.clone());
                s.first_seen = History::shorter(s.first_seen.take(), o.first_seen.clone());
                s.second_after = History::shorter(s.second_after.take(), o.second_after.clone());
            }
            _ => panic!("cannot merge tracing state sets of different kinds"),
        }
    }

    /// Whether every populated substate of `self` is also populated in
    /// `other`. This is the monotone growth test of the checker's fixed
    /// point; histories are not compared.
    pub fn is_subset(&self, other: &TracingStateSet) -> bool {
        fn covered(mine: &Option<History>, theirs: &Option<History>) -> bool {
            mine.is_none() || theirs.is_some()
        }
        match (self, other) {
            (TracingStateSet::AlwaysFollowedBy(s), TracingStateSet::AlwaysFollowedBy(o)) => {
                covered(&s.awaiting, &o.awaiting) && covered(&s.ok, &o.ok)
            }
            (TracingStateSet::AlwaysPrecedes(s), TracingStateSet::AlwaysPrecedes(o)) => {
                covered(&s.before_first, &o.before_first)
                    && covered(&s.after_first, &o.after_first)
                    && covered(&s.violated, &o.violated)
            }
            (TracingStateSet::NeverFollowedBy(s), TracingStateSet::NeverFollowedBy(o)) => {
                covered(&s.first_not_seen, &o.first_not_seen)
                    && covered(&s.first_seen, &o.first_seen)
                    && covered(&s.second_after, &o.second_after)
            }
            _ => panic!("cannot compare tracing state sets of different kinds"),
        }
    }

    /// The history of the failure substate, if it is populated. For
    /// AlwaysFollowedBy the failure is a pending obligation (meaningful at
    /// TERMINAL only), for AlwaysPrecedes an unpreceded `second` (likewise
    /// judged at TERMINAL), for NeverFollowedBy the permanent failure
    /// state.
    pub fn fail_state(&self) -> Option<&History> {
        match self {
            TracingStateSet::AlwaysFollowedBy(s) => s.awaiting.as_ref(),
            TracingStateSet::AlwaysPrecedes(s) => s.violated.as_ref(),
            TracingStateSet::NeverFollowedBy(s) => s.second_after.as_ref(),
        }
    }
}

fn extend(substate: &mut Option<History>, part: PartitionId) {
    if let Some(history) = substate {
        *history = history.extend(part);
    }
}

/// Decides whether the partition graph violates the given invariant.
/// Returns the shortest violating partition path, or `None` when the
/// invariant holds on every path of the graph.
pub fn check(invariant: &BinaryInvariant, pg: &PartitionGraph<'_>) -> Option<CounterExample> {
    let relation = invariant.relation();
    let initial = pg.initial_partition();

    let mut states: math::Map<PartitionId, TracingStateSet> = math::Map::default();
    let mut start = TracingStateSet::new(invariant);
    start.start(initial, pg.partition(initial).etype());
    states.insert(initial, start);

    let mut queue = VecDeque::from([initial]);
    while let Some(p) = queue.pop_front() {
        let current = states[&p].clone();
        for q in pg.successors(p, relation).collect_vec() {
            let mut successor = current.clone();
            successor.transition(q, pg.partition(q).etype());
            match states.get_mut(&q) {
                Some(accumulated) => {
                    if !successor.is_subset(accumulated) {
                        accumulated.merge_with(&successor);
                        queue.push_back(q);
                    }
                }
                None => {
                    states.insert(q, successor);
                    queue.push_back(q);
                }
            }
        }
    }

    let failure = match invariant.kind() {
        // the failure state is permanent, any partition reaching it
        // witnesses a violation
        InvariantKind::NeverFollowedBy => states
            .values()
            .fold(None, |best, s| History::shorter(best, s.fail_state().cloned())),
        // pending obligations resp. unpreceded seconds only count once the
        // trace has ended
        InvariantKind::AlwaysFollowedBy | InvariantKind::AlwaysPrecedes => states
            .get(&pg.terminal_partition())
            .and_then(|s| s.fail_state())
            .cloned(),
    }?;

    let mut path = failure.to_path();
    let types: Vec<EventType> = path
        .iter()
        .map(|&pid| pg.partition(pid).etype().clone())
        .collect();
    let keep = invariant.shorten_len(&types);
    path.truncate(keep);
    let types = types.into_iter().take(keep).collect_vec();
    trace!(invariant = %invariant, len = path.len(), "found counter-example");
    Some(CounterExample {
        invariant: invariant.clone(),
        path,
        types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Relation;
    use crate::tests::chain_graph;
    use crate::trace_graph::TraceGraph;

    fn t(label: &str) -> EventType {
        EventType::label(label)
    }

    fn initial_pg(graph: &TraceGraph) -> PartitionGraph<'_> {
        PartitionGraph::initial_from(graph)
    }

    #[test]
    fn satisfied_invariant_has_no_counterexample() {
        let g = chain_graph(&["a b", "a b"]);
        let pg = initial_pg(&g);
        let inv = BinaryInvariant::always_followed_by(t("a"), t("b"), Relation::time());
        assert!(check(&inv, &pg).is_none());
    }

    #[test]
    fn afby_fails_when_terminal_reachable_with_pending_first() {
        let g = chain_graph(&["a b", "a"]);
        let pg = initial_pg(&g);
        let inv = BinaryInvariant::always_followed_by(t("a"), t("b"), Relation::time());
        let cex = check(&inv, &pg).expect("the second trace never delivers b");
        // shortest violating path runs straight from a to TERMINAL
        let rendered: Vec<_> = cex.types().iter().map(|t| t.to_string()).collect();
        assert_eq!(rendered, ["INITIAL", "a", "TERMINAL"]);
    }

    #[test]
    fn ap_counterexample_is_shortened_past_the_witness() {
        let g = chain_graph(&["b c", "a b c"]);
        let pg = initial_pg(&g);
        let inv = BinaryInvariant::always_precedes(t("a"), t("b"), Relation::time());
        let cex = check(&inv, &pg).expect("first trace has an unpreceded b");
        let rendered: Vec<_> = cex.types().iter().map(|t| t.to_string()).collect();
        // trailing events past the offending b are trimmed
        assert_eq!(rendered, ["INITIAL", "b"]);
    }

    #[test]
    fn nfby_fails_anywhere_not_only_at_terminal() {
        let g = chain_graph(&["a b c d e"]);
        let pg = initial_pg(&g);
        let inv = BinaryInvariant::never_followed_by(t("a"), t("b"), Relation::time());
        let cex = check(&inv, &pg).expect("b follows a");
        let rendered: Vec<_> = cex.types().iter().map(|t| t.to_string()).collect();
        assert_eq!(rendered, ["INITIAL", "a", "b"]);
    }

    #[test]
    fn quotient_overapproximation_is_caught() {
        // Every a is followed by a d in its own trace, but both b events
        // share one partition, so the quotient admits INITIAL a b TERMINAL.
        let g = chain_graph(&["a b d", "c b"]);
        let pg = initial_pg(&g);
        let inv = BinaryInvariant::always_followed_by(t("a"), t("d"), Relation::time());
        let cex = check(&inv, &pg).expect("quotient admits a path skipping d");
        let rendered: Vec<_> = cex.types().iter().map(|t| t.to_string()).collect();
        assert_eq!(rendered, ["INITIAL", "a", "b", "TERMINAL"]);
    }

    #[test]
    fn reflexive_nfby_detects_repetition() {
        let g = chain_graph(&["x y x"]);
        let pg = initial_pg(&g);
        let inv = BinaryInvariant::never_followed_by(t("x"), t("x"), Relation::time());
        let cex = check(&inv, &pg).expect("x recurs");
        let rendered: Vec<_> = cex.types().iter().map(|t| t.to_string()).collect();
        assert_eq!(rendered, ["INITIAL", "x", "y", "x"]);
    }
}
