//! The bisimulation engine: counter-example guided refinement of the
//! partition graph until every mined invariant holds, and subsequent
//! coarsening that merges equivalent partitions as long as no invariant
//! breaks. Refinement only ever splits and coarsening reverts every merge
//! that introduces a violation, so both loops preserve the invariant
//! guarantee and terminate.

use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event::Relation;
use crate::fsmcheck::{check, CounterExample};
use crate::invariant::{BinaryInvariant, InvariantSet};
use crate::math;
use crate::partition::{PartitionError, PartitionGraph, PartitionId};
use crate::trace_graph::NodeId;

/// What to do when a counter-example admits no refining split anywhere on
/// its path.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum UnrefinablePolicy {
    /// Warn, remove the invariant from the active set and continue with
    /// the remaining ones.
    #[default]
    Drop,
    /// Abort the refinement with an error.
    Fail,
}

/// Errors the refinement and coarsening loops can surface.
#[derive(Error, Debug)]
pub enum BisimError {
    /// A counter-example admits no refining split and the policy says to
    /// abort.
    #[error("counter-example for '{0}' admits no refining split")]
    Unrefinable(BinaryInvariant),
    /// A structural operation on the partition graph was refused.
    #[error(transparent)]
    Partition(#[from] PartitionError),
}

/// Summary of a refinement run.
#[derive(Debug, Default)]
pub struct Refinement {
    /// How many splits were performed.
    pub splits: usize,
    /// The invariants removed under [`UnrefinablePolicy::Drop`].
    pub dropped: Vec<BinaryInvariant>,
}

/// Splits partitions until the checker finds no violation of any active
/// invariant. Counter-examples are processed in lexicographic order of the
/// invariant rendering, so runs are deterministic.
pub fn refine(
    pg: &mut PartitionGraph<'_>,
    invariants: &InvariantSet,
    policy: UnrefinablePolicy,
) -> Result<Refinement, BisimError> {
    let mut active: Vec<BinaryInvariant> = invariants
        .iter()
        .cloned()
        .sorted_by_key(|inv| inv.to_string())
        .collect();
    let mut outcome = Refinement::default();

    loop {
        let Some(cex) = active.iter().find_map(|inv| check(inv, pg)) else {
            break;
        };
        match splittable_position(pg, &cex) {
            Some((pid, stays, rest)) => {
                debug!(counterexample = %cex, partition = %pid, "refining");
                pg.split(pid, stays, rest)?;
                outcome.splits += 1;
            }
            None => {
                let invariant = cex.invariant().clone();
                match policy {
                    UnrefinablePolicy::Fail => return Err(BisimError::Unrefinable(invariant)),
                    UnrefinablePolicy::Drop => {
                        warn!(invariant = %invariant, "unrefinable counter-example, dropping invariant");
                        active.retain(|inv| inv != &invariant);
                        outcome.dropped.push(invariant);
                    }
                }
            }
        }
    }

    info!(
        splits = outcome.splits,
        dropped = outcome.dropped.len(),
        partitions = pg.size(),
        "refinement complete"
    );
    Ok(outcome)
}

/// Finds the latest partition on the counter-example path whose members
/// disagree on whether their next transition stays on the path, together
/// with the two member sets separating them. `None` when no position
/// admits a split.
fn splittable_position(
    pg: &PartitionGraph<'_>,
    cex: &CounterExample,
) -> Option<(
    PartitionId,
    math::OrderedSet<NodeId>,
    math::OrderedSet<NodeId>,
)> {
    let path = cex.path();
    let relation = cex.invariant().relation();
    for i in (0..path.len().saturating_sub(1)).rev() {
        let (pid, next) = (path[i], path[i + 1]);
        let members = pg.partition(pid).members();
        let stays: math::OrderedSet<NodeId> = members
            .iter()
            .copied()
            .filter(|&node| {
                pg.graph()
                    .node(node)
                    .transitions(relation)
                    .iter()
                    .any(|t| pg.partition_of(t.target()) == next)
            })
            .collect();
        if !stays.is_empty() && stays.len() < members.len() {
            let rest = members.difference(&stays).copied().collect();
            return Some((pid, stays, rest));
        }
    }
    None
}

/// Merges equivalent partitions until no merge survives the invariant
/// re-check. Returns the number of merges performed.
///
/// Two partitions are candidates when they hold the same event type and
/// are equivalent under the coarsest signature refinement: starting from
/// classes given by the event type, two partitions stay equivalent as long
/// as they have, for every relation and every target class, the same
/// number of successor partitions. A merge that breaks some invariant is
/// reverted by splitting the merged partition back apart.
pub fn coarsen(
    pg: &mut PartitionGraph<'_>,
    invariants: &[BinaryInvariant],
) -> Result<usize, BisimError> {
    type PairKey = (math::OrderedSet<NodeId>, math::OrderedSet<NodeId>);
    let mut rejected: math::Set<PairKey> = math::Set::default();
    let mut merges = 0usize;

    'outer: loop {
        let classes = equivalence_classes(pg);
        for class in &classes {
            for (&p, &q) in class.iter().tuple_combinations() {
                let p_members = pg.partition(p).members().clone();
                let q_members = pg.partition(q).members().clone();
                let key = if p_members <= q_members {
                    (p_members.clone(), q_members.clone())
                } else {
                    (q_members.clone(), p_members.clone())
                };
                if rejected.contains(&key) {
                    continue;
                }

                let merged = pg.merge(p, q)?;
                if let Some(cex) = invariants.iter().find_map(|inv| check(inv, pg)) {
                    debug!(counterexample = %cex, "merge violates invariant, reverting");
                    pg.split(merged, p_members, q_members)?;
                    rejected.insert(key);
                } else {
                    merges += 1;
                }
                // equivalence classes are stale either way
                continue 'outer;
            }
        }
        break;
    }

    info!(merges, partitions = pg.size(), "coarsening complete");
    Ok(merges)
}

/// Computes the coarsest successor-count-stable partition refinement of
/// the live partitions, starting from event-type classes. Returns the
/// classes in stable order; classes with fewer than two partitions are of
/// no use to the caller but kept for completeness.
fn equivalence_classes(pg: &PartitionGraph<'_>) -> Vec<Vec<PartitionId>> {
    let mut class_of: math::Map<PartitionId, usize> = {
        let mut types: math::Map<&crate::event::EventType, usize> = math::Map::default();
        pg.partition_ids()
            .map(|pid| {
                let next = types.len();
                let class = *types.entry(pg.partition(pid).etype()).or_insert(next);
                (pid, class)
            })
            .collect()
    };

    loop {
        type Signature = (usize, Vec<(Relation, usize, usize)>);
        let mut renumber: math::Map<Signature, usize> = math::Map::default();
        let mut next_classes: math::Map<PartitionId, usize> = math::Map::default();
        for pid in pg.partition_ids() {
            let mut profile: math::Map<(Relation, usize), usize> = math::Map::default();
            for (target, relation) in pg.partition(pid).edges() {
                *profile
                    .entry((relation.clone(), class_of[target]))
                    .or_default() += 1;
            }
            let profile: Vec<(Relation, usize, usize)> = profile
                .into_iter()
                .map(|((relation, class), count)| (relation, class, count))
                .sorted()
                .collect();
            let signature: Signature = (class_of[&pid], profile);
            let next = renumber.len();
            let class = *renumber.entry(signature).or_insert(next);
            next_classes.insert(pid, class);
        }
        let stable = renumber.len()
            == class_of
                .values()
                .copied()
                .collect::<math::Set<usize>>()
                .len();
        class_of = next_classes;
        if stable {
            break;
        }
    }

    let mut classes: math::Map<usize, Vec<PartitionId>> = math::Map::default();
    for (pid, class) in &class_of {
        classes.entry(*class).or_default().push(*pid);
    }
    classes.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::miner::mine_invariants;
    use crate::tests::chain_graph;

    fn refined(traces: &[&str]) -> (crate::trace_graph::TraceGraph, InvariantSet) {
        let graph = chain_graph(traces);
        let invariants = mine_invariants(&graph).unwrap();
        (graph, invariants)
    }

    #[test]
    fn refinement_splits_the_shared_x() {
        // the single x partition admits the spurious paths "a x d" and
        // "c x b", breaking NFby(a, d) and friends
        let (graph, invariants) = refined(&["a x b", "c x d"]);
        let mut pg = PartitionGraph::initial_from(&graph);
        assert_eq!(pg.partitions_of_type(&EventType::label("x")).len(), 1);
        assert!(invariants.iter().any(|inv| check(inv, &pg).is_some()));

        let outcome = refine(&mut pg, &invariants, UnrefinablePolicy::Drop).unwrap();
        assert!(outcome.dropped.is_empty());
        assert!(outcome.splits >= 1);
        // the two x occurrences end up separated by their continuations
        assert_eq!(pg.partitions_of_type(&EventType::label("x")).len(), 2);
        assert_eq!(pg.check_consistency(), Ok(()));
        for invariant in &invariants {
            assert!(check(invariant, &pg).is_none(), "{invariant} still violated");
        }
    }

    #[test]
    fn coarsening_merges_an_unnecessary_split_back() {
        let (graph, invariants) = refined(&["a b", "a b"]);
        let mut pg = PartitionGraph::initial_from(&graph);
        let b = pg.partitions_of_type(&EventType::label("b"))[0];
        let nodes: Vec<_> = pg.partition(b).members().iter().copied().collect();
        pg.split(
            b,
            [nodes[0]].into_iter().collect(),
            [nodes[1]].into_iter().collect(),
        )
        .unwrap();
        assert_eq!(pg.partitions_of_type(&EventType::label("b")).len(), 2);

        let active: Vec<_> = invariants.iter().cloned().collect();
        let merges = coarsen(&mut pg, &active).unwrap();
        assert_eq!(merges, 1);
        assert_eq!(pg.partitions_of_type(&EventType::label("b")).len(), 1);
        assert_eq!(pg.check_consistency(), Ok(()));
    }

    #[test]
    fn coarsening_rejects_merges_that_break_invariants() {
        let (graph, invariants) = refined(&["a x b", "c x d"]);
        let mut pg = PartitionGraph::initial_from(&graph);
        let active: Vec<_> = invariants.iter().cloned().collect();
        refine(&mut pg, &invariants, UnrefinablePolicy::Drop).unwrap();
        let refined_size = pg.size();

        coarsen(&mut pg, &active).unwrap();
        // no merge survives: the split x partitions differ in their successors
        assert_eq!(pg.size(), refined_size);
        for invariant in &invariants {
            assert!(check(invariant, &pg).is_none(), "{invariant} violated");
        }
    }

    #[test]
    fn refinement_is_a_fixpoint_when_nothing_is_violated() {
        let (graph, invariants) = refined(&["a b", "a b"]);
        let mut pg = PartitionGraph::initial_from(&graph);
        let before = pg.size();
        let outcome = refine(&mut pg, &invariants, UnrefinablePolicy::Drop).unwrap();
        assert_eq!(outcome.splits, 0);
        assert_eq!(pg.size(), before);
    }

    #[test]
    fn coarsening_preserves_all_invariants() {
        let (graph, invariants) = refined(&["a b", "a b", "a c"]);
        let mut pg = PartitionGraph::initial_from(&graph);
        let active: Vec<_> = invariants.iter().cloned().collect();
        refine(&mut pg, &invariants, UnrefinablePolicy::Drop).unwrap();
        coarsen(&mut pg, &active).unwrap();
        assert_eq!(pg.check_consistency(), Ok(()));
        for invariant in &invariants {
            assert!(check(invariant, &pg).is_none(), "{invariant} violated");
        }
        // both b occurrences coalesce into a single partition
        assert_eq!(pg.partitions_of_type(&EventType::label("b")).len(), 1);
    }

    #[test]
    fn equivalence_starts_from_event_types() {
        let graph = chain_graph(&["a b", "c b"]);
        let pg = PartitionGraph::initial_from(&graph);
        let classes = equivalence_classes(&pg);
        // no two partitions of different types share a class
        for class in &classes {
            let types: math::Set<_> = class
                .iter()
                .map(|&pid| pg.partition(pid).etype().clone())
                .collect();
            assert_eq!(types.len(), 1);
        }
    }
}
