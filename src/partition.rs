//! The partition graph: a quotient of the trace graph whose nodes are
//! partitions (sets of event nodes sharing an event type) and whose edges
//! are derived from the member nodes' transitions. This is the engine's
//! mutable working model; refinement splits partitions and coarsening
//! merges them, with the node-to-partition index and the cached partition
//! edges kept in sync through every structural change.
//!
//! Partitions live in an arena addressed by [`PartitionId`]; split and
//! merge retire their inputs and allocate fresh ids, so a held id is only
//! valid until the next structural change that touches it.

use std::fmt;

use itertools::Itertools;
use thiserror::Error;
use tracing::trace;

use crate::event::{EventType, Relation};
use crate::math;
use crate::trace_graph::{NodeId, TraceGraph};

/// Index of a [`Partition`] in the arena of its [`PartitionGraph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(u32);

impl PartitionId {
    pub(crate) fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        PartitionId(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Debug for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A non-empty set of event nodes sharing one event type, acting as a
/// single state of the quotient graph. Carries a cached set of outgoing
/// `(target partition, relation)` edges derived from the members'
/// transitions.
#[derive(Clone, Debug)]
pub struct Partition {
    etype: EventType,
    members: math::OrderedSet<NodeId>,
    edges: math::Set<(PartitionId, Relation)>,
}

impl Partition {
    fn new(etype: EventType) -> Self {
        Self {
            etype,
            members: math::OrderedSet::default(),
            edges: math::Set::default(),
        }
    }

    /// The event type shared by all member nodes.
    pub fn etype(&self) -> &EventType {
        &self.etype
    }

    /// The member nodes, iterating in node order.
    pub fn members(&self) -> &math::OrderedSet<NodeId> {
        &self.members
    }

    /// The number of member nodes.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// The cached outgoing edges as `(target, relation)` pairs, one per
    /// distinct pair, in derivation order.
    pub fn edges(&self) -> impl Iterator<Item = &(PartitionId, Relation)> + '_ {
        self.edges.iter()
    }
}

enum Slot {
    Live(Partition),
    Retired,
}

/// Errors from structural operations on the partition graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// The two node sets passed to a split do not partition the source.
    #[error("split of {partition} refused: the given parts do not partition its members")]
    BadSplit {
        /// The partition the split was attempted on.
        partition: PartitionId,
    },
    /// Merging a partition with itself was attempted.
    #[error("cannot merge {partition} with itself")]
    SelfMerge {
        /// The partition passed as both inputs.
        partition: PartitionId,
    },
    /// Merging was attempted across different event types.
    #[error("cannot merge {left} ({left_type}) with {right} ({right_type}): event types differ")]
    TypeMismatch {
        /// One input of the merge.
        left: PartitionId,
        /// Its event type.
        left_type: EventType,
        /// The other input.
        right: PartitionId,
        /// Its event type.
        right_type: EventType,
    },
    /// A consistency check over the whole graph failed.
    #[error("partition graph inconsistent: {0}")]
    Inconsistent(String),
}

/// The quotient graph over a [`TraceGraph`]. Maintains the partition arena,
/// the node-to-partition index, the insertion-ordered partition listing per
/// event type and the two distinguished sentinel partitions.
pub struct PartitionGraph<'a> {
    graph: &'a TraceGraph,
    parts: Vec<Slot>,
    node_part: Vec<PartitionId>,
    order: Vec<PartitionId>,
    by_type: math::Map<EventType, Vec<PartitionId>>,
    initial: PartitionId,
    terminal: PartitionId,
}

impl<'a> PartitionGraph<'a> {
    /// Builds the maximally coarse partition graph: one partition per event
    /// type, each containing every node of that type. The sentinels end up
    /// in singleton partitions of their own.
    pub fn initial_from(graph: &'a TraceGraph) -> Self {
        let mut parts: Vec<Slot> = Vec::new();
        let mut order: Vec<PartitionId> = Vec::new();
        let mut by_type: math::Map<EventType, Vec<PartitionId>> = math::Map::default();
        let mut of_type: math::Map<EventType, PartitionId> = math::Map::default();
        let mut node_part: Vec<PartitionId> = Vec::with_capacity(graph.size());

        for id in graph.node_ids() {
            let etype = graph.node(id).etype().clone();
            let pid = *of_type.entry(etype.clone()).or_insert_with(|| {
                let pid = PartitionId::new(parts.len());
                parts.push(Slot::Live(Partition::new(etype.clone())));
                order.push(pid);
                by_type.entry(etype.clone()).or_default().push(pid);
                pid
            });
            match &mut parts[pid.index()] {
                Slot::Live(partition) => partition.members.insert(id),
                Slot::Retired => unreachable!("fresh partitions are live"),
            };
            node_part.push(pid);
        }

        let initial = node_part[graph.initial().index()];
        let terminal = node_part[graph.terminal().index()];
        let mut pg = Self {
            graph,
            parts,
            node_part,
            order,
            by_type,
            initial,
            terminal,
        };
        for pid in pg.order.clone() {
            pg.recompute_edges(pid);
        }
        pg
    }

    /// The underlying trace graph.
    pub fn graph(&self) -> &'a TraceGraph {
        self.graph
    }

    /// The partition stored under the given id. Panics when the id has been
    /// retired by an earlier split or merge.
    pub fn partition(&self, id: PartitionId) -> &Partition {
        match &self.parts[id.index()] {
            Slot::Live(partition) => partition,
            Slot::Retired => panic!("partition {id} has been retired"),
        }
    }

    fn partition_mut(&mut self, id: PartitionId) -> &mut Partition {
        match &mut self.parts[id.index()] {
            Slot::Live(partition) => partition,
            Slot::Retired => panic!("partition {id} has been retired"),
        }
    }

    /// The number of live partitions.
    pub fn size(&self) -> usize {
        self.order.len()
    }

    /// Iterates the live partition ids in stable order.
    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.order.iter().copied()
    }

    /// The live partitions holding nodes of the given event type.
    pub fn partitions_of_type(&self, etype: &EventType) -> &[PartitionId] {
        self.by_type
            .get(etype)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The partition containing the INITIAL sentinel.
    pub fn initial_partition(&self) -> PartitionId {
        self.initial
    }

    /// The partition containing the TERMINAL sentinel.
    pub fn terminal_partition(&self) -> PartitionId {
        self.terminal
    }

    /// The partition the given node currently belongs to.
    pub fn partition_of(&self, node: NodeId) -> PartitionId {
        self.node_part[node.index()]
    }

    /// The target partitions reachable from `p` over the given relation, in
    /// cached-edge order.
    pub fn successors<'r>(
        &'r self,
        p: PartitionId,
        relation: &'r Relation,
    ) -> impl Iterator<Item = PartitionId> + 'r {
        self.partition(p)
            .edges
            .iter()
            .filter(move |(_, r)| r == relation)
            .map(|(q, _)| *q)
    }

    /// The partitions with an edge into `p` over the given relation.
    pub fn predecessors(&self, p: PartitionId, relation: &Relation) -> math::Set<PartitionId> {
        self.partition(p)
            .members
            .iter()
            .flat_map(|&node| self.graph.node(node).incoming())
            .filter(|t| t.relation() == relation)
            .map(|t| self.partition_of(t.source()))
            .collect()
    }

    /// Rederives the cached outgoing edges of `p` from its members'
    /// transitions.
    pub fn recompute_edges(&mut self, p: PartitionId) {
        let edges: math::Set<(PartitionId, Relation)> = self
            .partition(p)
            .members
            .iter()
            .flat_map(|&node| self.graph.node(node).all_transitions())
            .map(|t| (self.partition_of(t.target()), t.relation().clone()))
            .collect();
        self.partition_mut(p).edges = edges;
    }

    /// The partitions holding a predecessor node of any of the given nodes;
    /// these are exactly the partitions whose cached edges an ownership
    /// change of `nodes` invalidates.
    fn partitions_pointing_at(&self, nodes: &math::OrderedSet<NodeId>) -> math::Set<PartitionId> {
        nodes
            .iter()
            .flat_map(|&node| self.graph.node(node).incoming())
            .map(|t| self.partition_of(t.source()))
            .collect()
    }

    fn allocate(&mut self, etype: EventType, members: math::OrderedSet<NodeId>) -> PartitionId {
        let pid = PartitionId::new(self.parts.len());
        let mut partition = Partition::new(etype);
        partition.members = members;
        for &node in &partition.members {
            self.node_part[node.index()] = pid;
        }
        self.parts.push(Slot::Live(partition));
        pid
    }

    fn retire(&mut self, id: PartitionId) {
        self.parts[id.index()] = Slot::Retired;
    }

    /// Replaces partition `p` by two partitions with member sets exactly
    /// `left` and `right`. Both must be non-empty, disjoint, and union to
    /// `p`'s members; otherwise the split is refused and nothing changes.
    pub fn split(
        &mut self,
        p: PartitionId,
        left: math::OrderedSet<NodeId>,
        right: math::OrderedSet<NodeId>,
    ) -> Result<(PartitionId, PartitionId), PartitionError> {
        let source = self.partition(p);
        let valid = !left.is_empty()
            && !right.is_empty()
            && left.is_disjoint(&right)
            && left.union(&right).copied().collect::<math::OrderedSet<_>>() == source.members;
        if !valid {
            return Err(PartitionError::BadSplit { partition: p });
        }
        let etype = source.etype.clone();
        trace!(
            partition = %p,
            left = left.len(),
            right = right.len(),
            "splitting partition"
        );

        let touched = self.partitions_pointing_at(&self.partition(p).members.clone());
        let l = self.allocate(etype.clone(), left);
        let r = self.allocate(etype.clone(), right);
        self.retire(p);
        self.replace_in_listing(p, &[l, r], &etype);
        if self.initial == p {
            self.initial = self.partition_of(self.graph.initial());
        }
        if self.terminal == p {
            self.terminal = self.partition_of(self.graph.terminal());
        }

        self.recompute_edges(l);
        self.recompute_edges(r);
        for q in touched {
            if q != p && self.is_live(q) {
                self.recompute_edges(q);
            }
        }
        Ok((l, r))
    }

    /// Replaces partitions `p` and `q` by their union. The two must be
    /// distinct and hold the same event type; otherwise the merge is
    /// refused and nothing changes.
    pub fn merge(&mut self, p: PartitionId, q: PartitionId) -> Result<PartitionId, PartitionError> {
        if p == q {
            return Err(PartitionError::SelfMerge { partition: p });
        }
        let (pt, qt) = (self.partition(p).etype.clone(), self.partition(q).etype.clone());
        if pt != qt {
            return Err(PartitionError::TypeMismatch {
                left: p,
                left_type: pt,
                right: q,
                right_type: qt,
            });
        }
        trace!(left = %p, right = %q, "merging partitions");

        let mut members = self.partition(p).members.clone();
        members.extend(self.partition(q).members.iter().copied());
        let touched = self.partitions_pointing_at(&members);
        let merged = self.allocate(pt.clone(), members);
        self.retire(p);
        self.retire(q);
        self.remove_from_listing(q, &qt);
        self.replace_in_listing(p, &[merged], &pt);
        if self.initial == p || self.initial == q {
            self.initial = merged;
        }
        if self.terminal == p || self.terminal == q {
            self.terminal = merged;
        }

        self.recompute_edges(merged);
        for touched_pid in touched {
            if touched_pid != p && touched_pid != q && self.is_live(touched_pid) {
                self.recompute_edges(touched_pid);
            }
        }
        Ok(merged)
    }

    fn is_live(&self, id: PartitionId) -> bool {
        matches!(self.parts[id.index()], Slot::Live(_))
    }

    fn replace_in_listing(&mut self, old: PartitionId, new: &[PartitionId], etype: &EventType) {
        let position = self
            .order
            .iter()
            .position(|&pid| pid == old)
            .expect("replaced partition is listed");
        self.order.splice(position..=position, new.iter().copied());
        let listing = self
            .by_type
            .get_mut(etype)
            .expect("replaced partition's type is listed");
        let position = listing
            .iter()
            .position(|&pid| pid == old)
            .expect("replaced partition is listed under its type");
        listing.splice(position..=position, new.iter().copied());
    }

    fn remove_from_listing(&mut self, old: PartitionId, etype: &EventType) {
        self.order.retain(|&pid| pid != old);
        if let Some(listing) = self.by_type.get_mut(etype) {
            listing.retain(|&pid| pid != old);
        }
    }

    /// Verifies the structural invariants of the quotient: every node is in
    /// exactly one live partition, all members of a partition share its
    /// event type, and every cached edge set matches a fresh derivation
    /// from the members' transitions.
    pub fn check_consistency(&self) -> Result<(), PartitionError> {
        let mut seen = 0usize;
        for pid in self.partition_ids() {
            let partition = self.partition(pid);
            if partition.members.is_empty() {
                return Err(PartitionError::Inconsistent(format!("{pid} is empty")));
            }
            seen += partition.members.len();
            for &node in &partition.members {
                if self.graph.node(node).etype() != &partition.etype {
                    return Err(PartitionError::Inconsistent(format!(
                        "{pid} ({}) holds node {node} of type {}",
                        partition.etype,
                        self.graph.node(node).etype()
                    )));
                }
                if self.partition_of(node) != pid {
                    return Err(PartitionError::Inconsistent(format!(
                        "node {node} is listed in {pid} but indexed under {}",
                        self.partition_of(node)
                    )));
                }
            }
            let derived: math::Set<(PartitionId, Relation)> = partition
                .members
                .iter()
                .flat_map(|&node| self.graph.node(node).all_transitions())
                .map(|t| (self.partition_of(t.target()), t.relation().clone()))
                .collect();
            if derived != partition.edges {
                return Err(PartitionError::Inconsistent(format!(
                    "cached edges of {pid} are stale"
                )));
            }
        }
        if seen != self.graph.size() {
            return Err(PartitionError::Inconsistent(format!(
                "{seen} member slots for {} nodes",
                self.graph.size()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for PartitionGraph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PartitionGraph({})",
            self.partition_ids()
                .map(|pid| {
                    let partition = self.partition(pid);
                    format!("{pid}:{}[{}]", partition.etype(), partition.size())
                })
                .join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::chain_graph;

    fn members_of(pg: &PartitionGraph<'_>, pid: PartitionId) -> Vec<NodeId> {
        pg.partition(pid).members().iter().copied().collect()
    }

    #[test]
    fn initial_partitioning_is_by_type() {
        let g = chain_graph(&["a b", "a c b"]);
        let pg = PartitionGraph::initial_from(&g);
        // INITIAL, TERMINAL, a, b, c
        assert_eq!(pg.size(), 5);
        assert_eq!(pg.check_consistency(), Ok(()));
        let a = pg.partitions_of_type(&EventType::label("a"));
        assert_eq!(a.len(), 1);
        assert_eq!(pg.partition(a[0]).size(), 2);
        assert_eq!(pg.partition(pg.initial_partition()).size(), 1);
        assert_eq!(pg.partition(pg.terminal_partition()).size(), 1);
    }

    #[test]
    fn successors_are_derived_from_members() {
        let g = chain_graph(&["a b", "a c b"]);
        let pg = PartitionGraph::initial_from(&g);
        let time = g.time_relation().clone();
        let a = pg.partitions_of_type(&EventType::label("a"))[0];
        let succ: Vec<_> = pg
            .successors(a, &time)
            .map(|q| pg.partition(q).etype().to_string())
            .collect();
        assert_eq!(succ, ["b", "c"]);
        let b = pg.partitions_of_type(&EventType::label("b"))[0];
        let preds = pg.predecessors(b, &time);
        assert_eq!(preds.len(), 2);
    }

    #[test]
    fn split_and_remerge_roundtrip() {
        let g = chain_graph(&["a b c", "a b d"]);
        let mut pg = PartitionGraph::initial_from(&g);
        let b = pg.partitions_of_type(&EventType::label("b"))[0];
        let nodes = members_of(&pg, b);
        assert_eq!(nodes.len(), 2);

        let left: math::OrderedSet<_> = [nodes[0]].into_iter().collect();
        let right: math::OrderedSet<_> = [nodes[1]].into_iter().collect();
        let (l, r) = pg.split(b, left, right).unwrap();
        assert_eq!(pg.size(), 7);
        assert_eq!(pg.check_consistency(), Ok(()));
        assert_eq!(pg.partitions_of_type(&EventType::label("b")), &[l, r]);

        let merged = pg.merge(l, r).unwrap();
        assert_eq!(pg.size(), 6);
        assert_eq!(pg.check_consistency(), Ok(()));
        assert_eq!(members_of(&pg, merged), nodes);
    }

    #[test]
    fn bad_split_is_refused() {
        let g = chain_graph(&["a b", "a b"]);
        let mut pg = PartitionGraph::initial_from(&g);
        let a = pg.partitions_of_type(&EventType::label("a"))[0];
        let nodes = members_of(&pg, a);

        // overlapping parts
        let left: math::OrderedSet<_> = nodes.iter().copied().collect();
        let right: math::OrderedSet<_> = [nodes[0]].into_iter().collect();
        assert_eq!(
            pg.split(a, left, right),
            Err(PartitionError::BadSplit { partition: a })
        );
        // nothing changed
        assert_eq!(pg.check_consistency(), Ok(()));
        assert_eq!(members_of(&pg, a), nodes);
    }

    #[test]
    fn merge_requires_matching_types() {
        let g = chain_graph(&["a b"]);
        let mut pg = PartitionGraph::initial_from(&g);
        let a = pg.partitions_of_type(&EventType::label("a"))[0];
        let b = pg.partitions_of_type(&EventType::label("b"))[0];
        assert!(matches!(
            pg.merge(a, b),
            Err(PartitionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn merge_requires_distinct_partitions() {
        let g = chain_graph(&["a b", "a b"]);
        let mut pg = PartitionGraph::initial_from(&g);
        let a = pg.partitions_of_type(&EventType::label("a"))[0];
        assert_eq!(
            pg.merge(a, a),
            Err(PartitionError::SelfMerge { partition: a })
        );
        // nothing changed
        assert_eq!(pg.check_consistency(), Ok(()));
        assert_eq!(pg.partitions_of_type(&EventType::label("a")), &[a]);
    }

    #[test]
    fn split_updates_predecessor_edges() {
        let g = chain_graph(&["a b c", "a b d"]);
        let mut pg = PartitionGraph::initial_from(&g);
        let time = g.time_relation().clone();
        let b = pg.partitions_of_type(&EventType::label("b"))[0];
        let nodes = members_of(&pg, b);
        let (l, r) = pg
            .split(
                b,
                [nodes[0]].into_iter().collect(),
                [nodes[1]].into_iter().collect(),
            )
            .unwrap();

        let a = pg.partitions_of_type(&EventType::label("a"))[0];
        let succ: Vec<_> = pg.successors(a, &time).collect();
        assert!(succ.contains(&l) && succ.contains(&r), "{succ:?}");
    }
}
