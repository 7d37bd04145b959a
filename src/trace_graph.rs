//! Per-trace directed graphs of event occurrences. Each input trace becomes
//! a chain `INITIAL -> e1 -> ... -> en -> TERMINAL` over the time relation,
//! and all traces share one INITIAL and one TERMINAL sentinel node. The
//! graph is immutable once built; nodes are stored in an arena and addressed
//! by [`NodeId`].

use std::fmt;

use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use crate::event::{Event, EventType, Relation};
use crate::math;

/// Index of an [`EventNode`] in the arena of its [`TraceGraph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        NodeId(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A directed edge between two event nodes, labeled with a [`Relation`].
/// Immutable after construction.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Transition {
    source: NodeId,
    target: NodeId,
    relation: Relation,
}

impl Transition {
    /// Creates a transition from `source` to `target` over `relation`.
    pub fn new(source: NodeId, target: NodeId, relation: Relation) -> Self {
        Self {
            source,
            target,
            relation,
        }
    }

    /// The node this transition leaves.
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// The node this transition enters.
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// The relation this transition is labeled with.
    pub fn relation(&self) -> &Relation {
        &self.relation
    }
}

/// A node of a [`TraceGraph`]. Owns one [`Event`] and keeps, per relation,
/// the ordered list of outgoing transitions, plus all incoming transitions
/// for predecessor queries.
#[derive(Clone, Debug)]
pub struct EventNode {
    event: Event,
    outgoing: math::Map<Relation, Vec<Transition>>,
    incoming: Vec<Transition>,
}

impl EventNode {
    fn new(event: Event) -> Self {
        Self {
            event,
            outgoing: math::Map::default(),
            incoming: Vec::new(),
        }
    }

    /// The event this node represents.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// The type of the event this node represents.
    pub fn etype(&self) -> &EventType {
        self.event.etype()
    }

    /// The outgoing transitions over the given relation, in insertion order.
    pub fn transitions(&self, relation: &Relation) -> &[Transition] {
        self.outgoing
            .get(relation)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All outgoing transitions of this node, grouped by relation in
    /// insertion order.
    pub fn all_transitions(&self) -> impl Iterator<Item = &Transition> + '_ {
        self.outgoing.values().flatten()
    }

    /// All incoming transitions of this node.
    pub fn incoming(&self) -> &[Transition] {
        &self.incoming
    }
}

/// Errors arising from structurally invalid trace graphs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceGraphError {
    /// A node of a supposedly totally ordered graph does not have exactly
    /// one outgoing time transition.
    #[error("node {node} ({etype}) has {found} outgoing {relation} transitions, expected exactly one")]
    NotTotallyOrdered {
        /// The offending node.
        node: NodeId,
        /// The type of the offending node's event.
        etype: EventType,
        /// The relation that was inspected.
        relation: Relation,
        /// How many outgoing transitions were found.
        found: usize,
    },
    /// A trace without any events was passed to the builder.
    #[error("trace {0} contains no events")]
    EmptyTrace(usize),
}

/// The union of all input traces: a node arena with shared INITIAL and
/// TERMINAL sentinels, where each trace forms a chain over the time
/// relation. Construct through [`TraceGraph::builder`].
#[derive(Clone, Debug)]
pub struct TraceGraph {
    nodes: Vec<EventNode>,
    time: Relation,
    heads: Vec<NodeId>,
}

const INITIAL_NODE: NodeId = NodeId(0);
const TERMINAL_NODE: NodeId = NodeId(1);

impl TraceGraph {
    /// Gives a builder for assembling a trace graph from event sequences.
    pub fn builder() -> TraceGraphBuilder {
        TraceGraphBuilder::default()
    }

    /// The shared INITIAL sentinel node.
    pub fn initial(&self) -> NodeId {
        INITIAL_NODE
    }

    /// The shared TERMINAL sentinel node.
    pub fn terminal(&self) -> NodeId {
        TERMINAL_NODE
    }

    /// The node stored under the given id.
    pub fn node(&self, id: NodeId) -> &EventNode {
        &self.nodes[id.index()]
    }

    /// The number of nodes, sentinels included.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates over all node ids in arena order. The sentinels come first.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }

    /// The relation that orders the events of each trace.
    pub fn time_relation(&self) -> &Relation {
        &self.time
    }

    /// The number of traces in this graph.
    pub fn trace_count(&self) -> usize {
        self.heads.len()
    }

    /// The first real event node of each trace, in input order.
    pub fn trace_heads(&self) -> &[NodeId] {
        &self.heads
    }

    /// All event types occurring in the graph, sentinels included, in order
    /// of first occurrence.
    pub fn event_types(&self) -> math::Set<EventType> {
        self.nodes.iter().map(|n| n.etype().clone()).collect()
    }

    /// Iterates the real event nodes of one trace in time order, starting
    /// from the given trace head and stopping before TERMINAL.
    pub fn trace_nodes(&self, head: NodeId) -> TraceNodes<'_> {
        TraceNodes {
            graph: self,
            current: Some(head),
        }
    }

    /// Checks that this graph is a valid chain trace graph: every real node
    /// has exactly one outgoing time transition, INITIAL has one per trace
    /// and TERMINAL has none. Returns the offending node otherwise.
    pub fn ensure_totally_ordered(&self) -> Result<(), TraceGraphError> {
        for id in self.node_ids() {
            let node = self.node(id);
            let found = node.transitions(&self.time).len();
            let expected = match node.etype() {
                EventType::Initial => self.trace_count(),
                EventType::Terminal => 0,
                EventType::Label(_) => 1,
            };
            if found != expected {
                return Err(TraceGraphError::NotTotallyOrdered {
                    node: id,
                    etype: node.etype().clone(),
                    relation: self.time.clone(),
                    found,
                });
            }
        }
        Ok(())
    }
}

/// Iterator over the real event nodes of a single trace, see
/// [`TraceGraph::trace_nodes`].
#[derive(Clone)]
pub struct TraceNodes<'a> {
    graph: &'a TraceGraph,
    current: Option<NodeId>,
}

impl Iterator for TraceNodes<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        if self.graph.node(id).etype().is_terminal() {
            return None;
        }
        self.current = self
            .graph
            .node(id)
            .transitions(&self.graph.time)
            .first()
            .map(Transition::target);
        Some(id)
    }
}

/// Assembles a [`TraceGraph`] trace by trace. Labels are interned so that
/// repeated event types share their storage.
pub struct TraceGraphBuilder {
    time: Relation,
    interned: math::Map<String, EventType>,
    traces: Vec<Vec<Event>>,
}

impl Default for TraceGraphBuilder {
    fn default() -> Self {
        Self {
            time: Relation::time(),
            interned: math::Map::default(),
            traces: Vec::new(),
        }
    }
}

impl TraceGraphBuilder {
    /// Overrides the time relation label, which defaults to `"t"`.
    pub fn time_relation(mut self, relation: Relation) -> Self {
        self.time = relation;
        self
    }

    /// Adds one trace given as a sequence of events.
    pub fn trace<I: IntoIterator<Item = Event>>(mut self, events: I) -> Self {
        self.traces.push(events.into_iter().collect());
        self
    }

    /// Adds one trace given as a whitespace-separated sequence of event
    /// labels, e.g. `"login read read"`.
    pub fn words_trace(mut self, line: &str) -> Self {
        let trace = line
            .split_whitespace()
            .map(|word| {
                let etype = self
                    .interned
                    .entry(word.to_string())
                    .or_insert_with(|| EventType::label(word))
                    .clone();
                Event::new(etype)
            })
            .collect_vec();
        self.traces.push(trace);
        self
    }

    /// Builds the trace graph, linking each trace into a chain between the
    /// shared sentinels. Fails on traces without events.
    pub fn build(self) -> Result<TraceGraph, TraceGraphError> {
        let mut nodes = vec![
            EventNode::new(Event::new(EventType::Initial)),
            EventNode::new(Event::new(EventType::Terminal)),
        ];
        let mut heads = Vec::with_capacity(self.traces.len());

        for (trace_index, trace) in self.traces.into_iter().enumerate() {
            if trace.is_empty() {
                return Err(TraceGraphError::EmptyTrace(trace_index));
            }
            let ids = trace
                .into_iter()
                .map(|event| {
                    nodes.push(EventNode::new(event));
                    NodeId::new(nodes.len() - 1)
                })
                .collect_vec();
            heads.push(ids[0]);

            let hops = std::iter::once(INITIAL_NODE)
                .chain(ids.iter().copied())
                .chain(std::iter::once(TERMINAL_NODE))
                .collect_vec();
            for (source, target) in hops.into_iter().tuple_windows() {
                let transition = Transition::new(source, target, self.time.clone());
                nodes[source.index()]
                    .outgoing
                    .entry(self.time.clone())
                    .or_default()
                    .push(transition.clone());
                nodes[target.index()].incoming.push(transition);
            }
        }

        debug!(
            traces = heads.len(),
            nodes = nodes.len(),
            "assembled chain trace graph"
        );
        Ok(TraceGraph {
            nodes,
            time: self.time,
            heads,
        })
    }
}
