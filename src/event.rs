//! The event model. An [`EventType`] identifies a kind of event, an
//! [`Event`] is one occurrence of such a kind inside a trace, and a
//! [`Relation`] labels the edges connecting occurrences. Event types and
//! relations are value objects with structural equality; label storage is
//! shared so that cloning them is cheap.

use std::fmt;
use std::sync::Arc;

/// Identifies a kind of event. Either one of the two synthetic sentinel
/// kinds that frame every trace, or a domain event tagged by a string label.
/// Two event types are equal iff their kind and label agree.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// The synthetic source sentinel shared by all traces.
    Initial,
    /// The synthetic sink sentinel shared by all traces.
    Terminal,
    /// A domain event tagged by its label.
    Label(Arc<str>),
}

impl EventType {
    /// Creates a domain event type with the given label.
    pub fn label(name: impl AsRef<str>) -> Self {
        EventType::Label(Arc::from(name.as_ref()))
    }

    /// True iff this is the INITIAL or TERMINAL sentinel.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, EventType::Initial | EventType::Terminal)
    }

    /// True iff this is the INITIAL sentinel.
    pub fn is_initial(&self) -> bool {
        matches!(self, EventType::Initial)
    }

    /// True iff this is the TERMINAL sentinel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Terminal)
    }

    /// The textual rendering of this event type.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Initial => "INITIAL",
            EventType::Terminal => "TERMINAL",
            EventType::Label(label) => label,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque per-event metadata carried along from the input, not interpreted
/// by the engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct SourceInfo {
    /// The line of the input the event was parsed from, if known.
    pub line: Option<u32>,
    /// A timestamp associated with the event, if the input carries one.
    pub timestamp: Option<i64>,
}

/// A single occurrence of an [`EventType`] inside a trace. Identity is
/// positional; the engine never compares events, only their types.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Event {
    etype: EventType,
    source: SourceInfo,
}

impl Event {
    /// Creates an event of the given type without source metadata.
    pub fn new(etype: EventType) -> Self {
        Self {
            etype,
            source: SourceInfo::default(),
        }
    }

    /// Creates an event of the given type carrying the given metadata.
    pub fn with_source(etype: EventType, source: SourceInfo) -> Self {
        Self { etype, source }
    }

    /// The type of this event.
    pub fn etype(&self) -> &EventType {
        &self.etype
    }

    /// The metadata attached to this event.
    pub fn source(&self) -> &SourceInfo {
        &self.source
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.etype)
    }
}

/// A relation label on transitions. The distinguished *time* relation
/// orders the events of a totally ordered trace; auxiliary relations may
/// represent additional orderings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Relation(Arc<str>);

/// The label of the default time relation.
pub const TIME_RELATION: &str = "t";

impl Relation {
    /// The distinguished time relation, labeled `"t"`.
    pub fn time() -> Self {
        Relation(Arc::from(TIME_RELATION))
    }

    /// Creates a relation with the given label.
    pub fn new(label: impl AsRef<str>) -> Self {
        Relation(Arc::from(label.as_ref()))
    }

    /// The textual label of this relation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Relation {
    fn default() -> Self {
        Relation::time()
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.0)
    }
}
