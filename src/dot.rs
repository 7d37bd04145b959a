//! Export of inferred models to the dot (graphviz) format. For more
//! information on the format itself, see the
//! [graphviz documentation](https://graphviz.org/doc/info/lang.html).

use std::fmt::Display;

use itertools::Itertools;

use crate::engine::InferredModel;
use crate::partition::PartitionId;

/// Attributes that can be attached to a state in the DOT output.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DotStateAttribute {
    /// The label of a node.
    Label(String),
    /// The shape of a node.
    Shape(DotShape),
    /// The color of a node.
    Color(String),
}

impl Display for DotStateAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DotStateAttribute::Label(s) => write!(f, "label=\"{s}\""),
            DotStateAttribute::Shape(s) => write!(f, "shape=\"{s}\""),
            DotStateAttribute::Color(c) => write!(f, "color=\"{c}\""),
        }
    }
}

/// Node shapes in the DOT format.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DotShape {
    /// No outline.
    Plain,
    /// A house-shaped pentagon.
    House,
    /// An upside down house.
    InvHouse,
    /// A circle.
    Circle,
    /// A rectangle.
    Box,
}

impl Display for DotShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DotShape::Plain => "plain",
            DotShape::House => "house",
            DotShape::InvHouse => "invhouse",
            DotShape::Circle => "circle",
            DotShape::Box => "box",
        })
    }
}

/// Attributes that can be attached to a transition in the DOT output.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DotTransitionAttribute {
    /// The label of the transition.
    Label(String),
}

impl Display for DotTransitionAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DotTransitionAttribute::Label(lbl) => write!(f, "label=\"{lbl}\""),
        }
    }
}

/// Types that can render themselves as a graphviz digraph.
pub trait Dottable {
    /// The handle by which the implementor addresses its states.
    type StateId: Copy;

    /// The name of the produced digraph.
    fn dot_name(&self) -> Option<String> {
        None
    }

    /// Statements emitted right after the digraph header.
    fn dot_header_statements(&self) -> Vec<String> {
        Vec::new()
    }

    /// The states to render, in output order.
    fn dot_state_indices(&self) -> Vec<Self::StateId>;

    /// A unique identifier for the given state.
    fn dot_state_ident(&self, state: Self::StateId) -> String;

    /// The attributes to attach to the given state.
    fn dot_state_attributes(&self, _state: Self::StateId) -> Vec<DotStateAttribute> {
        Vec::new()
    }

    /// The edges to render as `(source, target, attributes)` triples, in
    /// output order.
    fn dot_edges(&self) -> Vec<(Self::StateId, Self::StateId, Vec<DotTransitionAttribute>)>;

    /// Computes the graphviz representation of the implementor.
    fn dot_representation(&self) -> String {
        let header = std::iter::once(format!(
            "digraph \"{}\" {{",
            self.dot_name().unwrap_or("A".to_string())
        ))
        .chain(self.dot_header_statements());

        let states = self.dot_state_indices().into_iter().map(|q| {
            format!(
                "{} [{}]",
                sanitize_dot_ident(&self.dot_state_ident(q)),
                self.dot_state_attributes(q)
                    .into_iter()
                    .map(|attr| attr.to_string())
                    .join(", ")
            )
        });

        let transitions = self.dot_edges().into_iter().map(|(source, target, attrs)| {
            format!(
                "{} -> {} [{}]",
                sanitize_dot_ident(&self.dot_state_ident(source)),
                sanitize_dot_ident(&self.dot_state_ident(target)),
                attrs.into_iter().map(|attr| attr.to_string()).join(", ")
            )
        });

        header
            .chain(states)
            .chain(transitions)
            .chain(std::iter::once("}".to_string()))
            .join("\n")
    }
}

fn sanitize_dot_ident(name: &str) -> String {
    name.chars()
        .filter_map(|chr| match chr {
            c if c.is_alphanumeric() => Some(c),
            '|' | ':' | ',' | '-' | '.' => Some('_'),
            '(' | ')' | '[' | ']' => None,
            w if w.is_whitespace() => None,
            _ => Some('_'),
        })
        .join("")
}

impl Dottable for InferredModel<'_> {
    type StateId = PartitionId;

    fn dot_name(&self) -> Option<String> {
        Some("model".into())
    }

    fn dot_state_indices(&self) -> Vec<PartitionId> {
        self.states().collect()
    }

    fn dot_state_ident(&self, state: PartitionId) -> String {
        format!("{state}")
    }

    fn dot_state_attributes(&self, state: PartitionId) -> Vec<DotStateAttribute> {
        let etype = self.partition_graph().partition(state).etype();
        let shape = if etype.is_initial() {
            DotShape::House
        } else if etype.is_terminal() {
            DotShape::InvHouse
        } else {
            DotShape::Box
        };
        vec![
            DotStateAttribute::Shape(shape),
            DotStateAttribute::Label(etype.to_string()),
        ]
    }

    fn dot_edges(&self) -> Vec<(PartitionId, PartitionId, Vec<DotTransitionAttribute>)> {
        let visible: crate::math::Set<PartitionId> = self.states().collect();
        self.states()
            .flat_map(|p| {
                self.partition_graph()
                    .partition(p)
                    .edges()
                    .filter(|(q, _)| visible.contains(q))
                    .map(move |(q, relation)| {
                        (
                            p,
                            *q,
                            vec![DotTransitionAttribute::Label(relation.to_string())],
                        )
                    })
                    .collect_vec()
            })
            .collect()
    }
}
