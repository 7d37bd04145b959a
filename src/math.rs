//! Container aliases used throughout the crate. The point of this module is
//! to hide which concrete implementations are used. Everything whose
//! iteration order is observable in the output goes through these aliases,
//! which all guarantee a deterministic order.

pub use indexmap::map;
pub use indexmap::set;
pub use std::collections::btree_map as ordered_map;
pub use std::collections::btree_set as ordered_set;

/// Type alias for sets that preserve insertion order.
pub type Set<S> = indexmap::IndexSet<S>;
/// Type alias for maps that preserve insertion order.
pub type Map<K, V> = indexmap::IndexMap<K, V>;

/// Type alias for sets that iterate in the order of their elements.
pub type OrderedSet<S> = std::collections::BTreeSet<S>;
/// Type alias for maps that iterate in the order of their keys.
pub type OrderedMap<K, V> = std::collections::BTreeMap<K, V>;
