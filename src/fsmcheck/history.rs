//! Persistent singly-linked chains recording the shortest path by which a
//! tracing substate was reached. Chains are shared between states by
//! reference and never mutated; extending allocates one new link.

use std::rc::Rc;

use crate::partition::PartitionId;

#[derive(Debug)]
struct Link {
    part: PartitionId,
    len: usize,
    prev: Option<Rc<Link>>,
}

/// A non-empty path of partitions, stored back to front with structural
/// sharing. The length is cached on every link.
#[derive(Clone, Debug)]
pub struct History {
    head: Rc<Link>,
}

impl History {
    /// A one-element history starting at the given partition.
    pub fn root(part: PartitionId) -> Self {
        Self {
            head: Rc::new(Link {
                part,
                len: 1,
                prev: None,
            }),
        }
    }

    /// A new history extending `self` by one partition. `self` is shared,
    /// not copied.
    pub fn extend(&self, part: PartitionId) -> Self {
        Self {
            head: Rc::new(Link {
                part,
                len: self.head.len + 1,
                prev: Some(self.head.clone()),
            }),
        }
    }

    /// The number of partitions on this history.
    pub fn len(&self) -> usize {
        self.head.len
    }

    /// The most recently appended partition.
    pub fn last(&self) -> PartitionId {
        self.head.part
    }

    /// The recorded path in walk order, from the start partition to the
    /// most recent one.
    pub fn to_path(&self) -> Vec<PartitionId> {
        let mut path = Vec::with_capacity(self.head.len);
        let mut link = Some(&self.head);
        while let Some(current) = link {
            path.push(current.part);
            link = current.prev.as_ref();
        }
        path.reverse();
        path
    }

    /// Of two optional histories, yields the one that exists, or the
    /// shorter one when both do. Ties are broken towards the
    /// lexicographically smaller partition sequence, so the outcome never
    /// depends on evaluation order.
    pub fn shorter(a: Option<History>, b: Option<History>) -> Option<History> {
        match (a, b) {
            (None, b) => b,
            (a, None) => a,
            (Some(a), Some(b)) => {
                if a.len() < b.len() {
                    Some(a)
                } else if b.len() < a.len() {
                    Some(b)
                } else if a.to_path() <= b.to_path() {
                    Some(a)
                } else {
                    Some(b)
                }
            }
        }
    }
}

impl PartialEq for History {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.to_path() == other.to_path()
    }
}

impl Eq for History {}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(i: usize) -> PartitionId {
        PartitionId::new(i)
    }

    #[test]
    fn extension_preserves_the_shared_prefix() {
        let root = History::root(p(0));
        let left = root.extend(p(1)).extend(p(2));
        let right = root.extend(p(3));
        assert_eq!(left.to_path(), [p(0), p(1), p(2)]);
        assert_eq!(right.to_path(), [p(0), p(3)]);
        assert_eq!(left.len(), 3);
        assert_eq!(right.len(), 2);
        assert_eq!(left.last(), p(2));
    }

    #[test]
    fn shorter_prefers_existing_then_shorter() {
        let long = History::root(p(0)).extend(p(1)).extend(p(2));
        let short = History::root(p(0)).extend(p(1));
        assert_eq!(History::shorter(None, Some(short.clone())), Some(short.clone()));
        assert_eq!(History::shorter(Some(short.clone()), None), Some(short.clone()));
        assert_eq!(
            History::shorter(Some(long), Some(short.clone())),
            Some(short)
        );
    }

    #[test]
    fn shorter_ties_break_lexicographically() {
        let one = History::root(p(0)).extend(p(1));
        let two = History::root(p(0)).extend(p(2));
        assert_eq!(
            History::shorter(Some(two.clone()), Some(one.clone())),
            Some(one.clone())
        );
        assert_eq!(History::shorter(Some(one.clone()), Some(two)), Some(one));
    }
}
