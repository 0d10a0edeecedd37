//! Identifiers for facts and partial matches.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier of a fact in working memory.
///
/// Ids are allocated monotonically per session and never reused, so a fact
/// that is retracted and inserted again gets a fresh id.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FactId(pub u64);

impl FactId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactId({})", self.0)
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Identifier of a tuple (partial match) flowing through the beta network.
///
/// A tuple keeps its id across in-place updates. A new id means a new
/// match identity as far as the agenda is concerned.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TupleId(pub u64);

impl TupleId {
    /// The single root tuple every beta branch starts from.
    pub const ROOT: Self = Self(0);

    /// Returns true if this is the root tuple.
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TupleId({})", self.0)
    }
}

impl fmt::Display for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_tuple() {
        assert!(TupleId::ROOT.is_root());
        assert!(!TupleId(3).is_root());
    }

    #[test]
    fn ids_order_by_index() {
        assert!(FactId(1) < FactId(2));
        assert_eq!(format!("{}", FactId(7)), "f7");
        assert_eq!(format!("{:?}", TupleId(4)), "TupleId(4)");
    }
}
