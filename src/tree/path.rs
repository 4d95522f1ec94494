//! Materialized paths.
//!
//! A node's position is stored as the ordered list of its ancestors' ids
//! followed by its own id. Ancestor and descendant tests are prefix
//! comparisons over that list and never walk parent pointers.
//!
//! In the metadata store the list is encoded as dot-separated text
//! (`"1.4.9"`). Descendants of `"1.4"` are exactly the rows whose path lies in
//! the half-open range `["1.4.", "1.4/")`, which the `idx_nodes_path` index
//! answers without a table scan (`'/'` is the byte after `'.'`).

use std::fmt;
use std::str::FromStr;

use crate::{ArborError, Result};

/// Separator between ids in the encoded form.
pub const PATH_SEPARATOR: char = '.';

/// Self-inclusive ordered list of ancestor ids. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaterializedPath(Vec<i64>);

impl MaterializedPath {
    /// Path of a root node: just its own id.
    pub fn root(id: i64) -> Self {
        Self(vec![id])
    }

    /// Build a path from an id list.
    pub fn from_ids(ids: Vec<i64>) -> Result<Self> {
        if ids.is_empty() {
            return Err(ArborError::Internal("empty materialized path".to_string()));
        }
        Ok(Self(ids))
    }

    /// Path of a new child of this node.
    pub fn child(&self, id: i64) -> Self {
        let mut ids = Vec::with_capacity(self.0.len() + 1);
        ids.extend_from_slice(&self.0);
        ids.push(id);
        Self(ids)
    }

    /// The ids in root-to-node order.
    pub fn ids(&self) -> &[i64] {
        &self.0
    }

    /// The node this path belongs to.
    pub fn node_id(&self) -> i64 {
        self.0[self.0.len() - 1]
    }

    /// The root of the hierarchy this path lives in.
    pub fn root_id(&self) -> i64 {
        self.0[0]
    }

    /// Path of the parent, or `None` for a root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() > 1 {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        } else {
            None
        }
    }

    /// Number of elements in the path. A root has depth 1.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// True iff `ancestor` is a proper prefix of this path.
    ///
    /// A path is never a descendant of itself.
    pub fn is_descendant_of(&self, ancestor: &MaterializedPath) -> bool {
        self.0.len() > ancestor.0.len() && self.0.starts_with(&ancestor.0)
    }

    /// True iff this path equals `other` or descends from it.
    pub fn is_within(&self, other: &MaterializedPath) -> bool {
        self.0.starts_with(&other.0)
    }

    /// True iff `id` appears anywhere in the path (self included).
    pub fn contains(&self, id: i64) -> bool {
        self.0.contains(&id)
    }

    /// Replace the leading `old_prefix` with `new_prefix`.
    ///
    /// Returns `None` when `old_prefix` is not a prefix of this path.
    pub fn rebase(
        &self,
        old_prefix: &MaterializedPath,
        new_prefix: &MaterializedPath,
    ) -> Option<MaterializedPath> {
        if !self.0.starts_with(&old_prefix.0) {
            return None;
        }
        let tail = &self.0[old_prefix.0.len()..];
        let mut ids = Vec::with_capacity(new_prefix.0.len() + tail.len());
        ids.extend_from_slice(&new_prefix.0);
        ids.extend_from_slice(tail);
        Some(Self(ids))
    }

    /// Ids strictly below `ancestor`, in order, ending with this node's id.
    ///
    /// Returns `None` when `ancestor` is not a proper prefix.
    pub fn relative_to(&self, ancestor: &MaterializedPath) -> Option<&[i64]> {
        if self.is_descendant_of(ancestor) {
            Some(&self.0[ancestor.0.len()..])
        } else {
            None
        }
    }

    /// Ids from the node itself up to the root.
    pub fn nearest_first(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().rev().copied()
    }

    /// Encoded text form used in the metadata store.
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Half-open text range covering every proper descendant in the store.
    pub fn descendant_range(&self) -> (String, String) {
        let encoded = self.encode();
        (format!("{encoded}."), format!("{encoded}/"))
    }
}

impl FromStr for MaterializedPath {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        let ids = s
            .split(PATH_SEPARATOR)
            .map(|part| {
                part.parse::<i64>()
                    .map_err(|_| ArborError::Internal(format!("malformed path: {s:?}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_ids(ids)
    }
}

impl fmt::Display for MaterializedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}


/// Property-based tests using proptest.
#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn path_strategy() -> impl Strategy<Value = MaterializedPath> {
        prop::collection::vec(1i64..10_000, 1..8).prop_map(MaterializedPath)
    }

    proptest! {
        /// The encoded text form falls inside the descendant range exactly
        /// when the path is a proper descendant.
        #[test]
        fn range_matches_descendant_test(a in path_strategy(), b in path_strategy()) {
            let (low, high) = a.descendant_range();
            let encoded = b.encode();
            let in_range = encoded.as_str() >= low.as_str() && encoded.as_str() < high.as_str();
            prop_assert_eq!(in_range, b.is_descendant_of(&a));
        }

        #[test]
        fn encode_parses_back(a in path_strategy()) {
            prop_assert_eq!(a.encode().parse::<MaterializedPath>().unwrap(), a);
        }

        /// Rebasing keeps the part of the path below the moved node.
        #[test]
        fn rebase_preserves_tail(
            old in path_strategy(),
            tail in prop::collection::vec(1i64..10_000, 0..5),
            new in path_strategy(),
        ) {
            let mut ids = old.ids().to_vec();
            ids.extend(&tail);
            let below = MaterializedPath(ids);

            let moved = below.rebase(&old, &new).unwrap();
            prop_assert!(moved.is_within(&new));
            prop_assert_eq!(moved.depth() - new.depth(), below.depth() - old.depth());
            prop_assert_eq!(&moved.ids()[new.depth()..], tail.as_slice());
        }
    }
}
