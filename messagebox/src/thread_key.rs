//! Thread keys: the sort key encoding a message's position in its thread.
//!
//! A thread key is the `#`-joined chain of creation timestamps from the root
//! message down to this one, terminated by `|`:
//!
//! - root created at 1000 → `1000|`
//! - reply at 1010 → `1000#1010|`
//! - reply to that at 1040 → `1000#1010#1040|`
//!
//! The terminating pipe makes a parent sort *after* all of its descendants
//! in ascending byte order (`'#' < '|'`), so reading the index in reverse
//! yields newest-root-first with each subtree nested directly under its
//! root.

use collegium_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A message's position in its thread hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadKey(String);

impl ThreadKey {
    /// Thread key of a new root message.
    #[must_use]
    pub fn root(created: i64) -> Self {
        Self(format!("{created}|"))
    }

    /// Thread key of a reply below `parent`.
    #[must_use]
    pub fn reply(parent: &Self, created: i64) -> Self {
        let stem = parent.0.trim_end_matches('|');
        Self(format!("{stem}#{created}|"))
    }

    /// Parse a stored thread key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the key is not a `#`-joined chain
    /// of integer timestamps terminated by `|`.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let Some(stem) = raw.strip_suffix('|') else {
            return Err(Error::validation(format!("thread key not terminated: {raw}")));
        };
        if stem.is_empty() || !stem.split('#').all(|part| part.parse::<i64>().is_ok()) {
            return Err(Error::validation(format!("malformed thread key: {raw}")));
        }
        Ok(Self(raw))
    }

    /// The raw key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Nesting depth: the number of `#` separators.
    #[must_use]
    pub fn level(&self) -> usize {
        self.0.matches('#').count()
    }

    /// Creation timestamp of the message this key belongs to (the last
    /// segment of the chain).
    #[must_use]
    pub fn created(&self) -> i64 {
        self.0
            .trim_end_matches('|')
            .rsplit('#')
            .next()
            .and_then(|part| part.parse().ok())
            .unwrap_or_default()
    }

    /// Creation timestamp of the parent message: the second-to-last segment,
    /// or `None` for a root.
    #[must_use]
    pub fn reply_to(&self) -> Option<i64> {
        let stem = self.0.trim_end_matches('|');
        let mut parts = stem.rsplit('#');
        parts.next()?;
        parts.next().and_then(|part| part.parse().ok())
    }

    /// Whether `self` keys a descendant of the message keyed by `ancestor`.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        let stem = ancestor.0.trim_end_matches('|');
        self.0.len() > ancestor.0.len() && self.0.starts_with(stem) && self.0.as_bytes()[stem.len()] == b'#'
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ThreadKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn root_and_reply_shapes() {
        let root = ThreadKey::root(1000);
        assert_eq!(root.as_str(), "1000|");
        assert_eq!(root.level(), 0);
        assert_eq!(root.created(), 1000);
        assert_eq!(root.reply_to(), None);

        let reply = ThreadKey::reply(&root, 1010);
        assert_eq!(reply.as_str(), "1000#1010|");
        assert_eq!(reply.level(), 1);
        assert_eq!(reply.created(), 1010);
        assert_eq!(reply.reply_to(), Some(1000));

        let deep = ThreadKey::reply(&reply, 1040);
        assert_eq!(deep.as_str(), "1000#1010#1040|");
        assert_eq!(deep.level(), 2);
        assert_eq!(deep.reply_to(), Some(1010));
    }

    #[test]
    fn reverse_ordering_nests_descendants_under_roots() {
        let a = ThreadKey::root(1000);
        let a2 = ThreadKey::reply(&a, 1010);
        let b = ThreadKey::root(1020);

        let mut keys = vec![a.clone(), a2.clone(), b.clone()];
        keys.sort();
        keys.reverse();
        assert_eq!(keys, vec![b, a, a2]);
    }

    #[test]
    fn descendant_check_requires_segment_boundary() {
        let a = ThreadKey::root(100);
        let child = ThreadKey::reply(&a, 200);
        let sibling = ThreadKey::root(1001);

        assert!(child.is_descendant_of(&a));
        assert!(!a.is_descendant_of(&child));
        // "1001|" shares the "100" prefix but is not below "100|".
        assert!(!sibling.is_descendant_of(&a));
        assert!(!a.is_descendant_of(&a));
    }

    #[test]
    fn parse_round_trips_and_rejects_junk() {
        let parsed = ThreadKey::parse("1000#1010|").expect("valid key");
        assert_eq!(parsed, ThreadKey::reply(&ThreadKey::root(1000), 1010));

        for bad in ["", "1000", "|", "abc|", "1000#|", "#1000|"] {
            assert!(ThreadKey::parse(bad).is_err(), "should reject {bad:?}");
        }
    }

    proptest! {
        /// A reply always sorts before its parent ascending (so after it in
        /// the reversed read), and the parent key is a prefix of the reply
        /// key modulo the terminator.
        #[test]
        fn reply_sorts_directly_under_parent(root in 1_000_000_000_000_i64..2_000_000_000_000, delta in 1_i64..1_000_000) {
            let parent = ThreadKey::root(root);
            let child = ThreadKey::reply(&parent, root + delta);
            prop_assert!(child < parent);
            prop_assert!(child.is_descendant_of(&parent));
            prop_assert!(child.as_str().starts_with(parent.as_str().trim_end_matches('|')));
        }
    }
}
