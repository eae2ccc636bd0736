//! Topic labels attached to a connection.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A set of topic labels. Always replaced as a whole, never patched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicSet(BTreeSet<String>);

impl TopicSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set has no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `topic` is in the set.
    pub fn contains(&self, topic: &str) -> bool {
        self.0.contains(topic)
    }

    /// Whether every label of `other` is also in `self`.
    pub fn is_superset_of(&self, other: &TopicSet) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Whether `self` and `other` share at least one label.
    pub fn intersects(&self, other: &TopicSet) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    /// Iterate labels in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for TopicSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for TopicSet {
    fn from(topics: [S; N]) -> Self {
        topics.into_iter().collect()
    }
}

impl From<Vec<String>> for TopicSet {
    fn from(topics: Vec<String>) -> Self {
        topics.into_iter().collect()
    }
}
