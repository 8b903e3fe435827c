//! Classification labels.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Discrete classification outcome attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    /// Same client re-contacting faster than a browser would
    FastBrowser,
    /// Same header fingerprint seen from a different address
    IpRotation,
}

impl Label {
    /// Returns the label name used in headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::FastBrowser => "FAST_BROWSER",
            Label::IpRotation => "IP_ROTATION",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplicated set of labels, iterated in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeSet<Label>);

impl Labels {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding one label.
    pub fn single(label: Label) -> Self {
        Self(BTreeSet::from([label]))
    }

    pub fn insert(&mut self, label: Label) -> bool {
        self.0.insert(label)
    }

    /// Merge `other` into this set.
    pub fn extend(&mut self, other: Labels) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, label: Label) -> bool {
        self.0.contains(&label)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Label> + '_ {
        self.0.iter().copied()
    }

    /// Comma-joined label names, as sent to the upstream.
    pub fn join(&self) -> String {
        self.iter().map(|l| l.as_str()).collect::<Vec<_>>().join(",")
    }
}

impl FromIterator<Label> for Labels {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Labels {
    type Item = Label;
    type IntoIter = std::collections::btree_set::IntoIter<Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
