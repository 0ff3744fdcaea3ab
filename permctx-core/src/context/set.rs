//! Context sets: the situational key/value facts a check is evaluated against.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validation::{validate_context, ValidationResult};

/// Context key for the server a subject is connected to
pub const SERVER_KEY: &str = "server";

/// Context key for the world a subject is in
pub const WORLD_KEY: &str = "world";

fn normalise_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

/// Immutable set of context pairs.
///
/// A key may appear with several values. Pairs are kept ordered so that two
/// sets holding the same pairs compare and hash equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSet(BTreeSet<(String, String)>);

impl ContextSet {
    /// The global (empty) context set
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A set holding exactly one pair
    pub fn singleton(key: &str, value: &str) -> ValidationResult<Self> {
        let mut set = MutableContextSet::new();
        set.add(key, value)?;
        Ok(set.freeze())
    }

    /// Build a set from an iterator of pairs
    pub fn from_pairs<'a, I>(pairs: I) -> ValidationResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut set = MutableContextSet::new();
        for (key, value) in pairs {
            set.add(key, value)?;
        }
        Ok(set.freeze())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0
            .contains(&(normalise_key(key), value.trim().to_string()))
    }

    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        let key = normalise_key(key);
        self.0.iter().any(|(k, _)| *k == key)
    }

    /// All values recorded for `key`, in order
    #[must_use]
    pub fn values(&self, key: &str) -> Vec<&str> {
        let key = normalise_key(key);
        self.0
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// The single value for `key`, or `None` when it is absent or ambiguous
    #[must_use]
    pub fn single_value(&self, key: &str) -> Option<&str> {
        match self.values(key).as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True iff every pair in `self` is also present in `active`.
    ///
    /// This is the applicability test used during resolution: a node restricted
    /// to `self` applies whenever the query carries at least these pairs. The
    /// empty set is satisfied by anything.
    #[must_use]
    pub fn is_satisfied_by(&self, active: &Self) -> bool {
        self.0.len() <= active.0.len() && self.0.is_subset(&active.0)
    }

    /// Grouped view (`key -> [values]`) used by the persisted node shape
    #[must_use]
    pub fn to_multimap(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in &self.0 {
            map.entry(key.clone()).or_default().push(value.clone());
        }
        map
    }

    #[must_use]
    pub fn to_mutable(&self) -> MutableContextSet {
        MutableContextSet(self.0.clone())
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(global)");
        }
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Accumulator used by context calculators before the set is frozen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutableContextSet(BTreeSet<(String, String)>);

impl MutableContextSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pair. Keys are lowercased, both parts are trimmed.
    pub fn add(&mut self, key: &str, value: &str) -> ValidationResult<()> {
        let key = normalise_key(key);
        let value = value.trim();
        validate_context(&key, value)?;
        self.0.insert((key, value.to_string()));
        Ok(())
    }

    /// Merge every pair of another set into this one
    pub fn add_all(&mut self, other: &ContextSet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    pub fn remove(&mut self, key: &str, value: &str) -> bool {
        self.0.remove(&(normalise_key(key), value.trim().to_string()))
    }

    /// Remove every value recorded for `key`
    pub fn remove_all(&mut self, key: &str) {
        let key = normalise_key(key);
        self.0.retain(|(k, _)| *k != key);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn freeze(self) -> ContextSet {
        ContextSet(self.0)
    }
}
