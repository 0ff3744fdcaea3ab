use std::collections::{BTreeMap, HashMap};

use crate::models::node::normalize_permission;
use crate::models::{Node, NodeKind};

/// Collects metadata from nodes visited in resolution order.
///
/// The first value seen wins: for each generic meta key, and for each
/// prefix/suffix priority. Nodes with `value == false` carry no metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaAccumulator {
    meta: HashMap<String, String>,
    prefixes: BTreeMap<i32, String>,
    suffixes: BTreeMap<i32, String>,
    weight: Option<i32>,
}

impl MetaAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, node: &Node) {
        if !node.value() {
            return;
        }

        match node.kind() {
            NodeKind::Meta { key, value } => {
                self.meta.entry(key.clone()).or_insert_with(|| value.clone());
            }
            NodeKind::Prefix { priority, text } => {
                self.prefixes.entry(*priority).or_insert_with(|| text.clone());
            }
            NodeKind::Suffix { priority, text } => {
                self.suffixes.entry(*priority).or_insert_with(|| text.clone());
            }
            NodeKind::Weight(weight) => {
                self.weight = Some(self.weight.map_or(*weight, |w| w.max(*weight)));
            }
            NodeKind::Permission | NodeKind::Inheritance { .. } => {}
        }
    }

    /// Prefix with the highest priority
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        self.prefixes.last_key_value().map(|(_, text)| text.as_str())
    }

    /// Suffix with the highest priority
    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        self.suffixes.last_key_value().map(|(_, text)| text.as_str())
    }

    #[must_use]
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta.get(&normalize_permission(key)).map(String::as_str)
    }

    #[must_use]
    pub const fn meta(&self) -> &HashMap<String, String> {
        &self.meta
    }

    #[must_use]
    pub const fn prefixes(&self) -> &BTreeMap<i32, String> {
        &self.prefixes
    }

    #[must_use]
    pub const fn suffixes(&self) -> &BTreeMap<i32, String> {
        &self.suffixes
    }

    /// Highest weight among visited `weight.<n>` nodes
    #[must_use]
    pub const fn weight(&self) -> Option<i32> {
        self.weight
    }
}
