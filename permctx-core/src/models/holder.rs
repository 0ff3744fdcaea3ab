//! Permission holders: the owners of node collections.
//!
//! Users and groups both wrap a [`PermissionHolder`]. The holder keeps its
//! persisted nodes and (for users) its transient nodes behind one lock, so a
//! reader always sees a complete node set and mutations on one holder never
//! block another.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Node, Tristate};
use crate::{Error, Result};

/// Enduring identity of a holder. Never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum HolderId {
    User(Uuid),
    /// Lowercase group name
    Group(String),
}

impl HolderId {
    #[must_use]
    pub fn group(name: &str) -> Self {
        Self::Group(name.to_ascii_lowercase())
    }

    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(uuid) => write!(f, "{uuid}"),
            Self::Group(name) => write!(f, "{name}"),
        }
    }
}

/// How a temporary node is merged with an existing temporary node of the
/// same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporaryMergeBehaviour {
    /// The new node replaces the old one
    #[default]
    Replace,
    /// The remaining duration of the new node is added to the old expiry
    Accumulate,
    /// Reject the new node
    Deny,
}

#[derive(Debug, Default)]
struct NodeStore {
    enduring: Vec<Node>,
    transient: Vec<Node>,
}

/// Owner of an ordered node collection.
#[derive(Debug)]
pub struct PermissionHolder {
    id: HolderId,
    nodes: RwLock<NodeStore>,
}

impl PermissionHolder {
    #[must_use]
    pub fn new(id: HolderId) -> Self {
        Self {
            id,
            nodes: RwLock::new(NodeStore::default()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &HolderId {
        &self.id
    }

    #[must_use]
    pub fn object_name(&self) -> String {
        self.id.to_string()
    }

    /// Persisted nodes, in declaration order
    #[must_use]
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.read().enduring.clone()
    }

    /// Session-only nodes, in declaration order
    #[must_use]
    pub fn transient_nodes(&self) -> Vec<Node> {
        self.nodes.read().transient.clone()
    }

    /// Snapshot of every node: transient first, then persisted.
    ///
    /// Taken under one read lock, so it never mixes two versions of the set.
    #[must_use]
    pub fn all_nodes(&self) -> Vec<Node> {
        let store = self.nodes.read();
        store
            .transient
            .iter()
            .chain(store.enduring.iter())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        let store = self.nodes.read();
        store.enduring.len() + store.transient.len()
    }

    /// Replace the persisted node list (used when loading from storage)
    ///
    /// Later duplicates replace earlier ones in place.
    pub fn set_nodes(&self, nodes: Vec<Node>) {
        let mut deduped: Vec<Node> = Vec::with_capacity(nodes.len());
        let mut index: HashMap<Node, usize> = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if let Some(&position) = index.get(&node) {
                deduped[position] = node;
            } else {
                index.insert(node.clone(), deduped.len());
                deduped.push(node);
            }
        }
        self.nodes.write().enduring = deduped;
    }

    /// Set a persisted node, replacing any node with the same identity.
    pub fn set_permission(&self, node: Node) -> Result<()> {
        self.set_permission_with(node, TemporaryMergeBehaviour::Replace)
    }

    pub fn set_permission_with(&self, node: Node, merge: TemporaryMergeBehaviour) -> Result<()> {
        self.check_self_inheritance(&node)?;
        let mut store = self.nodes.write();
        let node = insert_node(&mut store.enduring, node, merge)?;
        tracing::debug!(holder = %self.id, node = %node, "Permission set");
        Ok(())
    }

    /// Remove the persisted node with the same identity as `node`.
    pub fn unset_permission(&self, node: &Node) -> Result<()> {
        let mut store = self.nodes.write();
        remove_node(&mut store.enduring, node)?;
        tracing::debug!(holder = %self.id, node = %node, "Permission unset");
        Ok(())
    }

    pub fn set_transient_permission(&self, node: Node) -> Result<()> {
        self.check_self_inheritance(&node)?;
        let mut store = self.nodes.write();
        insert_node(&mut store.transient, node, TemporaryMergeBehaviour::Replace)?;
        Ok(())
    }

    pub fn unset_transient_permission(&self, node: &Node) -> Result<()> {
        let mut store = self.nodes.write();
        remove_node(&mut store.transient, node)
    }

    /// Drop every session-only node (on disconnect)
    pub fn clear_transient_nodes(&self) {
        self.nodes.write().transient.clear();
    }

    /// Remove every persisted node
    pub fn clear_nodes(&self) {
        self.nodes.write().enduring.clear();
    }

    /// Remove every persisted node matching `predicate`, returning how many went
    pub fn clear_nodes_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Node) -> bool,
    {
        let mut store = self.nodes.write();
        let before = store.enduring.len();
        store.enduring.retain(|n| !predicate(n));
        before - store.enduring.len()
    }

    /// Value of the own node (transient or persisted) with the same identity
    /// as `node`, ignoring inheritance. Expired nodes count as absent.
    #[must_use]
    pub fn has_node(&self, node: &Node) -> Tristate {
        let now = Utc::now();
        let store = self.nodes.read();
        store
            .transient
            .iter()
            .chain(store.enduring.iter())
            .find(|n| *n == node && !n.is_expired_at(now))
            .map_or(Tristate::Undefined, |n| Tristate::from_bool(n.value()))
    }

    /// Whether this holder directly inherits `group` in the global context
    #[must_use]
    pub fn inherits_group(&self, group: &str) -> bool {
        let group = group.to_ascii_lowercase();
        let now = Utc::now();
        self.nodes.read().enduring.iter().any(|n| {
            n.value()
                && n.contexts().is_empty()
                && !n.is_expired_at(now)
                && n.group_name() == Some(group.as_str())
        })
    }

    /// Remove expired temporary nodes, returning them.
    ///
    /// Resolution already ignores expired nodes; this is the explicit pruning
    /// step run periodically by the housekeeping task.
    pub fn audit_temporary_permissions(&self) -> Vec<Node> {
        self.audit_temporary_permissions_at(Utc::now())
    }

    pub fn audit_temporary_permissions_at(&self, now: DateTime<Utc>) -> Vec<Node> {
        let mut store = self.nodes.upgradable_read();
        let expired = store
            .enduring
            .iter()
            .chain(store.transient.iter())
            .any(|n| n.is_expired_at(now));
        if !expired {
            return Vec::new();
        }

        store.with_upgraded(|store| {
            let mut removed = Vec::new();
            for list in [&mut store.enduring, &mut store.transient] {
                let (gone, kept): (Vec<Node>, Vec<Node>) =
                    std::mem::take(list).into_iter().partition(|n| n.is_expired_at(now));
                *list = kept;
                removed.extend(gone);
            }
            tracing::debug!(holder = %self.id, removed = removed.len(), "Expired nodes audited");
            removed
        })
    }

    fn check_self_inheritance(&self, node: &Node) -> Result<()> {
        if let (HolderId::Group(name), Some(group)) = (&self.id, node.group_name()) {
            if name == group {
                return Err(Error::InvalidInput(format!(
                    "Group '{name}' cannot inherit itself"
                )));
            }
        }
        Ok(())
    }
}

fn insert_node(list: &mut Vec<Node>, node: Node, merge: TemporaryMergeBehaviour) -> Result<Node> {
    let Some(existing) = list.iter_mut().find(|n| **n == node) else {
        list.push(node.clone());
        return Ok(node);
    };

    if existing.full_eq(&node) {
        return Err(Error::AlreadyExists(format!("Node already set: {node}")));
    }

    let node = match (existing.expiry(), node.expiry(), merge) {
        (Some(_), Some(_), TemporaryMergeBehaviour::Deny) => {
            return Err(Error::AlreadyExists(format!(
                "Temporary node already set: {existing}"
            )));
        }
        (Some(current), Some(requested), TemporaryMergeBehaviour::Accumulate) => {
            let extra = requested - Utc::now();
            node.with_expiry(Some(current + extra))
        }
        _ => node,
    };

    *existing = node.clone();
    Ok(node)
}

fn remove_node(list: &mut Vec<Node>, node: &Node) -> Result<()> {
    let Some(index) = list.iter().position(|n| n == node) else {
        return Err(Error::NotFound(format!("Node not set: {node}")));
    };
    list.remove(index);
    Ok(())
}
