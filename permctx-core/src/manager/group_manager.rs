use std::sync::Arc;

use dashmap::DashMap;

use crate::models::{Group, Node};
use crate::Result;

/// Registry of loaded groups, keyed by lowercase name.
#[derive(Debug, Default)]
pub struct GroupManager {
    groups: DashMap<String, Arc<Group>>,
}

impl GroupManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the loaded group, creating an empty one if needed
    pub fn get_or_make(&self, name: &str) -> Result<Arc<Group>> {
        let key = name.to_ascii_lowercase();
        if let Some(group) = self.groups.get(&key) {
            return Ok(group.clone());
        }

        let group = Arc::new(Group::new(&key)?);
        let group = self.groups.entry(key).or_insert(group).clone();
        tracing::debug!(group = %group.name(), "Group loaded");
        Ok(group)
    }

    #[must_use]
    pub fn get_if_loaded(&self, name: &str) -> Option<Arc<Group>> {
        self.groups
            .get(&name.to_ascii_lowercase())
            .map(|g| g.clone())
    }

    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.groups.contains_key(&name.to_ascii_lowercase())
    }

    /// Drop a group from the registry. Holders that inherit it resolve it as
    /// missing from then on.
    pub fn unload(&self, name: &str) -> Option<Arc<Group>> {
        let removed = self
            .groups
            .remove(&name.to_ascii_lowercase())
            .map(|(_, g)| g);
        if let Some(group) = &removed {
            tracing::debug!(group = %group.name(), "Group unloaded");
        }
        removed
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<Group>> {
        self.groups.iter().map(|entry| entry.value().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Prune expired nodes from every loaded group
    pub fn audit_all(&self) -> Vec<(String, Node)> {
        self.all()
            .into_iter()
            .flat_map(|group| {
                let name = group.name().to_string();
                group
                    .audit_temporary_permissions()
                    .into_iter()
                    .map(move |node| (name.clone(), node))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_get_or_make_is_case_insensitive() {
        let manager = GroupManager::new();
        let a = manager.get_or_make("Admin").unwrap();
        let b = manager.get_or_make("admin").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);
        assert!(manager.is_loaded("ADMIN"));
    }

    #[test]
    fn test_unload() {
        let manager = GroupManager::new();
        manager.get_or_make("vip").unwrap();
        assert!(manager.unload("vip").is_some());
        assert!(manager.get_if_loaded("vip").is_none());
        assert!(manager.unload("vip").is_none());
    }

    #[test]
    fn test_invalid_name() {
        let manager = GroupManager::new();
        assert!(manager.get_or_make("bad name").is_err());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_audit_all() {
        let manager = GroupManager::new();
        let group = manager.get_or_make("temp").unwrap();
        group
            .set_permission(
                Node::builder("fly")
                    .expiry(Utc::now() - Duration::seconds(5))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let removed = manager.audit_all();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, "temp");
        assert_eq!(group.node_count(), 0);
    }
}
