use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::models::{Node, User};
use crate::resolver::Resolver;
use crate::Result;

/// Registry of loaded users.
#[derive(Debug)]
pub struct UserManager {
    users: DashMap<Uuid, Arc<User>>,
    resolver: Arc<Resolver>,
    cache: CacheConfig,
}

impl UserManager {
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, cache: CacheConfig) -> Self {
        Self {
            users: DashMap::new(),
            resolver,
            cache,
        }
    }

    /// Return the loaded user, creating an empty one if needed. A given
    /// username replaces the stored one.
    pub fn get_or_make(&self, uuid: Uuid, username: Option<&str>) -> Arc<User> {
        let user = self
            .users
            .entry(uuid)
            .or_insert_with(|| {
                tracing::debug!(user = %uuid, "User loaded");
                User::new(uuid, username, self.resolver.clone(), &self.cache)
            })
            .clone();

        if username.is_some() && user.username().as_deref() != username {
            user.set_username(username);
        }
        user
    }

    #[must_use]
    pub fn get_if_loaded(&self, uuid: Uuid) -> Option<Arc<User>> {
        self.users.get(&uuid).map(|u| u.clone())
    }

    /// Case-insensitive username lookup among loaded users
    #[must_use]
    pub fn get_by_username(&self, username: &str) -> Option<Arc<User>> {
        self.users
            .iter()
            .find(|entry| {
                entry
                    .value()
                    .username()
                    .is_some_and(|name| name.eq_ignore_ascii_case(username))
            })
            .map(|entry| entry.value().clone())
    }

    /// Remove a user on disconnect. Session-only nodes are discarded.
    pub fn unload(&self, uuid: Uuid) -> Option<Arc<User>> {
        let (_, user) = self.users.remove(&uuid)?;
        user.clear_transient_nodes();
        user.invalidate_caches();
        tracing::debug!(user = %uuid, "User unloaded");
        Some(user)
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<User>> {
        self.users.iter().map(|entry| entry.value().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Prune expired nodes from every loaded user, invalidating the caches of
    /// users that lost any
    pub fn audit_all(&self) -> Vec<(Uuid, Node)> {
        let mut removed = Vec::new();
        for user in self.all() {
            let expired = user.audit_temporary_permissions();
            if expired.is_empty() {
                continue;
            }
            user.invalidate_caches();
            removed.extend(expired.into_iter().map(|node| (user.uuid(), node)));
        }
        removed
    }

    /// Recompute every loaded user's cached data in place, returning how many
    /// users were refreshed. Used after a group changes.
    pub async fn update_all_users(&self) -> usize {
        let users = self.all();
        let results = join_all(users.iter().map(|user| async move {
            let data = user.cached_data();
            data.recalculate_permissions().await?;
            data.recalculate_meta().await
        }))
        .await;

        let mut refreshed = 0;
        for (user, result) in users.iter().zip(results) {
            match result {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    tracing::warn!(user = %user.uuid(), error = %e, "Failed to refresh user cache");
                }
            }
        }
        tracing::debug!(users = refreshed, "User caches refreshed");
        refreshed
    }

    /// Give `user` the default group when it inherits nothing, and repair a
    /// primary group the user no longer inherits. Returns whether anything
    /// changed.
    pub fn give_default_if_needed(&self, user: &User) -> Result<bool> {
        let default_group = &self.resolver.config().default_group;
        let mut changed = false;

        let inherits_any = user
            .nodes()
            .iter()
            .any(|n| n.value() && n.is_group_node());
        if !inherits_any {
            user.set_permission(Node::inheritance(default_group)?)?;
            changed = true;
        }

        if !user.inherits_group(&user.primary_group()) {
            let fallback = user
                .nodes()
                .iter()
                .filter(|n| n.value() && n.contexts().is_empty())
                .find_map(|n| n.group_name().map(str::to_string))
                .unwrap_or_else(|| default_group.clone());
            user.set_primary_group(&fallback)?;
            changed = true;
        }

        if changed {
            tracing::debug!(user = %user.uuid(), primary_group = %user.primary_group(), "Default group applied");
            user.invalidate_caches();
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Contexts;
    use crate::models::Tristate;
    use crate::test_helpers::{group_with, node, resolver};

    #[test]
    fn test_get_or_make_and_lookup() {
        let (_groups, resolver) = resolver();
        let manager = UserManager::new(resolver, CacheConfig::default());
        let uuid = Uuid::new_v4();

        let a = manager.get_or_make(uuid, Some("Alex"));
        let b = manager.get_or_make(uuid, None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.username().as_deref(), Some("Alex"));
        assert!(manager.get_by_username("alex").is_some());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_unload_clears_transient_nodes() {
        let (_groups, resolver) = resolver();
        let manager = UserManager::new(resolver, CacheConfig::default());
        let uuid = Uuid::new_v4();
        let user = manager.get_or_make(uuid, None);
        user.set_transient_permission(node("session", true)).unwrap();
        user.set_permission(node("stored", true)).unwrap();

        let unloaded = manager.unload(uuid).unwrap();
        assert!(unloaded.transient_nodes().is_empty());
        assert_eq!(unloaded.nodes().len(), 1);
        assert!(manager.get_if_loaded(uuid).is_none());
    }

    #[test]
    fn test_give_default_if_needed() {
        let (_groups, resolver) = resolver();
        let manager = UserManager::new(resolver, CacheConfig::default());
        let user = manager.get_or_make(Uuid::new_v4(), None);

        assert!(manager.give_default_if_needed(&user).unwrap());
        assert!(user.inherits_group("default"));
        assert!(!manager.give_default_if_needed(&user).unwrap());
    }

    #[test]
    fn test_primary_group_repaired() {
        let (_groups, resolver) = resolver();
        let manager = UserManager::new(resolver, CacheConfig::default());
        let user = manager.get_or_make(Uuid::new_v4(), None);
        user.set_permission(node("group.vip", true)).unwrap();

        assert!(manager.give_default_if_needed(&user).unwrap());
        assert_eq!(user.primary_group(), "vip");
        assert!(!user.inherits_group("default"));
    }

    #[tokio::test]
    async fn test_update_all_users_refreshes_in_place() {
        let (groups, resolver) = resolver();
        let member = group_with(&groups, "member", &[node("chat", true)]);
        let manager = UserManager::new(resolver, CacheConfig::default());
        let user = manager.get_or_make(Uuid::new_v4(), None);
        user.set_permission(node("group.member", true)).unwrap();

        let data = user
            .cached_data()
            .get_permission_data(&Contexts::allow_all())
            .await
            .unwrap();
        assert_eq!(data.check_permission("chat"), Tristate::True);

        member.set_permission(node("chat", false)).unwrap();
        assert_eq!(manager.update_all_users().await, 1);
        assert_eq!(data.check_permission("chat"), Tristate::False);
    }

    #[test]
    fn test_audit_all_reports_removed_nodes() {
        let (_groups, resolver) = resolver();
        let manager = UserManager::new(resolver, CacheConfig::default());
        let user = manager.get_or_make(Uuid::new_v4(), None);
        user.set_permission(
            Node::builder("temp")
                .expiry(chrono::Utc::now() - chrono::Duration::seconds(1))
                .build()
                .unwrap(),
        )
        .unwrap();

        let removed = manager.audit_all();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, user.uuid());
    }
}
