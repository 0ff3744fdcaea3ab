//! Test helpers and fixtures for permctx-core tests

use std::sync::Arc;

use uuid::Uuid;

use crate::config::{CacheConfig, Config, ResolutionConfig};
use crate::manager::GroupManager;
use crate::models::{Group, HolderId, Node, PermissionHolder, User};
use crate::resolver::Resolver;

/// Global, permanent node
pub fn node(permission: &str, value: bool) -> Node {
    Node::new(permission, value).expect("valid test node")
}

/// Default configuration running as server "lobby"
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.resolution.server = "lobby".to_string();
    config
}

/// Fresh group registry with a resolver over it
pub fn resolver() -> (Arc<GroupManager>, Arc<Resolver>) {
    let groups = Arc::new(GroupManager::new());
    let resolver = Arc::new(Resolver::new(groups.clone(), ResolutionConfig::default()));
    (groups, resolver)
}

/// Load `name` into `groups` with the given nodes
pub fn group_with(groups: &GroupManager, name: &str, nodes: &[Node]) -> Arc<Group> {
    let group = groups.get_or_make(name).expect("valid test group");
    for node in nodes {
        group.set_permission(node.clone()).expect("node accepted");
    }
    group
}

/// Standalone user holder with the given persisted nodes
pub fn user_holder(nodes: &[Node]) -> PermissionHolder {
    let holder = PermissionHolder::new(HolderId::User(Uuid::new_v4()));
    holder.set_nodes(nodes.to_vec());
    holder
}

/// Cached user backed by `resolver`, with the given persisted nodes
pub fn user_with(resolver: &Arc<Resolver>, nodes: &[Node]) -> Arc<User> {
    let user = User::new(Uuid::new_v4(), None, resolver.clone(), &CacheConfig::default());
    user.set_nodes(nodes.to_vec());
    user
}
