use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::{HolderId, PermissionHolder};
use crate::cache::UserData;
use crate::config::CacheConfig;
use crate::resolver::Resolver;
use crate::validation::validate_group_name;
use crate::Result;

/// A player. Owns its node lists and its per-context cache.
///
/// Always handled as `Arc<User>`: the cache keeps a weak reference back to
/// the user it resolves.
#[derive(Debug)]
pub struct User {
    uuid: Uuid,
    username: RwLock<Option<String>>,
    primary_group: RwLock<String>,
    holder: PermissionHolder,
    data: UserData,
}

impl User {
    #[must_use]
    pub fn new(
        uuid: Uuid,
        username: Option<&str>,
        resolver: Arc<Resolver>,
        cache: &CacheConfig,
    ) -> Arc<Self> {
        let primary_group = resolver.config().default_group.to_ascii_lowercase();
        Arc::new_cyclic(|weak| Self {
            uuid,
            username: RwLock::new(username.map(str::to_string)),
            primary_group: RwLock::new(primary_group),
            holder: PermissionHolder::new(HolderId::User(uuid)),
            data: UserData::new(uuid, weak.clone(), resolver, cache),
        })
    }

    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn username(&self) -> Option<String> {
        self.username.read().clone()
    }

    pub fn set_username(&self, username: Option<&str>) {
        *self.username.write() = username.map(str::to_string);
    }

    #[must_use]
    pub fn primary_group(&self) -> String {
        self.primary_group.read().clone()
    }

    pub fn set_primary_group(&self, group: &str) -> Result<()> {
        validate_group_name(group)?;
        *self.primary_group.write() = group.to_ascii_lowercase();
        Ok(())
    }

    #[must_use]
    pub const fn holder(&self) -> &PermissionHolder {
        &self.holder
    }

    #[must_use]
    pub const fn cached_data(&self) -> &UserData {
        &self.data
    }

    /// Drop all cached data; call after mutating this user's nodes
    pub fn invalidate_caches(&self) {
        self.data.invalidate_cache();
    }
}

impl Deref for User {
    type Target = PermissionHolder;

    fn deref(&self) -> &Self::Target {
        &self.holder
    }
}
