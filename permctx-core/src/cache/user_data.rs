//! Per-user cache of resolved permission and meta data
//!
//! One entry per distinct [`Contexts`] the user has been queried under:
//! - Built on first use; concurrent callers for one key share a single build
//! - Evicted after `cache.idle_expiry_secs` without access
//! - Dropped wholesale by `invalidate_cache`, or recomputed in place by the
//!   `recalculate_*` family so that already handed-out `Arc`s see new data

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use moka::future::Cache;
use serde::Serialize;
use uuid::Uuid;

use super::{MetaCache, PermissionCache};
use crate::config::CacheConfig;
use crate::context::Contexts;
use crate::metrics;
use crate::models::User;
use crate::resolver::Resolver;
use crate::{Error, Result};

const PERMISSIONS: &str = "permissions";
const META: &str = "meta";

#[derive(Debug, Default)]
struct Counters {
    builds: AtomicU64,
    refreshes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cached value tagged with the invalidation generation it was built under
#[derive(Debug)]
struct Entry<T> {
    generation: u64,
    data: Arc<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            data: self.data.clone(),
        }
    }
}

/// Snapshot of a [`UserData`]'s size and activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub permission_entries: u64,
    pub meta_entries: u64,
    pub builds: u64,
    pub refreshes: u64,
    pub hits: u64,
    pub misses: u64,
}

pub struct UserData {
    uuid: Uuid,
    user: Weak<User>,
    resolver: Arc<Resolver>,
    permissions: Cache<Contexts, Entry<PermissionCache>>,
    meta: Cache<Contexts, Entry<MetaCache>>,
    /// Bumped by every `invalidate_cache`; entries built under an older
    /// value are never returned
    generation: AtomicU64,
    counters: Counters,
}

impl UserData {
    #[must_use]
    pub fn new(uuid: Uuid, user: Weak<User>, resolver: Arc<Resolver>, config: &CacheConfig) -> Self {
        let permissions = Cache::builder()
            .max_capacity(config.max_contexts_per_subject)
            .time_to_idle(config.idle_expiry())
            .build();
        let meta = Cache::builder()
            .max_capacity(config.max_contexts_per_subject)
            .time_to_idle(config.idle_expiry())
            .build();

        Self {
            uuid,
            user,
            resolver,
            permissions,
            meta,
            generation: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Permission data for `contexts`, building it on first use
    pub async fn get_permission_data(&self, contexts: &Contexts) -> Result<Arc<PermissionCache>> {
        self.get_or_build(&self.permissions, contexts, PERMISSIONS, || {
            self.build_permissions(contexts)
        })
        .await
    }

    /// Meta data for `contexts`, building it on first use
    pub async fn get_meta_data(&self, contexts: &Contexts) -> Result<Arc<MetaCache>> {
        self.get_or_build(&self.meta, contexts, META, || self.build_meta(contexts))
            .await
    }

    /// Recompute the permission entry for `contexts` in place, or build it
    /// if absent
    pub async fn recalculate_permissions_for(&self, contexts: &Contexts) -> Result<Arc<PermissionCache>> {
        let Some(existing) = self.current(&self.permissions, contexts).await else {
            return self.get_permission_data(contexts).await;
        };

        let user = self.user()?;
        existing.refresh(self.resolver.export_nodes(user.holder(), contexts));
        self.record_refresh(PERMISSIONS);
        Ok(existing)
    }

    /// Recompute the meta entry for `contexts` in place, or build it if absent
    pub async fn recalculate_meta_for(&self, contexts: &Contexts) -> Result<Arc<MetaCache>> {
        let Some(existing) = self.current(&self.meta, contexts).await else {
            return self.get_meta_data(contexts).await;
        };

        let user = self.user()?;
        existing.refresh(self.resolver.accumulate_meta(user.holder(), contexts));
        self.record_refresh(META);
        Ok(existing)
    }

    /// Recompute every live permission entry in place
    pub async fn recalculate_permissions(&self) -> Result<()> {
        let keys: Vec<Contexts> = self.permissions.iter().map(|(k, _)| (*k).clone()).collect();
        for contexts in &keys {
            self.recalculate_permissions_for(contexts).await?;
        }
        Ok(())
    }

    /// Recompute every live meta entry in place
    pub async fn recalculate_meta(&self) -> Result<()> {
        let keys: Vec<Contexts> = self.meta.iter().map(|(k, _)| (*k).clone()).collect();
        for contexts in &keys {
            self.recalculate_meta_for(contexts).await?;
        }
        Ok(())
    }

    /// Drop every entry of both caches
    pub fn invalidate_cache(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.permissions.invalidate_all();
        self.meta.invalidate_all();
        tracing::debug!(user = %self.uuid, "User cache invalidated");
    }

    /// Warm both caches for `contexts`
    pub async fn pre_calculate(&self, contexts: &Contexts) -> Result<()> {
        self.get_permission_data(contexts).await?;
        self.get_meta_data(contexts).await?;
        Ok(())
    }

    pub async fn pre_calculate_all(&self, contexts: &[Contexts]) -> Result<()> {
        for c in contexts {
            self.pre_calculate(c).await?;
        }
        Ok(())
    }

    /// Clear memoised lookups of every permission entry
    pub fn invalidate_permission_calculators(&self) {
        for (_, entry) in self.permissions.iter() {
            entry.data.invalidate_lookups();
        }
    }

    /// Run pending maintenance, evicting idle entries
    pub async fn cleanup(&self) {
        self.permissions.run_pending_tasks().await;
        self.meta.run_pending_tasks().await;
    }

    /// Context keys that currently have a permission entry
    #[must_use]
    pub fn cached_contexts(&self) -> Vec<Contexts> {
        self.permissions.iter().map(|(k, _)| (*k).clone()).collect()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            permission_entries: self.permissions.entry_count(),
            meta_entries: self.meta.entry_count(),
            builds: self.counters.builds.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }

    /// Shared lookup path of both caches.
    ///
    /// An entry is returned only if it was built under the generation read at
    /// the start of the attempt. Anything older (an entry stored after
    /// `invalidate_cache`, or a coalesced build that started before it) is
    /// dropped and rebuilt.
    async fn get_or_build<T, F>(
        &self,
        cache: &Cache<Contexts, Entry<T>>,
        contexts: &Contexts,
        cache_type: &str,
        build: F,
    ) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Result<Arc<T>> + Sync,
    {
        let mut missed = false;
        loop {
            let generation = self.generation.load(Ordering::Acquire);

            if let Some(entry) = cache.get(contexts).await {
                if entry.generation >= generation {
                    if !missed {
                        self.record_hit(cache_type);
                    }
                    return Ok(entry.data);
                }
                tracing::debug!(user = %self.uuid, contexts = %contexts, cache_type, "Dropping entry built before invalidation");
                cache.invalidate(contexts).await;
            }

            if !missed {
                self.record_miss(cache_type);
                missed = true;
            }

            let entry = cache
                .try_get_with(contexts.clone(), async {
                    // Snapshot taken before the holder's nodes are read
                    let generation = self.generation.load(Ordering::Acquire);
                    build().map(|data| Entry { generation, data })
                })
                .await
                .map_err(Error::from)?;

            if entry.generation >= generation {
                return Ok(entry.data);
            }
            tracing::debug!(user = %self.uuid, contexts = %contexts, cache_type, "Joined a build that predates invalidation, rebuilding");
            cache.invalidate(contexts).await;
        }
    }

    /// Entry for `contexts` if it is up to date with the last invalidation
    async fn current<T>(&self, cache: &Cache<Contexts, Entry<T>>, contexts: &Contexts) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let generation = self.generation.load(Ordering::Acquire);
        cache
            .get(contexts)
            .await
            .filter(|entry| entry.generation >= generation)
            .map(|entry| entry.data)
    }

    fn user(&self) -> Result<Arc<User>> {
        self.user
            .upgrade()
            .ok_or_else(|| Error::HolderUnloaded(format!("User {} is no longer loaded", self.uuid)))
    }

    fn build_permissions(&self, contexts: &Contexts) -> Result<Arc<PermissionCache>> {
        let user = self.user()?;
        let resolved = self.resolver.export_nodes(user.holder(), contexts);
        self.record_build(PERMISSIONS);
        tracing::debug!(user = %self.uuid, contexts = %contexts, "Permission cache built");
        Ok(Arc::new(PermissionCache::new(contexts.clone(), resolved)))
    }

    fn build_meta(&self, contexts: &Contexts) -> Result<Arc<MetaCache>> {
        let user = self.user()?;
        let accumulator = self.resolver.accumulate_meta(user.holder(), contexts);
        self.record_build(META);
        tracing::debug!(user = %self.uuid, contexts = %contexts, "Meta cache built");
        Ok(Arc::new(MetaCache::new(contexts.clone(), accumulator)))
    }

    fn record_hit(&self, cache_type: &str) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        metrics::cache::CACHE_HITS.with_label_values(&[cache_type]).inc();
    }

    fn record_miss(&self, cache_type: &str) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::cache::CACHE_MISSES.with_label_values(&[cache_type]).inc();
    }

    fn record_build(&self, cache_type: &str) {
        self.counters.builds.fetch_add(1, Ordering::Relaxed);
        metrics::cache::CACHE_BUILDS.with_label_values(&[cache_type]).inc();
    }

    fn record_refresh(&self, cache_type: &str) {
        self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
        metrics::cache::CACHE_REFRESHES.with_label_values(&[cache_type]).inc();
    }
}

impl std::fmt::Debug for UserData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserData")
            .field("uuid", &self.uuid)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSet;
    use crate::models::{Node, Tristate};
    use crate::test_helpers::{node, resolver, user_with};

    #[tokio::test]
    async fn test_build_then_hit() {
        let (_groups, resolver) = resolver();
        let user = user_with(&resolver, &[node("fly", true)]);
        let data = user.cached_data();

        let first = data.get_permission_data(&Contexts::allow_all()).await.unwrap();
        let second = data.get_permission_data(&Contexts::allow_all()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.check_permission("fly"), Tristate::True);
        let stats = data.stats();
        assert_eq!(stats.builds, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_distinct_contexts_get_distinct_entries() {
        let (_groups, resolver) = resolver();
        let user = user_with(
            &resolver,
            &[Node::builder("fly").server("lobby").build().unwrap()],
        );
        let lobby = Contexts::of(ContextSet::singleton("server", "lobby").unwrap());

        let global = user.cached_data().get_permission_data(&Contexts::allow_all()).await.unwrap();
        let scoped = user.cached_data().get_permission_data(&lobby).await.unwrap();

        assert_eq!(global.check_permission("fly"), Tristate::Undefined);
        assert_eq!(scoped.check_permission("fly"), Tristate::True);
        assert_eq!(user.cached_data().stats().builds, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gets_share_one_build() {
        let (_groups, resolver) = resolver();
        let user = user_with(&resolver, &[node("a.*", true)]);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let user = user.clone();
                tokio::spawn(async move {
                    user.cached_data()
                        .get_permission_data(&Contexts::allow_all())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(user.cached_data().stats().builds, 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        assert!(results.iter().all(|r| r.check_permission("a.b") == Tristate::True));
    }

    #[tokio::test]
    async fn test_stale_until_invalidated() {
        let (_groups, resolver) = resolver();
        let user = user_with(&resolver, &[node("build", true)]);
        let contexts = Contexts::allow_all();

        let before = user.cached_data().get_permission_data(&contexts).await.unwrap();
        user.set_permission(node("build", false)).unwrap();

        let cached = user.cached_data().get_permission_data(&contexts).await.unwrap();
        assert_eq!(cached.check_permission("build"), Tristate::True);

        user.invalidate_caches();
        let fresh = user.cached_data().get_permission_data(&contexts).await.unwrap();
        assert_eq!(fresh.check_permission("build"), Tristate::False);
        assert!(!Arc::ptr_eq(&before, &fresh));
    }

    /// Permission entry resolved from the user's current nodes, tagged as
    /// built under `generation`
    fn entry_now(user: &User, contexts: &Contexts, generation: u64) -> Entry<PermissionCache> {
        let resolved = user.cached_data().resolver.export_nodes(user.holder(), contexts);
        Entry {
            generation,
            data: Arc::new(PermissionCache::new(contexts.clone(), resolved)),
        }
    }

    #[tokio::test]
    async fn test_entry_stored_after_invalidation_is_rebuilt() {
        let (_groups, resolver) = resolver();
        let user = user_with(&resolver, &[node("build", true)]);
        let contexts = Contexts::allow_all();
        let data = user.cached_data();

        let stale = entry_now(&user, &contexts, data.generation.load(Ordering::Acquire));
        user.set_permission(node("build", false)).unwrap();
        user.invalidate_caches();
        // A build that started before the mutation lands after invalidate_all
        data.permissions.insert(contexts.clone(), stale).await;

        let fresh = data.get_permission_data(&contexts).await.unwrap();
        assert_eq!(fresh.check_permission("build"), Tristate::False);
        assert_eq!(data.stats().builds, 1);
        assert_eq!(
            data.recalculate_permissions_for(&contexts)
                .await
                .unwrap()
                .check_permission("build"),
            Tristate::False
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_after_invalidation_never_joins_older_build() {
        let (_groups, resolver) = resolver();
        let user = user_with(&resolver, &[node("build", true)]);
        let contexts = Contexts::allow_all();

        // Hold a build open that resolved the nodes before the mutation
        let stale = entry_now(&user, &contexts, user.cached_data().generation.load(Ordering::Acquire));
        let (started_tx, started) = tokio::sync::oneshot::channel::<()>();
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let in_flight = {
            let user = user.clone();
            let contexts = contexts.clone();
            tokio::spawn(async move {
                user.cached_data()
                    .permissions
                    .try_get_with(contexts, async move {
                        let _ = started_tx.send(());
                        let _ = released.await;
                        Ok::<_, Error>(stale)
                    })
                    .await
                    .map(|entry| entry.data.check_permission("build"))
            })
        };
        started.await.unwrap();

        user.set_permission(node("build", false)).unwrap();
        user.invalidate_caches();

        let after = {
            let user = user.clone();
            let contexts = contexts.clone();
            tokio::spawn(async move {
                user.cached_data()
                    .get_permission_data(&contexts)
                    .await
                    .map(|data| data.check_permission("build"))
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let _ = release.send(());

        assert_eq!(in_flight.await.unwrap().unwrap(), Tristate::True);
        assert_eq!(after.await.unwrap().unwrap(), Tristate::False);
        let again = user.cached_data().get_permission_data(&contexts).await.unwrap();
        assert_eq!(again.check_permission("build"), Tristate::False);
    }

    #[tokio::test]
    async fn test_recalculate_updates_handed_out_entry() {
        let (_groups, resolver) = resolver();
        let user = user_with(&resolver, &[node("build", true), Node::prefix(1, "[A] ").unwrap()]);
        let contexts = Contexts::allow_all();

        let permissions = user.cached_data().get_permission_data(&contexts).await.unwrap();
        let meta = user.cached_data().get_meta_data(&contexts).await.unwrap();

        user.set_permission(node("build", false)).unwrap();
        user.set_permission(Node::prefix(2, "[B] ").unwrap()).unwrap();
        user.cached_data().recalculate_permissions().await.unwrap();
        user.cached_data().recalculate_meta().await.unwrap();

        assert_eq!(permissions.check_permission("build"), Tristate::False);
        assert_eq!(meta.prefix().as_deref(), Some("[B] "));
        let stats = user.cached_data().stats();
        assert_eq!(stats.refreshes, 2);
        assert_eq!(stats.builds, 2);
    }

    #[tokio::test]
    async fn test_recalculate_absent_key_builds() {
        let (_groups, resolver) = resolver();
        let user = user_with(&resolver, &[node("x", true)]);

        let data = user
            .cached_data()
            .recalculate_permissions_for(&Contexts::allow_all())
            .await
            .unwrap();
        assert_eq!(data.check_permission("x"), Tristate::True);
        assert_eq!(user.cached_data().stats().refreshes, 0);
    }

    #[tokio::test]
    async fn test_build_for_dropped_user_fails_and_is_not_stored() {
        let (_groups, resolver) = resolver();
        let data = UserData::new(Uuid::new_v4(), Weak::new(), resolver, &CacheConfig::default());

        for _ in 0..2 {
            let err = data.get_permission_data(&Contexts::allow_all()).await.unwrap_err();
            assert!(matches!(err, Error::HolderUnloaded(_)));
        }
        data.cleanup().await;
        assert_eq!(data.stats().permission_entries, 0);
        assert_eq!(data.stats().builds, 0);
    }

    #[tokio::test]
    async fn test_pre_calculate_and_cleanup() {
        let (_groups, resolver) = resolver();
        let user = user_with(&resolver, &[node("x", true)]);
        let lobby = Contexts::of(ContextSet::singleton("server", "lobby").unwrap());

        user.cached_data()
            .pre_calculate_all(&[Contexts::allow_all(), lobby])
            .await
            .unwrap();
        user.cached_data().cleanup().await;

        let stats = user.cached_data().stats();
        assert_eq!(stats.permission_entries, 2);
        assert_eq!(stats.meta_entries, 2);
        assert_eq!(user.cached_data().cached_contexts().len(), 2);

        user.invalidate_caches();
        user.cached_data().cleanup().await;
        assert_eq!(user.cached_data().stats().permission_entries, 0);
    }
}
