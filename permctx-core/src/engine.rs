//! Engine facade
//!
//! Wires configuration, holder registries, the resolver and the injected
//! context calculator registry, and answers point queries for a subject.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::{PermissionCache, PermissionCheck};
use crate::config::Config;
use crate::context::{
    ContextCalculator, ContextCalculatorRegistry, Contexts, MutableContextSet, ServerCalculator,
};
use crate::manager::{GroupManager, UserManager};
use crate::models::{Tristate, User, GLOBAL};
use crate::resolver::Resolver;
use crate::{Error, Result};

/// Permission engine for subjects of type `S`.
///
/// `S` is whatever the platform hands to its context calculators (a player
/// connection, a session, ...). Point checks never fail: any error is logged
/// and reported as [`Tristate::Undefined`], leaving the fallback to the caller.
pub struct PermissionEngine<S: ?Sized> {
    config: Config,
    groups: Arc<GroupManager>,
    users: Arc<UserManager>,
    resolver: Arc<Resolver>,
    calculators: Arc<ContextCalculatorRegistry<S>>,
    /// `server=<name>`, applied on top of the injected calculators
    server: Option<ServerCalculator>,
}

impl<S: ?Sized + Send + Sync + 'static> PermissionEngine<S> {
    /// Create an engine and its default group.
    ///
    /// Unless the configured server is "global", every context calculation
    /// also carries `server=<name>`. The injected registry is left as given, so
    /// several engines may share one.
    pub fn new(config: Config, calculators: Arc<ContextCalculatorRegistry<S>>) -> Result<Self> {
        let groups = Arc::new(GroupManager::new());
        groups.get_or_make(&config.resolution.default_group)?;

        let resolver = Arc::new(Resolver::new(groups.clone(), config.resolution.clone()));
        let users = Arc::new(UserManager::new(resolver.clone(), config.cache.clone()));

        let server = config.resolution.server.trim();
        let server = (!server.is_empty() && !server.eq_ignore_ascii_case(GLOBAL))
            .then(|| ServerCalculator::new(server));

        tracing::info!(
            server = %config.resolution.server,
            default_group = %config.resolution.default_group,
            calculators = calculators.len(),
            "Permission engine initialized"
        );

        Ok(Self {
            config,
            groups,
            users,
            resolver,
            calculators,
            server,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn groups(&self) -> &Arc<GroupManager> {
        &self.groups
    }

    #[must_use]
    pub const fn users(&self) -> &Arc<UserManager> {
        &self.users
    }

    #[must_use]
    pub const fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    #[must_use]
    pub const fn calculators(&self) -> &Arc<ContextCalculatorRegistry<S>> {
        &self.calculators
    }

    /// Current contexts of `subject`, with the configured query flags
    pub fn contexts_for(&self, subject: &S) -> Result<Contexts> {
        let mut contexts = self.calculators.calculate(subject)?.to_mutable();
        if let Some(server) = &self.server {
            contexts.merge(server.give_applicable_context(subject, MutableContextSet::new())?);
        }
        Ok(Contexts::with_defaults(contexts.freeze(), &self.config.resolution))
    }

    /// Check `permission` for `user` in the contexts `subject` is currently in
    pub async fn check_permission(&self, user: &User, subject: &S, permission: &str) -> Tristate {
        match self.contexts_for(subject) {
            Ok(contexts) => self.check_permission_in(user, &contexts, permission).await,
            Err(e) => {
                tracing::warn!(user = %user.uuid(), permission = %permission, error = %e, "Permission check failed");
                Tristate::Undefined
            }
        }
    }

    /// Check `permission` for `user` under explicit `contexts`
    pub async fn check_permission_in(&self, user: &User, contexts: &Contexts, permission: &str) -> Tristate {
        self.explain_permission(user, contexts, permission)
            .await
            .map_or(Tristate::Undefined, |check| check.result)
    }

    /// Like [`Self::check_permission_in`], but reports what decided the
    /// result. `None` when the lookup failed.
    pub async fn explain_permission(
        &self,
        user: &User,
        contexts: &Contexts,
        permission: &str,
    ) -> Option<PermissionCheck> {
        match user.cached_data().get_permission_data(contexts).await {
            Ok(data) => Some(data.check_permission_detailed(permission)),
            Err(e) => {
                tracing::warn!(user = %user.uuid(), permission = %permission, error = %e, "Permission check failed");
                None
            }
        }
    }

    pub async fn meta_value(&self, user: &User, subject: &S, key: &str) -> Option<String> {
        let contexts = self.contexts_or_warn(user, subject)?;
        self.meta_or_warn(user, &contexts).await?.meta_value(key)
    }

    pub async fn prefix(&self, user: &User, subject: &S) -> Option<String> {
        let contexts = self.contexts_or_warn(user, subject)?;
        self.meta_or_warn(user, &contexts).await?.prefix()
    }

    pub async fn suffix(&self, user: &User, subject: &S) -> Option<String> {
        let contexts = self.contexts_or_warn(user, subject)?;
        self.meta_or_warn(user, &contexts).await?.suffix()
    }

    /// Resolve a group on its own, bypassing any cache
    pub fn resolve_group(&self, group: &str, contexts: &Contexts) -> Result<PermissionCache> {
        let group = self
            .groups
            .get_if_loaded(group)
            .ok_or_else(|| Error::NotFound(format!("Group '{group}' is not loaded")))?;
        let resolved = self.resolver.export_nodes(group.holder(), contexts);
        Ok(PermissionCache::new(contexts.clone(), resolved))
    }

    /// Prune expired nodes everywhere, returning how many were removed.
    ///
    /// Users are refreshed in place when a group lost nodes, since any of
    /// them may inherit it.
    pub async fn run_audit(&self) -> usize {
        let from_groups = self.groups.audit_all();
        if !from_groups.is_empty() {
            for (group, node) in &from_groups {
                tracing::info!(group = %group, node = %node, "Expired group node removed");
            }
            self.users.update_all_users().await;
        }

        let from_users = self.users.audit_all();
        for (user, node) in &from_users {
            tracing::info!(user = %user, node = %node, "Expired user node removed");
        }

        from_groups.len() + from_users.len()
    }

    /// Run pending cache maintenance for every loaded user
    pub async fn run_cleanup(&self) {
        for user in self.users.all() {
            user.cached_data().cleanup().await;
        }
    }

    /// Spawn the periodic audit and cleanup task. It stops when `token` is
    /// cancelled.
    pub fn spawn_housekeeping(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();
        let audit_every = Duration::from_secs(self.config.housekeeping.audit_interval_secs.max(1));
        let cleanup_every = Duration::from_secs(self.config.housekeeping.cleanup_interval_secs.max(1));

        tokio::spawn(async move {
            let mut audit = tokio::time::interval(audit_every);
            let mut cleanup = tokio::time::interval(cleanup_every);
            audit.set_missed_tick_behavior(MissedTickBehavior::Skip);
            cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::debug!(?audit_every, ?cleanup_every, "Housekeeping started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = audit.tick() => {
                        let removed = engine.run_audit().await;
                        if removed > 0 {
                            tracing::debug!(removed, "Expired nodes audited");
                        }
                    }
                    _ = cleanup.tick() => engine.run_cleanup().await,
                }
            }
            tracing::debug!("Housekeeping stopped");
        })
    }

    fn contexts_or_warn(&self, user: &User, subject: &S) -> Option<Contexts> {
        self.contexts_for(subject)
            .map_err(|e| {
                tracing::warn!(user = %user.uuid(), error = %e, "Context calculation failed");
            })
            .ok()
    }

    async fn meta_or_warn(&self, user: &User, contexts: &Contexts) -> Option<Arc<crate::cache::MetaCache>> {
        user.cached_data()
            .get_meta_data(contexts)
            .await
            .map_err(|e| {
                tracing::warn!(user = %user.uuid(), error = %e, "Meta lookup failed");
            })
            .ok()
    }
}

impl<S: ?Sized> std::fmt::Debug for PermissionEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionEngine")
            .field("groups", &self.groups.len())
            .field("users", &self.users.len())
            .field("calculators", &self.calculators.len())
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}
