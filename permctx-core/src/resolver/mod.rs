//! Inheritance resolution
//!
//! Walks a holder and the groups it inherits, in precedence order, and turns
//! the applicable nodes into a flat permission table or accumulated metadata.
//!
//! Precedence, highest first:
//! 1. the holder's own nodes (more specific contexts first, temporary before
//!    permanent, then declaration order)
//! 2. inherited groups, depth first, siblings ordered by weight
//!
//! The first node seen for a permission wins.

pub mod meta;
pub mod shorthand;
pub mod weight;

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use meta::MetaAccumulator;
pub use shorthand::ShorthandPattern;
pub use weight::{compare_weight, WeightedGroups};

use crate::cache::matcher::regex_pattern;
use crate::config::ResolutionConfig;
use crate::context::Contexts;
use crate::manager::GroupManager;
use crate::metrics;
use crate::models::{Group, HolderId, Node, PermissionHolder};

/// Applicable nodes of a holder and everything it inherits, highest priority
/// first, one node per permission.
#[derive(Debug, Clone, Default)]
pub struct ResolvedNodes {
    nodes: Vec<Node>,
    permissions: HashMap<String, bool>,
}

impl ResolvedNodes {
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Flattened `lowercase permission -> value` table
    #[must_use]
    pub const fn permissions(&self) -> &HashMap<String, bool> {
        &self.permissions
    }

    #[must_use]
    pub fn into_permissions(self) -> HashMap<String, bool> {
        self.permissions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// One visited holder with its applicable own nodes
struct Visited {
    id: HolderId,
    nodes: Vec<Node>,
}

/// Resolves holders against the loaded groups.
#[derive(Debug)]
pub struct Resolver {
    groups: Arc<GroupManager>,
    config: ResolutionConfig,
}

impl Resolver {
    #[must_use]
    pub const fn new(groups: Arc<GroupManager>, config: ResolutionConfig) -> Self {
        Self { groups, config }
    }

    #[must_use]
    pub const fn groups(&self) -> &Arc<GroupManager> {
        &self.groups
    }

    #[must_use]
    pub const fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// Resolve `holder` into its ordered, deduplicated node list and flat
    /// permission table.
    pub fn export_nodes(&self, holder: &PermissionHolder, contexts: &Contexts) -> ResolvedNodes {
        let span = resolution_span("permissions", holder, contexts);
        let _entered = span.enter();
        let _timer = metrics::resolution::RESOLUTION_DURATION
            .with_label_values(&["permissions"])
            .start_timer();
        metrics::resolution::RESOLUTIONS_TOTAL
            .with_label_values(&["permissions"])
            .inc();

        let mut seen = HashSet::new();
        let mut resolved = ResolvedNodes::default();
        for node in self.walk(holder, contexts).into_iter().flat_map(|v| v.nodes) {
            let key = node.key();
            if seen.insert(key.clone()) {
                resolved.permissions.insert(key, node.value());
                resolved.nodes.push(node);
            }
        }

        if contexts.expand_shorthand() {
            let expanded: Vec<(String, bool)> = resolved
                .nodes
                .iter()
                .filter(|n| regex_pattern(n.permission()).is_none())
                .filter_map(|n| {
                    let pattern = ShorthandPattern::parse(n.permission())?;
                    Some(pattern.expand()?.into_iter().map(|p| (p, n.value())).collect::<Vec<_>>())
                })
                .flatten()
                .collect();
            for (permission, value) in expanded {
                resolved.permissions.entry(permission).or_insert(value);
            }
        }

        span.record("nodes", resolved.nodes.len());
        span.record("permissions", resolved.permissions.len());
        resolved
    }

    /// Accumulate metadata for `holder` in resolution order
    pub fn accumulate_meta(&self, holder: &PermissionHolder, contexts: &Contexts) -> MetaAccumulator {
        let span = resolution_span("meta", holder, contexts);
        let _entered = span.enter();
        let _timer = metrics::resolution::RESOLUTION_DURATION
            .with_label_values(&["meta"])
            .start_timer();
        metrics::resolution::RESOLUTIONS_TOTAL
            .with_label_values(&["meta"])
            .inc();

        let mut accumulator = MetaAccumulator::new();
        let mut nodes = 0_usize;
        for node in self.walk(holder, contexts).iter().flat_map(|v| v.nodes.iter()) {
            accumulator.accumulate(node);
            nodes += 1;
        }
        span.record("nodes", nodes);
        accumulator
    }

    /// Names of the groups `holder` inherits under `contexts`, in precedence
    /// order
    pub fn inherited_groups(&self, holder: &PermissionHolder, contexts: &Contexts) -> Vec<String> {
        self.walk(holder, contexts)
            .into_iter()
            .skip(1)
            .filter_map(|v| match v.id {
                HolderId::Group(name) => Some(name),
                HolderId::User(_) => None,
            })
            .collect()
    }

    fn walk(&self, root: &PermissionHolder, contexts: &Contexts) -> Vec<Visited> {
        let mut visited = HashSet::new();
        if let HolderId::Group(name) = root.id() {
            visited.insert(name.clone());
        }

        let mut out = Vec::new();
        self.visit(root, contexts, Utc::now(), 0, &mut visited, &mut out);
        out
    }

    fn visit(
        &self,
        holder: &PermissionHolder,
        contexts: &Contexts,
        now: DateTime<Utc>,
        depth: usize,
        visited: &mut HashSet<String>,
        out: &mut Vec<Visited>,
    ) {
        let nodes = applicable_nodes(holder, contexts, now);
        let parents = if contexts.apply_groups() {
            self.parents(holder, &nodes)
        } else {
            Vec::new()
        };
        out.push(Visited {
            id: holder.id().clone(),
            nodes,
        });

        if parents.is_empty() {
            return;
        }
        if depth >= self.config.max_inheritance_depth {
            tracing::warn!(
                holder = %holder.id(),
                depth,
                "Inheritance depth limit reached, not following further groups"
            );
            return;
        }

        for group in parents {
            if !visited.insert(group.name().to_string()) {
                tracing::debug!(
                    holder = %holder.id(),
                    group = %group.name(),
                    "Group already visited, skipping"
                );
                metrics::resolution::INHERITANCE_CYCLES.inc();
                continue;
            }
            self.visit(group.holder(), contexts, now, depth + 1, visited, out);
        }
    }

    /// Loaded groups named by the applicable `group.<name>` nodes, highest
    /// weight first
    fn parents(&self, holder: &PermissionHolder, nodes: &[Node]) -> Vec<Arc<Group>> {
        let mut named = HashSet::new();
        let mut weighted = WeightedGroups::new();

        for name in nodes
            .iter()
            .filter(|n| n.value())
            .filter_map(Node::group_name)
        {
            if !named.insert(name) {
                continue;
            }
            match self.groups.get_if_loaded(name) {
                Some(group) => {
                    weighted.insert(group.weight(self.config.default_group_weight), group);
                }
                None => {
                    tracing::warn!(
                        holder = %holder.id(),
                        group = %name,
                        "Inherited group is not loaded"
                    );
                    metrics::resolution::MISSING_GROUPS.inc();
                }
            }
        }

        weighted.into_precedence_order()
    }
}

/// Span around one resolution. Warnings raised while walking (missing groups,
/// depth limit) inherit its holder and contexts fields.
fn resolution_span(kind: &'static str, holder: &PermissionHolder, contexts: &Contexts) -> tracing::Span {
    tracing::debug_span!(
        "resolve",
        kind,
        holder = %holder.id(),
        contexts = %contexts,
        nodes = tracing::field::Empty,
        permissions = tracing::field::Empty,
    )
}

/// Own nodes of `holder` that apply under `contexts`, in precedence order
fn applicable_nodes(holder: &PermissionHolder, contexts: &Contexts, now: DateTime<Utc>) -> Vec<Node> {
    let mut nodes: Vec<Node> = holder
        .all_nodes()
        .into_iter()
        .filter(|n| !n.is_expired_at(now))
        .filter(|n| contexts.include_global() || !n.contexts().is_empty())
        .filter(|n| n.contexts().is_satisfied_by(contexts.contexts()))
        .collect();

    // Stable: equal keys keep transient-then-persisted declaration order
    nodes.sort_by_key(|n| (Reverse(n.contexts().len()), n.is_permanent()));
    nodes
}
