//! Resolved permission table for one subject under one [`Contexts`].

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use super::matcher::{MatchKind, PermissionMatcher};
use crate::context::Contexts;
use crate::models::node::normalize_permission;
use crate::models::Tristate;
use crate::resolver::ResolvedNodes;

/// Outcome of one lookup, with what decided it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionCheck {
    pub result: Tristate,
    pub matched_by: Option<MatchKind>,
    /// Node permission that decided the lookup
    pub source: Option<String>,
}

impl PermissionCheck {
    const fn undefined() -> Self {
        Self {
            result: Tristate::Undefined,
            matched_by: None,
            source: None,
        }
    }
}

#[derive(Debug)]
struct CalculatorState {
    permissions: HashMap<String, bool>,
    matchers: Vec<PermissionMatcher>,
    lookups: DashMap<String, PermissionCheck>,
}

impl CalculatorState {
    fn new(resolved: ResolvedNodes, expand_shorthand: bool) -> Self {
        let mut matchers: Vec<PermissionMatcher> = resolved
            .nodes()
            .iter()
            .filter_map(|n| PermissionMatcher::from_entry(n.permission(), n.value(), expand_shorthand))
            .collect();
        matchers.sort_by_key(PermissionMatcher::rank);

        Self {
            permissions: resolved.into_permissions(),
            matchers,
            lookups: DashMap::new(),
        }
    }

    fn lookup(&self, permission: &str) -> PermissionCheck {
        if let Some(hit) = self.lookups.get(permission) {
            return hit.clone();
        }

        let check = self.compute(permission);
        self.lookups.insert(permission.to_string(), check.clone());
        check
    }

    fn compute(&self, permission: &str) -> PermissionCheck {
        if let Some(value) = self.permissions.get(permission) {
            return PermissionCheck {
                result: Tristate::from_bool(*value),
                matched_by: Some(MatchKind::Exact),
                source: Some(permission.to_string()),
            };
        }

        self.matchers
            .iter()
            .find(|m| m.matches(permission))
            .map_or_else(PermissionCheck::undefined, |m| PermissionCheck {
                result: Tristate::from_bool(m.value()),
                matched_by: Some(m.kind()),
                source: Some(m.source().to_string()),
            })
    }
}

/// Flattened permission table plus compiled matchers.
///
/// Handed out as `Arc<PermissionCache>`; a refresh swaps the inner state so
/// every holder of the `Arc` sees the new data.
#[derive(Debug)]
pub struct PermissionCache {
    contexts: Contexts,
    state: RwLock<Arc<CalculatorState>>,
    checked: DashMap<String, u64>,
}

impl PermissionCache {
    #[must_use]
    pub fn new(contexts: Contexts, resolved: ResolvedNodes) -> Self {
        let state = CalculatorState::new(resolved, contexts.expand_shorthand());
        Self {
            contexts,
            state: RwLock::new(Arc::new(state)),
            checked: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn contexts(&self) -> &Contexts {
        &self.contexts
    }

    /// Look up `permission` (case-insensitive)
    pub fn check_permission(&self, permission: &str) -> Tristate {
        self.check_permission_detailed(permission).result
    }

    pub fn check_permission_detailed(&self, permission: &str) -> PermissionCheck {
        let permission = normalize_permission(permission.trim());
        *self.checked.entry(permission.clone()).or_insert(0) += 1;

        let state = self.state.read().clone();
        state.lookup(&permission)
    }

    /// Copy of the flattened table
    #[must_use]
    pub fn permission_map(&self) -> HashMap<String, bool> {
        self.state.read().permissions.clone()
    }

    /// Replace the table with a fresh resolution, keeping this `Arc` alive
    pub fn refresh(&self, resolved: ResolvedNodes) {
        let state = CalculatorState::new(resolved, self.contexts.expand_shorthand());
        *self.state.write() = Arc::new(state);
    }

    /// Forget memoised lookups; the table itself is untouched
    pub fn invalidate_lookups(&self) {
        self.state.read().lookups.clear();
    }

    /// Every permission looked up so far with its lookup count, most
    /// frequent first
    #[must_use]
    pub fn checked_permissions(&self) -> Vec<(String, u64)> {
        let mut checked: Vec<(String, u64)> = self
            .checked
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        checked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        checked
    }
}
