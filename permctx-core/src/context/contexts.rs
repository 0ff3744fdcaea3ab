use std::fmt;

use serde::{Deserialize, Serialize};

use super::ContextSet;
use crate::config::ResolutionConfig;

/// A resolved query: the active context set plus resolution flags.
///
/// This is the key of the per-subject caches, so two requests with equal
/// `Contexts` always share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contexts {
    contexts: ContextSet,
    /// Whether nodes without any context restriction apply
    include_global: bool,
    /// Whether `group.<name>` nodes are followed
    apply_groups: bool,
    /// Whether shorthand nodes such as `a.(b|c)` are expanded
    expand_shorthand: bool,
}

impl Contexts {
    #[must_use]
    pub const fn new(
        contexts: ContextSet,
        include_global: bool,
        apply_groups: bool,
        expand_shorthand: bool,
    ) -> Self {
        Self {
            contexts,
            include_global,
            apply_groups,
            expand_shorthand,
        }
    }

    /// Every flag on, for the given context set
    #[must_use]
    pub const fn of(contexts: ContextSet) -> Self {
        Self::new(contexts, true, true, true)
    }

    /// No context restriction and every flag on
    #[must_use]
    pub fn allow_all() -> Self {
        Self::of(ContextSet::empty())
    }

    /// Flags taken from configuration
    #[must_use]
    pub const fn with_defaults(contexts: ContextSet, config: &ResolutionConfig) -> Self {
        Self::new(
            contexts,
            config.include_global,
            config.apply_groups,
            config.expand_shorthand,
        )
    }

    #[must_use]
    pub const fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    #[must_use]
    pub const fn include_global(&self) -> bool {
        self.include_global
    }

    #[must_use]
    pub const fn apply_groups(&self) -> bool {
        self.apply_groups
    }

    #[must_use]
    pub const fn expand_shorthand(&self) -> bool {
        self.expand_shorthand
    }

    #[must_use]
    pub fn with_include_global(mut self, include_global: bool) -> Self {
        self.include_global = include_global;
        self
    }

    #[must_use]
    pub fn with_apply_groups(mut self, apply_groups: bool) -> Self {
        self.apply_groups = apply_groups;
        self
    }

    #[must_use]
    pub fn with_expand_shorthand(mut self, expand_shorthand: bool) -> Self {
        self.expand_shorthand = expand_shorthand;
        self
    }
}

impl fmt::Display for Contexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] global={} groups={} shorthand={}",
            self.contexts, self.include_global, self.apply_groups, self.expand_shorthand
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equal_requests_hash_equal() {
        let a = Contexts::of(ContextSet::from_pairs([("server", "s1"), ("world", "w")]).unwrap());
        let b = Contexts::of(ContextSet::from_pairs([("world", "w"), ("server", "s1")]).unwrap());

        let mut keys = HashSet::new();
        keys.insert(a);
        assert!(keys.contains(&b));
    }

    #[test]
    fn test_flags_are_part_of_the_key() {
        let base = Contexts::allow_all();
        assert_ne!(base, base.clone().with_apply_groups(false));
        assert_ne!(base, base.clone().with_include_global(false));
        assert_ne!(base, base.clone().with_expand_shorthand(false));
    }
}
