use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::Contexts;
use crate::resolver::MetaAccumulator;

/// Resolved metadata for one subject under one [`Contexts`].
///
/// Refreshed in place like [`super::PermissionCache`].
#[derive(Debug)]
pub struct MetaCache {
    contexts: Contexts,
    state: RwLock<Arc<MetaAccumulator>>,
}

impl MetaCache {
    #[must_use]
    pub fn new(contexts: Contexts, accumulator: MetaAccumulator) -> Self {
        Self {
            contexts,
            state: RwLock::new(Arc::new(accumulator)),
        }
    }

    #[must_use]
    pub const fn contexts(&self) -> &Contexts {
        &self.contexts
    }

    #[must_use]
    pub fn meta_value(&self, key: &str) -> Option<String> {
        self.state.read().meta_value(key).map(str::to_string)
    }

    #[must_use]
    pub fn prefix(&self) -> Option<String> {
        self.state.read().prefix().map(str::to_string)
    }

    #[must_use]
    pub fn suffix(&self) -> Option<String> {
        self.state.read().suffix().map(str::to_string)
    }

    #[must_use]
    pub fn prefixes(&self) -> BTreeMap<i32, String> {
        self.state.read().prefixes().clone()
    }

    #[must_use]
    pub fn suffixes(&self) -> BTreeMap<i32, String> {
        self.state.read().suffixes().clone()
    }

    #[must_use]
    pub fn meta_map(&self) -> HashMap<String, String> {
        self.state.read().meta().clone()
    }

    #[must_use]
    pub fn weight(&self) -> Option<i32> {
        self.state.read().weight()
    }

    /// Current accumulated state
    #[must_use]
    pub fn snapshot(&self) -> Arc<MetaAccumulator> {
        self.state.read().clone()
    }

    pub fn refresh(&self, accumulator: MetaAccumulator) {
        *self.state.write() = Arc::new(accumulator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Node;

    #[test]
    fn test_refresh_in_place() {
        let mut first = MetaAccumulator::new();
        first.accumulate(&Node::prefix(1, "[A] ").unwrap());
        let cache = Arc::new(MetaCache::new(Contexts::allow_all(), first));
        let handed_out = cache.clone();
        assert_eq!(handed_out.prefix().as_deref(), Some("[A] "));

        let mut second = MetaAccumulator::new();
        second.accumulate(&Node::prefix(1, "[B] ").unwrap());
        second.accumulate(&Node::meta("rank", "2").unwrap());
        cache.refresh(second);

        assert_eq!(handed_out.prefix().as_deref(), Some("[B] "));
        assert_eq!(handed_out.meta_value("rank").as_deref(), Some("2"));
    }
}
