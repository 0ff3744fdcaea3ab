use std::ops::Deref;

use chrono::Utc;

use super::{HolderId, NodeKind, PermissionHolder};
use crate::validation::validate_group_name;
use crate::Result;

/// A named permission group.
///
/// Dereferences to its [`PermissionHolder`] for node access.
#[derive(Debug)]
pub struct Group {
    name: String,
    holder: PermissionHolder,
}

impl Group {
    /// Create an empty group. The name is stored lowercase.
    pub fn new(name: &str) -> Result<Self> {
        validate_group_name(name)?;
        let name = name.to_ascii_lowercase();
        Ok(Self {
            holder: PermissionHolder::new(HolderId::Group(name.clone())),
            name,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn holder(&self) -> &PermissionHolder {
        &self.holder
    }

    /// Weight declared by the group's own global `weight.<n>` nodes.
    ///
    /// The highest declared weight wins; `None` when the group declares none.
    #[must_use]
    pub fn declared_weight(&self) -> Option<i32> {
        let now = Utc::now();
        self.holder
            .nodes()
            .iter()
            .filter(|n| n.value() && n.contexts().is_empty() && !n.is_expired_at(now))
            .filter_map(|n| match n.kind() {
                NodeKind::Weight(weight) => Some(*weight),
                _ => None,
            })
            .max()
    }

    /// Effective weight, falling back to `default_weight`
    #[must_use]
    pub fn weight(&self, default_weight: i32) -> i32 {
        self.declared_weight().unwrap_or(default_weight)
    }
}

impl Deref for Group {
    type Target = PermissionHolder;

    fn deref(&self) -> &Self::Target {
        &self.holder
    }
}
