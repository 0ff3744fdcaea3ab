//! Non-exact permission matchers: shorthand, regex and wildcard nodes.

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::models::node::{normalize_permission, wildcard_level};
use crate::resolver::ShorthandPattern;

/// How a lookup was answered, in precedence order: a lookup is decided by the
/// first kind, in declaration order of this enum, that matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Shorthand,
    Regex,
    Wildcard,
    Root,
}

/// Pattern part of a regex node (`r=<pattern>` or `R=<pattern>`)
pub(crate) fn regex_pattern(permission: &str) -> Option<&str> {
    permission
        .strip_prefix("r=")
        .or_else(|| permission.strip_prefix("R="))
}

/// A compiled pattern entry of the flattened permission table.
#[derive(Debug, Clone)]
pub enum PermissionMatcher {
    Shorthand {
        source: String,
        pattern: ShorthandPattern,
        value: bool,
    },
    Regex {
        source: String,
        regex: Regex,
        value: bool,
    },
    /// `a.b.*`: everything under `a.b.`, but not `a.b` itself
    Wildcard {
        source: String,
        prefix: String,
        depth: usize,
        value: bool,
    },
    /// `*` or `'*'`
    Root { source: String, value: bool },
}

impl PermissionMatcher {
    /// Compile a table entry, `None` for plain permissions.
    ///
    /// Invalid regex nodes are logged and ignored.
    #[must_use]
    pub fn from_entry(permission: &str, value: bool, expand_shorthand: bool) -> Option<Self> {
        let source = permission.to_string();

        if let Some(pattern) = regex_pattern(permission) {
            return match RegexBuilder::new(&format!("^(?:{pattern})$"))
                .case_insensitive(true)
                .build()
            {
                Ok(regex) => Some(Self::Regex {
                    source,
                    regex,
                    value,
                }),
                Err(e) => {
                    tracing::warn!(permission = %permission, error = %e, "Invalid regex node ignored");
                    None
                }
            };
        }

        match wildcard_level(permission) {
            Some(0) => return Some(Self::Root { source, value }),
            Some(depth) => {
                let prefix = normalize_permission(&permission[..permission.len() - 1]);
                return Some(Self::Wildcard {
                    source,
                    prefix,
                    depth,
                    value,
                });
            }
            None => {}
        }

        if expand_shorthand {
            if let Some(pattern) = ShorthandPattern::parse(permission) {
                return Some(Self::Shorthand {
                    source,
                    pattern,
                    value,
                });
            }
        }

        None
    }

    #[must_use]
    pub const fn kind(&self) -> MatchKind {
        match self {
            Self::Shorthand { .. } => MatchKind::Shorthand,
            Self::Regex { .. } => MatchKind::Regex,
            Self::Wildcard { .. } => MatchKind::Wildcard,
            Self::Root { .. } => MatchKind::Root,
        }
    }

    /// Sort key: kind first, then deeper wildcards first
    pub(crate) fn rank(&self) -> (MatchKind, std::cmp::Reverse<usize>) {
        let depth = match self {
            Self::Wildcard { depth, .. } => *depth,
            _ => 0,
        };
        (self.kind(), std::cmp::Reverse(depth))
    }

    #[must_use]
    pub const fn value(&self) -> bool {
        match self {
            Self::Shorthand { value, .. }
            | Self::Regex { value, .. }
            | Self::Wildcard { value, .. }
            | Self::Root { value, .. } => *value,
        }
    }

    /// The node permission this matcher was compiled from
    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::Shorthand { source, .. }
            | Self::Regex { source, .. }
            | Self::Wildcard { source, .. }
            | Self::Root { source, .. } => source,
        }
    }

    /// Whether the lowercase `permission` falls under this matcher
    #[must_use]
    pub fn matches(&self, permission: &str) -> bool {
        match self {
            Self::Shorthand { pattern, .. } => pattern.matches(permission),
            Self::Regex { regex, .. } => regex.is_match(permission),
            Self::Wildcard { prefix, .. } => {
                permission.len() > prefix.len() && permission.starts_with(prefix.as_str())
            }
            Self::Root { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_permission_has_no_matcher() {
        assert!(PermissionMatcher::from_entry("a.b", true, true).is_none());
    }

    #[test]
    fn test_wildcard_excludes_its_own_prefix() {
        let matcher = PermissionMatcher::from_entry("a.b.*", true, true).unwrap();
        assert_eq!(matcher.kind(), MatchKind::Wildcard);
        assert!(matcher.matches("a.b.c"));
        assert!(matcher.matches("a.b.c.d"));
        assert!(!matcher.matches("a.b"));
        assert!(!matcher.matches("a.bc"));
    }

    #[test]
    fn test_root_wildcards() {
        for root in ["*", "'*'"] {
            let matcher = PermissionMatcher::from_entry(root, false, true).unwrap();
            assert_eq!(matcher.kind(), MatchKind::Root);
            assert!(matcher.matches("anything.at.all"));
        }
    }

    #[test]
    fn test_regex_is_anchored_and_case_insensitive() {
        let matcher = PermissionMatcher::from_entry("R=worldedit\\.(copy|paste)", true, true).unwrap();
        assert_eq!(matcher.kind(), MatchKind::Regex);
        assert!(matcher.matches("worldedit.copy"));
        assert!(matcher.matches("WORLDEDIT.PASTE"));
        assert!(!matcher.matches("worldedit.copy.all"));
    }

    #[test]
    fn test_invalid_regex_is_ignored() {
        assert!(PermissionMatcher::from_entry("r=(unclosed", true, true).is_none());
    }

    #[test]
    fn test_shorthand_only_when_enabled() {
        assert!(PermissionMatcher::from_entry("a.(b|c)", true, false).is_none());
        let matcher = PermissionMatcher::from_entry("a.(b|c)", true, true).unwrap();
        assert!(matcher.matches("a.c"));
    }

    #[test]
    fn test_rank_orders_kinds_and_depth() {
        let mut matchers: Vec<_> = ["*", "a.*", "a.b.*", "r=a\\..*", "a.(b|c)"]
            .into_iter()
            .filter_map(|p| PermissionMatcher::from_entry(p, true, true))
            .collect();
        matchers.sort_by_key(PermissionMatcher::rank);

        let sources: Vec<_> = matchers.iter().map(PermissionMatcher::source).collect();
        assert_eq!(sources, vec!["a.(b|c)", "r=a\\..*", "a.b.*", "a.*", "*"]);
    }
}
