//! Nodes: single permission or metadata grants.
//!
//! A node is a dotted permission string with a boolean value, an optional
//! context restriction and an optional expiry. Some permission strings carry
//! structure and are parsed into a [`NodeKind`]:
//!
//! - `group.<name>` is an inheritance edge, not a literal flag
//! - `prefix.<priority>.<text>` / `suffix.<priority>.<text>`
//! - `meta.<key>.<value>`
//! - `weight.<n>` (group weight)

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{ContextSet, MutableContextSet, SERVER_KEY, WORLD_KEY};
use crate::validation::{validate_group_name, validate_permission, ValidationError};
use crate::{Error, Result};

/// Value of `server` / `world` in the persisted shape when unrestricted
pub const GLOBAL: &str = "global";

const GROUP_PREFIX: &str = "group.";
const PREFIX_PREFIX: &str = "prefix.";
const SUFFIX_PREFIX: &str = "suffix.";
const META_PREFIX: &str = "meta.";
const WEIGHT_PREFIX: &str = "weight.";

/// Structured meaning of a node's permission string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Permission,
    Inheritance { group: String },
    Prefix { priority: i32, text: String },
    Suffix { priority: i32, text: String },
    Meta { key: String, value: String },
    Weight(i32),
}

impl NodeKind {
    fn parse(permission: &str) -> Self {
        if let Some(group) = strip_header(permission, GROUP_PREFIX) {
            if !group.is_empty() {
                return Self::Inheritance {
                    group: group.to_ascii_lowercase(),
                };
            }
        }

        // Text after the header keeps its original case
        if let Some(rest) = strip_header(permission, PREFIX_PREFIX) {
            if let Some((priority, text)) = split_priority(rest) {
                return Self::Prefix { priority, text };
            }
        }
        if let Some(rest) = strip_header(permission, SUFFIX_PREFIX) {
            if let Some((priority, text)) = split_priority(rest) {
                return Self::Suffix { priority, text };
            }
        }
        if let Some(rest) = strip_header(permission, META_PREFIX) {
            if let Some((key, value)) = rest.split_once('.') {
                if !key.is_empty() && !value.is_empty() {
                    return Self::Meta {
                        key: normalize_permission(key),
                        value: value.to_string(),
                    };
                }
            }
        }
        if let Some(weight) = strip_header(permission, WEIGHT_PREFIX) {
            if let Ok(weight) = weight.parse() {
                return Self::Weight(weight);
            }
        }

        Self::Permission
    }
}

/// Remainder of `permission` after an ASCII `header`, matched ignoring case
fn strip_header<'a>(permission: &'a str, header: &str) -> Option<&'a str> {
    let head = permission.get(..header.len())?;
    head.eq_ignore_ascii_case(header)
        .then(|| &permission[header.len()..])
}

/// Case folding applied to a permission wherever it is stored or looked up
#[must_use]
pub fn normalize_permission(permission: &str) -> String {
    permission.to_lowercase()
}

fn split_priority(rest: &str) -> Option<(i32, String)> {
    let (priority, text) = rest.split_once('.')?;
    Some((priority.parse().ok()?, text.to_string()))
}

/// A single stored grant.
///
/// Identity (`PartialEq`, `Hash`) covers the permission string (case
/// insensitive) and the full context set. Value and expiry are deliberately
/// left out: setting a node with the same identity replaces the old one.
#[derive(Debug, Clone)]
pub struct Node {
    permission: String,
    value: bool,
    contexts: ContextSet,
    expiry: Option<DateTime<Utc>>,
    kind: NodeKind,
}

impl Node {
    #[must_use]
    pub fn builder(permission: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(permission)
    }

    /// Global, permanent node
    pub fn new(permission: impl Into<String>, value: bool) -> Result<Self> {
        Self::builder(permission).value(value).build()
    }

    /// `group.<name>` inheritance node
    pub fn inheritance(group: &str) -> Result<Self> {
        let group = group.to_ascii_lowercase();
        validate_group_name(&group)?;
        Self::new(format!("{GROUP_PREFIX}{group}"), true)
    }

    pub fn prefix(priority: i32, text: &str) -> Result<Self> {
        Self::new(format!("{PREFIX_PREFIX}{priority}.{text}"), true)
    }

    pub fn suffix(priority: i32, text: &str) -> Result<Self> {
        Self::new(format!("{SUFFIX_PREFIX}{priority}.{text}"), true)
    }

    pub fn meta(key: &str, value: &str) -> Result<Self> {
        if key.is_empty() || key.contains('.') {
            return Err(Error::InvalidInput(format!("Invalid meta key: '{key}'")));
        }
        Self::new(format!("{META_PREFIX}{key}.{value}"), true)
    }

    pub fn weight(weight: i32) -> Result<Self> {
        Self::new(format!("{WEIGHT_PREFIX}{weight}"), true)
    }

    #[must_use]
    pub fn permission(&self) -> &str {
        &self.permission
    }

    #[must_use]
    pub const fn value(&self) -> bool {
        self.value
    }

    #[must_use]
    pub const fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    #[must_use]
    pub const fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    #[must_use]
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Copy of this node with another value
    #[must_use]
    pub fn with_value(&self, value: bool) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }

    /// Copy of this node with another expiry
    #[must_use]
    pub fn with_expiry(&self, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            expiry,
            ..self.clone()
        }
    }

    #[must_use]
    pub const fn is_group_node(&self) -> bool {
        matches!(self.kind, NodeKind::Inheritance { .. })
    }

    /// Lowercase group name for inheritance nodes
    #[must_use]
    pub fn group_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Inheritance { group } => Some(group),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        self.expiry.is_some()
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.expiry.is_none()
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.wildcard_level().is_some()
    }

    /// Number of dotted segments before the `*`: `a.b.*` is 2, `*` is 0
    #[must_use]
    pub fn wildcard_level(&self) -> Option<usize> {
        wildcard_level(&self.permission)
    }

    /// Same identity, value and expiry
    #[must_use]
    pub fn full_eq(&self, other: &Self) -> bool {
        self == other && self.value == other.value && self.expiry == other.expiry
    }

    /// Lowercased permission used as the dedup / lookup key
    #[must_use]
    pub fn key(&self) -> String {
        normalize_permission(&self.permission)
    }

    /// Flat persisted shape
    #[must_use]
    pub fn to_model(&self) -> NodeModel {
        let mut rest = self.contexts.to_mutable();

        let server = self.contexts.single_value(SERVER_KEY).map(str::to_string);
        if server.is_some() {
            rest.remove_all(SERVER_KEY);
        }
        let world = self.contexts.single_value(WORLD_KEY).map(str::to_string);
        if world.is_some() {
            rest.remove_all(WORLD_KEY);
        }

        NodeModel {
            permission: self.permission.clone(),
            value: self.value,
            server: server.unwrap_or_else(|| GLOBAL.to_string()),
            world: world.unwrap_or_else(|| GLOBAL.to_string()),
            expiry: self.expiry.map_or(0, |e| e.timestamp()),
            contexts: rest.freeze().to_multimap(),
        }
    }

    pub fn from_model(model: &NodeModel) -> Result<Self> {
        let mut builder = Self::builder(model.permission.clone()).value(model.value);

        if !model.server.eq_ignore_ascii_case(GLOBAL) {
            builder = builder.context(SERVER_KEY, &model.server);
        }
        if !model.world.eq_ignore_ascii_case(GLOBAL) {
            builder = builder.context(WORLD_KEY, &model.world);
        }
        for (key, values) in &model.contexts {
            for value in values {
                builder = builder.context(key, value);
            }
        }
        if model.expiry != 0 {
            let expiry = DateTime::from_timestamp(model.expiry, 0).ok_or_else(|| {
                Error::InvalidInput(format!("Invalid expiry timestamp: {}", model.expiry))
            })?;
            builder = builder.expiry(expiry);
        }

        builder.build()
    }
}

pub(crate) fn wildcard_level(permission: &str) -> Option<usize> {
    if permission == "*" || permission == "'*'" {
        return Some(0);
    }
    let prefix = permission.strip_suffix(".*")?;
    if prefix.is_empty() {
        return None;
    }
    Some(prefix.split('.').count())
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.contexts == other.contexts && self.key() == other.key()
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
        self.contexts.hash(state);
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.permission, self.value)?;
        if !self.contexts.is_empty() {
            write!(f, " [{}]", self.contexts)?;
        }
        if let Some(expiry) = self.expiry {
            write!(f, " (expires {})", expiry.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Builder for [`Node`]. Context errors are kept until `build`.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    permission: String,
    value: bool,
    contexts: MutableContextSet,
    expiry: Option<DateTime<Utc>>,
    error: Option<ValidationError>,
}

impl NodeBuilder {
    fn new(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            value: true,
            contexts: MutableContextSet::new(),
            expiry: None,
            error: None,
        }
    }

    #[must_use]
    pub const fn value(mut self, value: bool) -> Self {
        self.value = value;
        self
    }

    #[must_use]
    pub fn context(mut self, key: &str, value: &str) -> Self {
        if let Err(e) = self.contexts.add(key, value) {
            self.error.get_or_insert(e);
        }
        self
    }

    #[must_use]
    pub fn contexts(mut self, contexts: &ContextSet) -> Self {
        self.contexts.add_all(contexts);
        self
    }

    #[must_use]
    pub fn server(self, server: &str) -> Self {
        self.context(SERVER_KEY, server)
    }

    #[must_use]
    pub fn world(self, world: &str) -> Self {
        self.context(WORLD_KEY, world)
    }

    #[must_use]
    pub const fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Expire `duration` from now
    #[must_use]
    pub fn expire_after(self, duration: Duration) -> Self {
        self.expiry(Utc::now() + duration)
    }

    pub fn build(self) -> Result<Node> {
        if let Some(e) = self.error {
            return Err(e.into());
        }
        validate_permission(&self.permission)?;

        let kind = NodeKind::parse(&self.permission);
        if let NodeKind::Inheritance { group } = &kind {
            validate_group_name(group)?;
        }

        Ok(Node {
            permission: self.permission,
            value: self.value,
            contexts: self.contexts.freeze(),
            expiry: self.expiry,
            kind,
        })
    }
}

/// Persisted node shape: `{ permission, value, server, world, expiry, contexts }`.
///
/// `server` and `world` are `"global"` when unrestricted, `expiry` is Unix
/// seconds with `0` meaning permanent, and `contexts` holds any other pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeModel {
    pub permission: String,
    pub value: bool,
    #[serde(default = "global")]
    pub server: String,
    #[serde(default = "global")]
    pub world: String,
    #[serde(default)]
    pub expiry: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contexts: BTreeMap<String, Vec<String>>,
}

fn global() -> String {
    GLOBAL.to_string()
}
