//! Derived, disposable permission state
//!
//! Nothing here is a source of truth: every entry can be dropped and rebuilt
//! from the holders at any time.

pub mod matcher;
pub mod meta_cache;
pub mod permission_cache;
pub mod user_data;

pub use matcher::{MatchKind, PermissionMatcher};
pub use meta_cache::MetaCache;
pub use permission_cache::{PermissionCache, PermissionCheck};
pub use user_data::{CacheStats, UserData};
