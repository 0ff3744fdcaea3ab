use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resolution: ResolutionConfig,
    pub cache: CacheConfig,
    pub housekeeping: HousekeepingConfig,
    pub logging: LoggingConfig,
}

/// Inheritance and lookup policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Weight of groups without a `weight.<n>` node
    pub default_group_weight: i32,
    /// Deepest inheritance chain followed before giving up
    pub max_inheritance_depth: usize,
    /// Group every user falls back to
    pub default_group: String,
    /// Name of this server; contributed as `server=<name>` unless "global"
    pub server: String,
    pub include_global: bool,
    pub apply_groups: bool,
    pub expand_shorthand: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            default_group_weight: 0,
            max_inheritance_depth: 32,
            default_group: "default".to_string(),
            server: "global".to_string(),
            include_global: true,
            apply_groups: true,
            expand_shorthand: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries unused for this long are evicted
    pub idle_expiry_secs: u64,
    /// Maximum cached context combinations per subject and cache kind
    pub max_contexts_per_subject: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_expiry_secs: 600,
            max_contexts_per_subject: 256,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn idle_expiry(&self) -> Duration {
        Duration::from_secs(self.idle_expiry_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    /// How often expired temporary nodes are pruned
    pub audit_interval_secs: u64,
    /// How often cache maintenance runs
    pub cleanup_interval_secs: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            audit_interval_secs: 3,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
    /// Emit a timed event when each `resolve` span (holder, contexts, node
    /// counts) closes
    pub resolution_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
            resolution_spans: false,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // PERMCTX_RESOLUTION__DEFAULT_GROUP_WEIGHT, PERMCTX_CACHE__IDLE_EXPIRY_SECS, ...
        builder = builder.add_source(
            Environment::with_prefix("PERMCTX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}
