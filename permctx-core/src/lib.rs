pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod resolver;
pub mod validation;

#[cfg(test)]
pub mod test_helpers;

pub use cache::{PermissionCache, UserData};
pub use config::Config;
pub use context::{ContextCalculator, ContextCalculatorRegistry, ContextSet, Contexts, MutableContextSet};
pub use engine::PermissionEngine;
pub use error::{Error, Result};
pub use models::{Group, Node, PermissionHolder, Tristate, User};
