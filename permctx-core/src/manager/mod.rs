//! Registries of loaded holders

pub mod group_manager;
pub mod user_manager;

pub use group_manager::GroupManager;
pub use user_manager::UserManager;
