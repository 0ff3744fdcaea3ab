pub mod group;
pub mod holder;
pub mod node;
pub mod tristate;
pub mod user;

pub use group::Group;
pub use holder::{HolderId, PermissionHolder, TemporaryMergeBehaviour};
pub use node::{Node, NodeBuilder, NodeKind, NodeModel, GLOBAL};
pub use tristate::Tristate;
pub use user::User;
