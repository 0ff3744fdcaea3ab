pub mod contexts;
pub mod registry;
pub mod set;

pub use contexts::Contexts;
pub use registry::{ContextCalculator, ContextCalculatorRegistry, ServerCalculator};
pub use set::{ContextSet, MutableContextSet, SERVER_KEY, WORLD_KEY};
