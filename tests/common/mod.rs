pub mod fixtures;
pub mod stack;

pub use fixtures::*;
pub use stack::*;
