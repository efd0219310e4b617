pub mod collector;
pub mod types;

pub use collector::*;
pub use types::*;
