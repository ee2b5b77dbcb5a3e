pub mod base;
pub mod dialect;
pub mod memory;
pub mod warehouse;

pub use base::{SwapOutcome, TableKind, Target};
