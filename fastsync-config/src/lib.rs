//! Configuration management for fastsync.
//!
//! Provides environment detection, loading of tap and target configuration files with
//! environment variable overrides, secret handling and the typed configuration shared by
//! the fastsync library and binary.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
