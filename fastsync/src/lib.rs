pub mod bookmark;
pub mod error;
mod macros;
pub mod obfuscation;
pub mod runner;
pub mod schema;
pub mod source;
pub mod state;
pub mod sync;
pub mod table;
pub mod target;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
