//! Logging setup shared by the fastsync binary and tests.

pub mod tracing;
