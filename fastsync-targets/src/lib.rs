//! Warehouse targets for fastsync.
//!
//! Each target pairs a [`fastsync::target::dialect::Dialect`] with a client executing its SQL
//! and an [`stage::ObjectStoreStage`] holding exports while the warehouse bulk loads them.

#[cfg(feature = "bigquery")]
pub mod bigquery;
pub mod encryption;
#[cfg(feature = "redshift")]
pub mod redshift;
#[cfg(any(feature = "redshift", feature = "snowflake"))]
mod s3;
#[cfg(feature = "snowflake")]
pub mod snowflake;
pub mod stage;

#[cfg(any(feature = "redshift", feature = "snowflake"))]
pub use s3::s3_stage;
