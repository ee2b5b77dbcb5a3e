//! Test doubles for running table syncs without databases or warehouses.
//!
//! [`source::MemorySource`] serves tables from memory, [`query_client::RecordingQueryClient`]
//! records the SQL a [`crate::target::warehouse::WarehouseTarget`] would run and
//! [`stage::LocalStage`] stages exports in a local directory.
pub mod query_client;
pub mod source;
pub mod stage;
