#![allow(dead_code)]

use fastsync::state::{StateFile, new_state_lock};
use fastsync::sync::SyncContext;
use fastsync::test_utils::source::MemorySource;
use fastsync::types::SourceColumn;
use fastsync_config::shared::{Catalog, TargetSchemaConfig, TransformationConfig};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Columns of the `public.orders` fixture table.
pub fn order_columns() -> Vec<SourceColumn> {
    vec![
        SourceColumn::new("id", "integer"),
        SourceColumn::new("customer_email", "character varying"),
        SourceColumn::new("created_at", "timestamp without time zone"),
    ]
}

pub fn order_rows() -> Vec<Vec<Option<String>>> {
    vec![
        vec![
            Some("1".into()),
            Some("ada@example.com".into()),
            Some("2024-01-01 10:00:00".into()),
        ],
        vec![
            Some("2".into()),
            None,
            Some("2024-01-02 11:30:00".into()),
        ],
    ]
}

/// A Postgres-like `shop` database with `public.orders` and `public.customers`.
pub fn shop_source() -> MemorySource {
    MemorySource::new("shop")
        .with_table("public.orders", order_columns(), order_rows())
        .with_table(
            "public.customers",
            vec![
                SourceColumn::new("id", "bigint"),
                SourceColumn::new("name", "text"),
                SourceColumn::new("_SDC_DELETED_AT", "timestamp"),
            ],
            vec![vec![Some("10".into()), Some("Ada".into()), None]],
        )
}

pub fn schema_config(json: &str) -> TargetSchemaConfig {
    serde_json::from_str(json).unwrap()
}

/// `analytics` as default schema, readable by the `reader` role.
pub fn analytics_schema_config() -> TargetSchemaConfig {
    schema_config(
        r#"{
            "default_target_schema": "analytics",
            "default_target_schema_select_permissions": "reader"
        }"#,
    )
}

pub fn log_based_catalog() -> Catalog {
    serde_json::from_str(
        r#"{"streams": [
            {
                "table_name": "orders",
                "metadata": [{"breadcrumb": [], "metadata": {"schema-name": "public", "replication-method": "LOG_BASED"}}]
            },
            {
                "table_name": "customers",
                "metadata": [{"breadcrumb": [], "metadata": {"schema-name": "public", "replication-method": "INCREMENTAL", "replication-key": "id"}}]
            }
        ]}"#,
    )
    .unwrap()
}

/// Working directory of a test run holding the export directory and the state file.
pub struct TestRun {
    pub dir: TempDir,
    pub context: SyncContext,
}

impl TestRun {
    pub fn new(catalog: Catalog, transformations: TransformationConfig) -> TestRun {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("exports")).unwrap();
        let context = SyncContext {
            transformations: Arc::new(transformations),
            catalog: Arc::new(catalog),
            state_file: StateFile::new(dir.path().join("state.json")),
            state_lock: new_state_lock(),
            export_dir: dir.path().join("exports"),
        };

        TestRun { dir, context }
    }

    pub fn state(&self) -> Value {
        read_json(self.context.state_file.path())
    }

    /// Files left in the export directory.
    pub fn leftover_exports(&self) -> Vec<String> {
        match std::fs::read_dir(&self.context.export_dir) {
            Ok(entries) => entries
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}
