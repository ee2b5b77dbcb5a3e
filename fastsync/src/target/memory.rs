use fastsync_config::shared::Grantee;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::obfuscation::ObfuscationRule;
use crate::source::ExportFile;
use crate::table::TableName;
use crate::target::base::{SwapOutcome, TableKind, Target};
use crate::types::{AUDIT_COLUMNS, ColumnDefinition, TargetKind};

/// A privilege granted through a [`MemoryTarget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryGrant {
    UsageOnSchema { schema: String, grantee: Grantee },
    SelectOnSchema { schema: String, grantee: Grantee },
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<ColumnDefinition>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug)]
struct Inner {
    schemas: Vec<String>,
    tables: HashMap<(String, String), MemoryTable>,
    grants: Vec<MemoryGrant>,
}

/// Keeps loaded tables in memory.
///
/// Used for dry runs and tests. Tables are keyed by schema and raw name, temporary tables use
/// their `_temp` name, and the swap moves the temporary table over the live one.
#[derive(Debug, Clone)]
pub struct MemoryTarget {
    kind: TargetKind,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::with_kind(TargetKind::BigQuery)
    }

    /// Creates a target reporting `kind`, which selects the column type mapping.
    pub fn with_kind(kind: TargetKind) -> Self {
        let inner = Inner {
            schemas: Vec::new(),
            tables: HashMap::new(),
            grants: Vec::new(),
        };

        Self {
            kind,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn schemas(&self) -> Vec<String> {
        self.inner.lock().await.schemas.clone()
    }

    pub async fn table(&self, schema: &str, name: &str) -> Option<MemoryTable> {
        self.inner
            .lock()
            .await
            .tables
            .get(&(schema.to_owned(), name.to_owned()))
            .cloned()
    }

    pub async fn table_names(&self) -> Vec<(String, String)> {
        let mut names: Vec<_> = self.inner.lock().await.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn grants(&self) -> Vec<MemoryGrant> {
        self.inner.lock().await.grants.clone()
    }

    fn table_key(schema: &str, table: &TableName, kind: TableKind) -> (String, String) {
        let name = match kind {
            TableKind::Live => table.name.clone(),
            TableKind::Temp => table.temp_name(),
        };

        (schema.to_owned(), name)
    }
}

impl Default for MemoryTarget {
    fn default() -> Self {
        Self::new()
    }
}

fn read_export(export: &ExportFile, expected_fields: usize) -> SyncResult<Vec<Vec<String>>> {
    let file = std::fs::File::open(export.path())?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(GzDecoder::new(file));

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != expected_fields {
            bail!(
                ErrorKind::InvalidData,
                "Export row does not match the table columns",
                format!("expected {expected_fields} fields, got {}", record.len())
            );
        }
        rows.push(record.iter().map(str::to_owned).collect());
    }

    Ok(rows)
}

impl Target for MemoryTarget {
    fn kind(&self) -> TargetKind {
        self.kind
    }

    async fn create_schema(&self, schema: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.schemas.iter().any(|existing| existing == schema) {
            info!("creating schema {schema}");
            inner.schemas.push(schema.to_owned());
        }

        Ok(())
    }

    async fn create_table(
        &self,
        schema: &str,
        table: &TableName,
        kind: TableKind,
        columns: &[ColumnDefinition],
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.schemas.iter().any(|existing| existing == schema) {
            bail!(
                ErrorKind::TargetQueryFailed,
                "Schema does not exist",
                schema
            );
        }

        let key = Self::table_key(schema, table, kind);
        let new_table = MemoryTable {
            columns: columns.to_vec(),
            rows: Vec::new(),
        };
        match kind {
            TableKind::Temp => {
                inner.tables.insert(key, new_table);
            }
            TableKind::Live => {
                inner.tables.entry(key).or_insert(new_table);
            }
        }

        Ok(())
    }

    async fn load_table(
        &self,
        schema: &str,
        table: &TableName,
        export: &ExportFile,
    ) -> SyncResult<()> {
        let key = Self::table_key(schema, table, TableKind::Temp);
        let mut inner = self.inner.lock().await;
        let Some(temp_table) = inner.tables.get_mut(&key) else {
            bail!(
                ErrorKind::TargetQueryFailed,
                "Temporary table does not exist",
                format!("{}.{}", key.0, key.1)
            );
        };

        let rows = read_export(export, temp_table.columns.len() + AUDIT_COLUMNS.len())?;
        info!("loaded {} rows into {}.{}", rows.len(), key.0, key.1);
        temp_table.rows = rows;

        Ok(())
    }

    async fn obfuscate_columns(
        &self,
        schema: &str,
        table: &TableName,
        rules: &[ObfuscationRule],
    ) -> SyncResult<()> {
        for rule in rules {
            info!(
                "dry run, not applying {:?} to {schema}.{}.{}",
                rule.obfuscation,
                table.temp_name(),
                rule.field_id
            );
        }

        Ok(())
    }

    async fn swap_tables(&self, schema: &str, table: &TableName) -> SyncResult<SwapOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(temp_table) = inner
            .tables
            .remove(&Self::table_key(schema, table, TableKind::Temp))
        else {
            bail!(
                ErrorKind::SwapFailed,
                "Temporary table does not exist",
                table
            );
        };

        info!("swapping {schema}.{} with its temporary table", table.name);
        inner
            .tables
            .insert(Self::table_key(schema, table, TableKind::Live), temp_table);

        Ok(SwapOutcome::Completed)
    }

    async fn grant_usage_on_schema(&self, schema: &str, grantee: &Grantee) -> SyncResult<()> {
        self.inner.lock().await.grants.push(MemoryGrant::UsageOnSchema {
            schema: schema.to_owned(),
            grantee: grantee.clone(),
        });

        Ok(())
    }

    async fn grant_select_on_schema(&self, schema: &str, grantee: &Grantee) -> SyncResult<()> {
        self.inner.lock().await.grants.push(MemoryGrant::SelectOnSchema {
            schema: schema.to_owned(),
            grantee: grantee.clone(),
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnDefinition> {
        vec![ColumnDefinition {
            name: "id".into(),
            target_type: "INT64",
        }]
    }

    #[tokio::test]
    async fn test_live_table_survives_until_swap() {
        let target = MemoryTarget::new();
        let table = TableName::parse("public.orders").unwrap();
        target.create_schema("analytics").await.unwrap();
        target
            .create_table("analytics", &table, TableKind::Live, &columns())
            .await
            .unwrap();
        target
            .create_table("analytics", &table, TableKind::Temp, &columns())
            .await
            .unwrap();

        assert_eq!(
            target.table_names().await,
            vec![
                ("analytics".to_owned(), "orders".to_owned()),
                ("analytics".to_owned(), "orders_temp".to_owned()),
            ]
        );

        let outcome = target.swap_tables("analytics", &table).await.unwrap();

        assert!(matches!(outcome, SwapOutcome::Completed));
        assert_eq!(
            target.table_names().await,
            vec![("analytics".to_owned(), "orders".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_swap_without_temp_table_fails() {
        let target = MemoryTarget::new();
        let table = TableName::parse("public.orders").unwrap();

        let err = target.swap_tables("analytics", &table).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SwapFailed);
    }

    #[tokio::test]
    async fn test_create_table_requires_schema() {
        let target = MemoryTarget::new();
        let table = TableName::parse("public.orders").unwrap();

        let err = target
            .create_table("missing", &table, TableKind::Temp, &columns())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TargetQueryFailed);
    }
}
