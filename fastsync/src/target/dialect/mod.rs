//! Per-warehouse SQL rendering.
//!
//! A [`Dialect`] only renders statements, it never executes them. Executing is the job of a
//! [`crate::target::warehouse::QueryClient`], which keeps SQL generation testable without a
//! warehouse.

mod bigquery;
mod redshift;
mod snowflake;

pub use bigquery::BigQueryDialect;
pub use redshift::{RedshiftCopyCredentials, RedshiftDialect};
pub use snowflake::SnowflakeDialect;

use fastsync_config::shared::Grantee;

use crate::obfuscation::ObfuscationType;
use crate::table::TableName;
use crate::target::warehouse::StagedFile;
use crate::types::{AUDIT_COLUMNS, ColumnDefinition, TargetKind};

/// How a table is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Drop any existing table of the same name first.
    Replace,
    /// Keep an existing table untouched.
    IfNotExists,
}

/// Statements making a loaded temporary table the live table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapStatements {
    /// Makes the new data visible. Failing here leaves the live table untouched.
    pub replace: Vec<String>,
    /// Removes what is left of the temporary table once the live table was replaced.
    pub cleanup: Vec<String>,
}

/// SQL rendering rules of one warehouse.
///
/// Table arguments are raw, unnormalized names such as `orders` or `orders_temp`; the dialect
/// applies its case rules and quoting. Schema names are emitted unquoted.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> TargetKind;

    /// Applies the warehouse's identifier case rules.
    fn normalize_identifier(&self, identifier: &str) -> String;

    /// Quotes an already normalized identifier.
    fn quote_identifier(&self, identifier: &str) -> String;

    fn quote_column(&self, column: &str) -> String {
        self.quote_identifier(&self.normalize_identifier(column))
    }

    fn table_reference(&self, schema: &str, table: &str) -> String {
        format!("{schema}.{}", self.quote_column(table))
    }

    /// Schema holding the temporary tables of `schema`.
    fn temp_schema<'a>(&'a self, schema: &'a str) -> &'a str {
        schema
    }

    /// Statements creating `schema` (and related schemas) when missing.
    fn create_schema(&self, schema: &str) -> Vec<String> {
        vec![format!("CREATE SCHEMA IF NOT EXISTS {schema}")]
    }

    fn drop_table(&self, schema: &str, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.table_reference(schema, table))
    }

    fn column_definition(&self, column: &ColumnDefinition) -> String {
        format!("{} {}", self.quote_column(&column.name), column.target_type)
    }

    /// Column type of the audit timestamp columns.
    fn audit_column_type(&self) -> &'static str;

    /// Column list of a loaded table: the mapped columns followed by the audit columns.
    fn column_list(&self, columns: &[ColumnDefinition]) -> String {
        let audit_type = self.audit_column_type();

        columns
            .iter()
            .map(|column| self.column_definition(column))
            .chain(
                AUDIT_COLUMNS
                    .iter()
                    .map(|audit| format!("{} {audit_type}", self.normalize_identifier(audit))),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn create_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDefinition],
        mode: CreateMode,
    ) -> Vec<String> {
        let table_reference = self.table_reference(schema, table);
        let column_list = self.column_list(columns);

        match mode {
            CreateMode::Replace => vec![format!(
                "CREATE OR REPLACE TABLE {table_reference} ({column_list})"
            )],
            CreateMode::IfNotExists => vec![format!(
                "CREATE TABLE IF NOT EXISTS {table_reference} ({column_list})"
            )],
        }
    }

    /// Bulk load of a staged export into a table.
    fn copy_into(&self, schema: &str, table: &str, staged: &StagedFile) -> String;

    /// `column = expression` applying one obfuscation to an already quoted column.
    fn obfuscation_assignment(&self, column: &str, obfuscation: ObfuscationType) -> String {
        match obfuscation {
            ObfuscationType::SetNull => format!("{column} = NULL"),
            ObfuscationType::Hash => format!("{column} = SHA2({column}, 256)"),
            ObfuscationType::HashSkipFirst(n) => format!(
                "{column} = CONCAT(SUBSTRING({column}, 1, {n}), SHA2(SUBSTRING({column}, {n} + 1), 256))"
            ),
            ObfuscationType::MaskDate => {
                format!("{column} = TO_CHAR({column}::DATE,'YYYY-01-01')::DATE")
            }
            ObfuscationType::MaskNumber => format!("{column} = 0"),
        }
    }

    fn update_statement(&self, schema: &str, table: &str, assignments: &[String]) -> String {
        format!(
            "UPDATE {} SET {}",
            self.table_reference(schema, table),
            assignments.join(", ")
        )
    }

    fn swap_tables(&self, schema: &str, table: &TableName) -> SwapStatements;

    fn grant_usage_on_schema(&self, schema: &str, grantee: &Grantee) -> String;

    fn grant_select_on_schema(&self, schema: &str, grantee: &Grantee) -> String;

    /// Whether concurrent `CREATE SCHEMA` statements may conflict, in which case schemas are
    /// created one by one before any table is synced.
    fn requires_serial_schema_creation(&self) -> bool {
        false
    }
}

/// Wraps an identifier in double quotes, doubling embedded quotes.
pub(crate) fn double_quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
