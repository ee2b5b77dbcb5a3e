//! Column type mapping from source databases to warehouse column types.

use std::fmt;

/// Database a table is exported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Postgres,
    MySql,
}

/// Warehouse a table is loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    BigQuery,
    Redshift,
    Snowflake,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Postgres => f.write_str("postgres"),
            SourceKind::MySql => f.write_str("mysql"),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::BigQuery => f.write_str("bigquery"),
            TargetKind::Redshift => f.write_str("redshift"),
            TargetKind::Snowflake => f.write_str("snowflake"),
        }
    }
}

/// A column as reported by the source catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    /// `information_schema.columns.data_type`, for example `character varying` or `tinyint`.
    pub data_type: String,
    /// `information_schema.columns.column_type` on MySQL, for example `tinyint(1)`.
    pub column_type: Option<String>,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> SourceColumn {
        SourceColumn {
            name: name.into(),
            data_type: data_type.into(),
            column_type: None,
        }
    }

    pub fn with_column_type(mut self, column_type: impl Into<String>) -> SourceColumn {
        self.column_type = Some(column_type.into());
        self
    }
}

/// A column of a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub target_type: &'static str,
}

/// Maps a source column type to the warehouse column type.
///
/// Total: types without an entry map to the target's string type.
pub fn map_column_type(
    source: SourceKind,
    target: TargetKind,
    data_type: &str,
    column_type: Option<&str>,
) -> &'static str {
    let data_type = data_type.trim();
    let is_tinyint_one = column_type.is_some_and(|t| t.trim().eq_ignore_ascii_case("tinyint(1)"));

    match (source, target) {
        (SourceKind::Postgres, TargetKind::BigQuery) => postgres_to_bigquery(data_type),
        (SourceKind::Postgres, TargetKind::Snowflake) => postgres_to_snowflake(data_type),
        (SourceKind::Postgres, TargetKind::Redshift) => postgres_to_redshift(data_type),
        (SourceKind::MySql, TargetKind::BigQuery) => mysql_to_bigquery(data_type, is_tinyint_one),
        (SourceKind::MySql, TargetKind::Snowflake) => {
            mysql_to_snowflake(data_type, is_tinyint_one)
        }
        (SourceKind::MySql, TargetKind::Redshift) => mysql_to_redshift(data_type, is_tinyint_one),
    }
}

/// Maps every source column, dropping columns that collide with the audit columns.
pub fn map_columns(
    source: SourceKind,
    target: TargetKind,
    columns: &[SourceColumn],
) -> Vec<ColumnDefinition> {
    columns
        .iter()
        .filter(|column| !is_reserved_column(&column.name))
        .map(|column| ColumnDefinition {
            name: column.name.clone(),
            target_type: map_column_type(
                source,
                target,
                &column.data_type,
                column.column_type.as_deref(),
            ),
        })
        .collect()
}

/// Audit columns appended to every loaded table, in load order.
pub const AUDIT_COLUMNS: [&str; 3] = ["_sdc_extracted_at", "_sdc_batched_at", "_sdc_deleted_at"];

/// Returns `true` for columns that would clash with the audit columns.
pub fn is_reserved_column(name: &str) -> bool {
    AUDIT_COLUMNS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name.trim()))
}

fn postgres_to_bigquery(data_type: &str) -> &'static str {
    match data_type {
        "char" | "character" | "varchar" | "character varying" | "text" => "STRING",
        "bit" | "bool" | "boolean" => "BOOL",
        "varbit" | "bit varying" | "numeric" | "double precision" | "real" => "NUMERIC",
        "smallint" | "int" | "integer" | "bigint" | "smallserial" | "serial" | "bigserial" => {
            "INT64"
        }
        "date" | "timestamp" | "timestamp without time zone" | "timestamp with time zone" => {
            "TIMESTAMP"
        }
        "time" | "time without time zone" | "time with time zone" => "TIME",
        "json" | "jsonb" => "JSON",
        _ => "STRING",
    }
}

fn postgres_to_snowflake(data_type: &str) -> &'static str {
    match data_type {
        "char" | "character" | "varchar" | "character varying" | "text" => "VARCHAR",
        "bit" | "bool" | "boolean" => "BOOLEAN",
        "varbit" | "bit varying" => "NUMBER",
        "smallint" | "int" | "integer" | "bigint" | "smallserial" | "serial" | "bigserial" => {
            "NUMBER"
        }
        "numeric" | "double precision" | "real" => "FLOAT",
        "date" | "timestamp" | "timestamp without time zone" => "TIMESTAMP_NTZ",
        "timestamp with time zone" => "TIMESTAMP_TZ",
        "time" | "time without time zone" | "time with time zone" => "TIME",
        "ARRAY" | "json" | "jsonb" => "VARIANT",
        _ => "VARCHAR",
    }
}

fn postgres_to_redshift(data_type: &str) -> &'static str {
    match data_type {
        "bit" | "bool" | "boolean" => "BOOLEAN",
        "smallint" | "int" | "integer" | "bigint" | "smallserial" | "serial" | "bigserial" => {
            "NUMERIC"
        }
        "varbit" | "bit varying" | "numeric" | "double precision" | "real" => "DOUBLE PRECISION",
        "date" | "timestamp" | "timestamp without time zone" => "TIMESTAMP WITHOUT TIME ZONE",
        "timestamp with time zone" => "TIMESTAMP WITH TIME ZONE",
        "time" | "time without time zone" | "time with time zone" => "CHARACTER VARYING(256)",
        _ => "CHARACTER VARYING(65535)",
    }
}

fn mysql_to_bigquery(data_type: &str, is_tinyint_one: bool) -> &'static str {
    match data_type {
        "tinyint" if is_tinyint_one => "BOOL",
        "tinyint" | "int" | "smallint" | "mediumint" | "bigint" | "decimal" | "double"
        | "float" => "NUMERIC",
        "bit" | "bool" | "boolean" => "BOOL",
        "date" | "datetime" | "timestamp" => "TIMESTAMP",
        _ => "STRING",
    }
}

fn mysql_to_snowflake(data_type: &str, is_tinyint_one: bool) -> &'static str {
    match data_type {
        "tinyint" if is_tinyint_one => "BOOLEAN",
        "tinyint" | "int" | "smallint" | "mediumint" | "bigint" => "NUMBER",
        "decimal" | "double" | "float" => "FLOAT",
        "bit" | "bool" | "boolean" => "BOOLEAN",
        "date" | "datetime" | "timestamp" => "TIMESTAMP_NTZ",
        "time" => "TIME",
        "json" => "VARIANT",
        _ => "VARCHAR",
    }
}

fn mysql_to_redshift(data_type: &str, is_tinyint_one: bool) -> &'static str {
    match data_type {
        "tinyint" if is_tinyint_one => "BOOLEAN",
        "tinyint" | "int" | "smallint" | "mediumint" | "bigint" => "NUMERIC",
        "decimal" | "double" | "float" => "DOUBLE PRECISION",
        "bit" | "bool" | "boolean" => "BOOLEAN",
        "date" | "datetime" | "timestamp" => "TIMESTAMP WITHOUT TIME ZONE",
        "time" => "CHARACTER VARYING(256)",
        _ => "CHARACTER VARYING(65535)",
    }
}
