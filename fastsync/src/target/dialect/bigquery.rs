use fastsync_config::shared::Grantee;

use crate::obfuscation::ObfuscationType;
use crate::table::TableName;
use crate::target::dialect::{Dialect, SwapStatements};
use crate::target::warehouse::StagedFile;
use crate::types::{ColumnDefinition, TargetKind};

const METADATA_VIEWER_ROLE: &str = "roles/bigquery.metadataViewer";
const DATA_VIEWER_ROLE: &str = "roles/bigquery.dataViewer";

/// BigQuery standard SQL.
///
/// Identifiers are lowercased and tables quoted with backticks. BigQuery has no table rename,
/// so the swap copies the temporary table over the live one and drops it afterwards.
#[derive(Debug, Clone, Default)]
pub struct BigQueryDialect {
    location: Option<String>,
    temp_schema: Option<String>,
}

impl BigQueryDialect {
    pub fn new(location: Option<String>, temp_schema: Option<String>) -> BigQueryDialect {
        BigQueryDialect {
            location,
            temp_schema: temp_schema
                .map(|schema| schema.trim().to_owned())
                .filter(|schema| !schema.is_empty()),
        }
    }

    fn create_single_schema(&self, schema: &str) -> String {
        match &self.location {
            Some(location) => format!(
                "CREATE SCHEMA IF NOT EXISTS {schema} OPTIONS(location = '{location}')"
            ),
            None => format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
        }
    }

    /// Principal in BigQuery DCL syntax: roles are passed as written (`user:a@b.com`), groups
    /// get the `group:` prefix. Target config validation rejects roles without a prefix.
    fn principal(grantee: &Grantee) -> String {
        let principal = match grantee {
            Grantee::Role(name) => name.clone(),
            Grantee::Group(name) if name.contains(':') => name.clone(),
            Grantee::Group(name) => format!("group:{name}"),
        };

        format!("\"{}\"", principal.replace('"', "\\\""))
    }
}

impl Dialect for BigQueryDialect {
    fn kind(&self) -> TargetKind {
        TargetKind::BigQuery
    }

    fn normalize_identifier(&self, identifier: &str) -> String {
        identifier.to_lowercase()
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "\\`"))
    }

    fn temp_schema<'a>(&'a self, schema: &'a str) -> &'a str {
        self.temp_schema.as_deref().unwrap_or(schema)
    }

    fn create_schema(&self, schema: &str) -> Vec<String> {
        let mut statements = vec![self.create_single_schema(schema)];

        let temp_schema = self.temp_schema(schema);
        if temp_schema != schema {
            statements.push(self.create_single_schema(temp_schema));
        }

        statements
    }

    fn column_definition(&self, column: &ColumnDefinition) -> String {
        format!("{} {}", self.quote_column(&column.name), column.target_type).to_lowercase()
    }

    fn audit_column_type(&self) -> &'static str {
        "TIMESTAMP"
    }

    fn copy_into(&self, schema: &str, table: &str, staged: &StagedFile) -> String {
        format!(
            "LOAD DATA OVERWRITE {} FROM FILES (format = 'CSV', uris = ['{}'], compression = 'GZIP', allow_quoted_newlines = true)",
            self.table_reference(schema, table),
            staged.uri
        )
    }

    fn obfuscation_assignment(&self, column: &str, obfuscation: ObfuscationType) -> String {
        match obfuscation {
            ObfuscationType::SetNull => format!("{column} = NULL"),
            ObfuscationType::Hash => format!("{column} = TO_HEX(SHA256({column}))"),
            ObfuscationType::HashSkipFirst(n) => format!(
                "{column} = CONCAT(SUBSTR({column}, 1, {n}), TO_HEX(SHA256(SUBSTR({column}, {n} + 1))))"
            ),
            // Dates are loaded as TIMESTAMP columns.
            ObfuscationType::MaskDate => format!("{column} = TIMESTAMP_TRUNC({column}, YEAR)"),
            ObfuscationType::MaskNumber => format!("{column} = 0"),
        }
    }

    fn update_statement(&self, schema: &str, table: &str, assignments: &[String]) -> String {
        format!(
            "UPDATE {} SET {} WHERE true",
            self.table_reference(schema, table),
            assignments.join(", ")
        )
    }

    fn swap_tables(&self, schema: &str, table: &TableName) -> SwapStatements {
        let live = self.table_reference(schema, &table.name);
        let temp = self.table_reference(self.temp_schema(schema), &table.temp_name());

        SwapStatements {
            replace: vec![format!("CREATE OR REPLACE TABLE {live} COPY {temp}")],
            cleanup: vec![format!("DROP TABLE IF EXISTS {temp}")],
        }
    }

    fn grant_usage_on_schema(&self, schema: &str, grantee: &Grantee) -> String {
        format!(
            "GRANT `{METADATA_VIEWER_ROLE}` ON SCHEMA {schema} TO {}",
            Self::principal(grantee)
        )
    }

    fn grant_select_on_schema(&self, schema: &str, grantee: &Grantee) -> String {
        format!(
            "GRANT `{DATA_VIEWER_ROLE}` ON SCHEMA {schema} TO {}",
            Self::principal(grantee)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::dialect::CreateMode;

    fn columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition {
                name: "ID".into(),
                target_type: "INT64",
            },
            ColumnDefinition {
                name: "name".into(),
                target_type: "STRING",
            },
        ]
    }

    #[test]
    fn test_create_table_lowercases_and_appends_audit_columns() {
        let dialect = BigQueryDialect::default();

        let statements = dialect.create_table("test_schema", "order", &columns(), CreateMode::Replace);

        assert_eq!(
            statements,
            vec![
                "CREATE OR REPLACE TABLE test_schema.`order` (`id` int64,`name` string,_sdc_extracted_at TIMESTAMP,_sdc_batched_at TIMESTAMP,_sdc_deleted_at TIMESTAMP)"
            ]
        );
    }

    #[test]
    fn test_drop_uppercase_temp_table() {
        let dialect = BigQueryDialect::default();
        let table = TableName::parse("public.UPPERCASE_TABLE").unwrap();

        assert_eq!(
            dialect.drop_table("test_schema", &table.temp_name()),
            "DROP TABLE IF EXISTS test_schema.`uppercase_table_temp`"
        );
    }

    #[test]
    fn test_load_from_gcs() {
        let dialect = BigQueryDialect::default();
        let staged = StagedFile {
            key: "fastsync/export.csv.gz".into(),
            uri: "gs://bucket/fastsync/export.csv.gz".into(),
        };

        assert_eq!(
            dialect.copy_into("test_schema", "orders_temp", &staged),
            "LOAD DATA OVERWRITE test_schema.`orders_temp` FROM FILES (format = 'CSV', uris = ['gs://bucket/fastsync/export.csv.gz'], compression = 'GZIP', allow_quoted_newlines = true)"
        );
    }

    #[test]
    fn test_swap_copies_then_drops_temp() {
        let dialect = BigQueryDialect::default();
        let table = TableName::parse("public.full").unwrap();

        let swap = dialect.swap_tables("test_schema", &table);

        assert_eq!(
            swap.replace,
            vec!["CREATE OR REPLACE TABLE test_schema.`full` COPY test_schema.`full_temp`"]
        );
        assert_eq!(
            swap.cleanup,
            vec!["DROP TABLE IF EXISTS test_schema.`full_temp`"]
        );
    }

    #[test]
    fn test_temp_schema_isolates_temp_tables() {
        let dialect = BigQueryDialect::new(Some("EU".into()), Some("staging".into()));
        let table = TableName::parse("public.orders").unwrap();

        assert_eq!(
            dialect.create_schema("analytics"),
            vec![
                "CREATE SCHEMA IF NOT EXISTS analytics OPTIONS(location = 'EU')",
                "CREATE SCHEMA IF NOT EXISTS staging OPTIONS(location = 'EU')",
            ]
        );
        assert_eq!(
            dialect.swap_tables("analytics", &table).replace,
            vec!["CREATE OR REPLACE TABLE analytics.`orders` COPY staging.`orders_temp`"]
        );
    }

    #[test]
    fn test_grants() {
        let dialect = BigQueryDialect::default();

        assert_eq!(
            dialect.grant_usage_on_schema("analytics", &Grantee::Role("user:bi@acme.com".into())),
            "GRANT `roles/bigquery.metadataViewer` ON SCHEMA analytics TO \"user:bi@acme.com\""
        );
        assert_eq!(
            dialect.grant_select_on_schema("analytics", &Grantee::Group("analysts@acme.com".into())),
            "GRANT `roles/bigquery.dataViewer` ON SCHEMA analytics TO \"group:analysts@acme.com\""
        );
        assert_eq!(
            dialect.grant_select_on_schema("analytics", &Grantee::Group("group:bi@acme.com".into())),
            "GRANT `roles/bigquery.dataViewer` ON SCHEMA analytics TO \"group:bi@acme.com\""
        );
    }

    #[test]
    fn test_update_has_where_clause() {
        let dialect = BigQueryDialect::default();

        assert_eq!(
            dialect.update_statement("s", "t_temp", &["`a` = NULL".into(), "`b` = 0".into()]),
            "UPDATE s.`t_temp` SET `a` = NULL, `b` = 0 WHERE true"
        );
    }
}
