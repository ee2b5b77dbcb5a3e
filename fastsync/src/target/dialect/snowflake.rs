use fastsync_config::shared::Grantee;

use crate::table::TableName;
use crate::target::dialect::{Dialect, SwapStatements, double_quote};
use crate::target::warehouse::StagedFile;
use crate::types::TargetKind;

/// CSV file format matching the exports: `\x1e` as escape so backslashes are loaded verbatim.
const FILE_FORMAT: &str = "FILE_FORMAT = (type=CSV escape='\\x1e' escape_unenclosed_field='\\x1e' field_optionally_enclosed_by='\"' skip_header=0 compression=GZIP binary_format=HEX)";

/// Snowflake SQL. Identifiers are uppercased and double quoted, loads read from an external
/// stage and the swap uses the native `SWAP WITH`.
#[derive(Debug, Clone)]
pub struct SnowflakeDialect {
    stage: String,
}

impl SnowflakeDialect {
    /// `stage` is the external stage pointing at the root of the staging bucket.
    pub fn new(stage: impl Into<String>) -> SnowflakeDialect {
        SnowflakeDialect {
            stage: stage.into(),
        }
    }
}

impl Dialect for SnowflakeDialect {
    fn kind(&self) -> TargetKind {
        TargetKind::Snowflake
    }

    fn normalize_identifier(&self, identifier: &str) -> String {
        identifier.to_uppercase()
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        double_quote(identifier)
    }

    fn audit_column_type(&self) -> &'static str {
        "TIMESTAMP_NTZ"
    }

    fn copy_into(&self, schema: &str, table: &str, staged: &StagedFile) -> String {
        format!(
            "COPY INTO {} FROM '@{}/{}' {FILE_FORMAT}",
            self.table_reference(schema, table),
            self.stage,
            staged.key
        )
    }

    fn swap_tables(&self, schema: &str, table: &TableName) -> SwapStatements {
        let live = self.table_reference(schema, &table.name);
        let temp = self.table_reference(schema, &table.temp_name());

        SwapStatements {
            replace: vec![format!("ALTER TABLE {temp} SWAP WITH {live}")],
            cleanup: vec![format!("DROP TABLE IF EXISTS {temp}")],
        }
    }

    // Snowflake has no groups, every grantee is a role.
    fn grant_usage_on_schema(&self, schema: &str, grantee: &Grantee) -> String {
        format!("GRANT USAGE ON SCHEMA {schema} TO ROLE {}", grantee.name())
    }

    fn grant_select_on_schema(&self, schema: &str, grantee: &Grantee) -> String {
        format!(
            "GRANT SELECT ON ALL TABLES IN SCHEMA {schema} TO ROLE {}",
            grantee.name()
        )
    }
}
