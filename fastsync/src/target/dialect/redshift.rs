use fastsync_config::shared::Grantee;
use secrecy::{ExposeSecret, SecretString};

use crate::table::TableName;
use crate::target::dialect::{CreateMode, Dialect, SwapStatements, double_quote};
use crate::target::warehouse::StagedFile;
use crate::types::{ColumnDefinition, TargetKind};

/// Credentials Redshift uses to read the staged object from S3.
#[derive(Debug, Clone)]
pub enum RedshiftCopyCredentials {
    IamRole(String),
    Keys {
        access_key_id: String,
        secret_access_key: SecretString,
    },
}

impl RedshiftCopyCredentials {
    fn clause(&self) -> String {
        match self {
            RedshiftCopyCredentials::IamRole(arn) => format!("IAM_ROLE '{arn}'"),
            RedshiftCopyCredentials::Keys {
                access_key_id,
                secret_access_key,
            } => format!(
                "CREDENTIALS 'aws_access_key_id={access_key_id};aws_secret_access_key={}'",
                secret_access_key.expose_secret()
            ),
        }
    }
}

/// Redshift SQL: lowercase double quoted identifiers, `COPY` from S3 and a rename based swap.
///
/// The rendered `COPY` carries credentials, callers must not log it.
#[derive(Debug, Clone)]
pub struct RedshiftDialect {
    credentials: RedshiftCopyCredentials,
}

impl RedshiftDialect {
    pub fn new(credentials: RedshiftCopyCredentials) -> RedshiftDialect {
        RedshiftDialect { credentials }
    }
}

impl Dialect for RedshiftDialect {
    fn kind(&self) -> TargetKind {
        TargetKind::Redshift
    }

    fn normalize_identifier(&self, identifier: &str) -> String {
        identifier.to_lowercase()
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        double_quote(identifier)
    }

    fn audit_column_type(&self) -> &'static str {
        "TIMESTAMP WITHOUT TIME ZONE"
    }

    // No CREATE OR REPLACE TABLE on Redshift.
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
            CreateMode::Replace => vec![
                self.drop_table(schema, table),
                format!("CREATE TABLE {table_reference} ({column_list})"),
            ],
            CreateMode::IfNotExists => vec![format!(
                "CREATE TABLE IF NOT EXISTS {table_reference} ({column_list})"
            )],
        }
    }

    fn copy_into(&self, schema: &str, table: &str, staged: &StagedFile) -> String {
        format!(
            "COPY {} FROM '{}' {} FORMAT AS CSV GZIP BLANKSASNULL TIMEFORMAT 'auto' COMPUPDATE OFF STATUPDATE OFF",
            self.table_reference(schema, table),
            staged.uri,
            self.credentials.clause()
        )
    }

    fn swap_tables(&self, schema: &str, table: &TableName) -> SwapStatements {
        let live = self.table_reference(schema, &table.name);
        let temp = self.table_reference(schema, &table.temp_name());
        let live_name = self.quote_column(&table.name);

        SwapStatements {
            replace: vec![format!(
                "BEGIN; DROP TABLE IF EXISTS {live}; ALTER TABLE {temp} RENAME TO {live_name}; COMMIT;"
            )],
            cleanup: vec![],
        }
    }

    fn grant_usage_on_schema(&self, schema: &str, grantee: &Grantee) -> String {
        format!("GRANT USAGE ON SCHEMA {schema} TO {}", grantee_clause(grantee))
    }

    fn grant_select_on_schema(&self, schema: &str, grantee: &Grantee) -> String {
        format!(
            "GRANT SELECT ON ALL TABLES IN SCHEMA {schema} TO {}",
            grantee_clause(grantee)
        )
    }

    fn requires_serial_schema_creation(&self) -> bool {
        true
    }
}

fn grantee_clause(grantee: &Grantee) -> String {
    match grantee {
        Grantee::Role(name) => name.clone(),
        Grantee::Group(name) => format!("GROUP {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obfuscation::ObfuscationType;

    fn dialect() -> RedshiftDialect {
        RedshiftDialect::new(RedshiftCopyCredentials::IamRole(
            "arn:aws:iam::123456789012:role/copy".into(),
        ))
    }

    fn staged() -> StagedFile {
        StagedFile {
            key: "exports/t.csv.gz".into(),
            uri: "s3://bucket/exports/t.csv.gz".into(),
        }
    }

    #[test]
    fn test_copy_with_iam_role() {
        assert_eq!(
            dialect().copy_into("test_schema", "Orders_temp", &staged()),
            "COPY test_schema.\"orders_temp\" FROM 's3://bucket/exports/t.csv.gz' IAM_ROLE 'arn:aws:iam::123456789012:role/copy' FORMAT AS CSV GZIP BLANKSASNULL TIMEFORMAT 'auto' COMPUPDATE OFF STATUPDATE OFF"
        );
    }

    #[test]
    fn test_copy_with_access_keys() {
        let dialect = RedshiftDialect::new(RedshiftCopyCredentials::Keys {
            access_key_id: "AKIA".into(),
            secret_access_key: SecretString::from("secret"),
        });

        let copy = dialect.copy_into("s", "t_temp", &staged());

        assert!(copy.contains("CREDENTIALS 'aws_access_key_id=AKIA;aws_secret_access_key=secret'"));
        assert!(!format!("{dialect:?}").contains("\"secret\""));
    }

    #[test]
    fn test_swap_renames_inside_transaction() {
        let table = TableName::parse("public.Orders").unwrap();

        let swap = dialect().swap_tables("test_schema", &table);

        assert_eq!(
            swap.replace,
            vec![
                "BEGIN; DROP TABLE IF EXISTS test_schema.\"orders\"; ALTER TABLE test_schema.\"orders_temp\" RENAME TO \"orders\"; COMMIT;"
            ]
        );
        assert!(swap.cleanup.is_empty());
    }

    #[test]
    fn test_replace_drops_before_create() {
        let columns = vec![ColumnDefinition {
            name: "id".into(),
            target_type: "NUMERIC",
        }];

        assert_eq!(
            dialect().create_table("s", "t_temp", &columns, CreateMode::Replace),
            vec![
                "DROP TABLE IF EXISTS s.\"t_temp\"".to_owned(),
                "CREATE TABLE s.\"t_temp\" (\"id\" NUMERIC,_sdc_extracted_at TIMESTAMP WITHOUT TIME ZONE,_sdc_batched_at TIMESTAMP WITHOUT TIME ZONE,_sdc_deleted_at TIMESTAMP WITHOUT TIME ZONE)".to_owned(),
            ]
        );
    }

    #[test]
    fn test_group_grants() {
        let d = dialect();

        assert_eq!(
            d.grant_usage_on_schema("s", &Grantee::Group("analysts".into())),
            "GRANT USAGE ON SCHEMA s TO GROUP analysts"
        );
        assert_eq!(
            d.grant_select_on_schema("s", &Grantee::Role("bi_user".into())),
            "GRANT SELECT ON ALL TABLES IN SCHEMA s TO bi_user"
        );
        assert_eq!(
            d.grant_select_on_schema("s", &Grantee::Group("analysts".into())),
            "GRANT SELECT ON ALL TABLES IN SCHEMA s TO GROUP analysts"
        );
    }

    #[test]
    fn test_hash_matches_snowflake_rendering() {
        assert_eq!(
            dialect().obfuscation_assignment("\"email\"", ObfuscationType::Hash),
            "\"email\" = SHA2(\"email\", 256)"
        );
        assert!(dialect().requires_serial_schema_creation());
    }
}
