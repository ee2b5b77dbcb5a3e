//! Column obfuscation applied to temporary tables before they become visible.
//!
//! All rules of a table are folded into a single `UPDATE` executed by the warehouse.

use std::str::FromStr;

use fastsync_config::shared::TransformationConfig;
use tracing::warn;

use crate::table::TableName;
use crate::target::dialect::Dialect;

const HASH_SKIP_FIRST_PREFIX: &str = "HASH-SKIP-FIRST-";

/// A supported column transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObfuscationType {
    /// Replace the value with `NULL`.
    SetNull,
    /// Replace the value with its SHA-256 digest.
    Hash,
    /// Keep the first `n` characters and hash the remainder.
    HashSkipFirst(usize),
    /// Truncate a date to the first of January of its year.
    MaskDate,
    /// Replace a number with zero.
    MaskNumber,
}

impl FromStr for ObfuscationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        match s {
            "SET-NULL" => Ok(ObfuscationType::SetNull),
            "HASH" => Ok(ObfuscationType::Hash),
            "MASK-DATE" => Ok(ObfuscationType::MaskDate),
            "MASK-NUMBER" => Ok(ObfuscationType::MaskNumber),
            _ => s
                .strip_prefix(HASH_SKIP_FIRST_PREFIX)
                .and_then(|n| n.parse::<usize>().ok())
                .map(ObfuscationType::HashSkipFirst)
                .ok_or_else(|| s.to_owned()),
        }
    }
}

/// A transformation of one column of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscationRule {
    pub field_id: String,
    /// Column expression used verbatim, typically a pre-quoted identifier.
    pub safe_field_id: Option<String>,
    pub obfuscation: ObfuscationType,
}

impl ObfuscationRule {
    /// Column expression the rule assigns to, quoted by the dialect unless overridden.
    pub fn column_expression<D: Dialect + ?Sized>(&self, dialect: &D) -> String {
        match &self.safe_field_id {
            Some(safe_field_id) => safe_field_id.clone(),
            None => dialect.quote_column(&self.field_id),
        }
    }
}

/// Returns the rules configured for a table, in configuration order.
///
/// Rules with an unsupported type are logged and skipped.
pub fn obfuscation_rules(table: &TableName, config: &TransformationConfig) -> Vec<ObfuscationRule> {
    let stream_name = table.stream_name();

    config
        .rules_for_stream(&stream_name)
        .filter_map(|rule| match rule.transform_type.parse::<ObfuscationType>() {
            Ok(obfuscation) => Some(ObfuscationRule {
                field_id: rule.field_id.clone(),
                safe_field_id: rule.safe_field_id.clone(),
                obfuscation,
            }),
            Err(unknown) => {
                warn!(
                    table = %table,
                    field_id = rule.field_id,
                    transform_type = unknown,
                    "skipping unsupported transformation type"
                );
                None
            }
        })
        .collect()
}

/// Builds the single `UPDATE` applying every rule, `None` when there are no rules.
pub fn obfuscation_update<D: Dialect + ?Sized>(
    dialect: &D,
    schema: &str,
    table: &str,
    rules: &[ObfuscationRule],
) -> Option<String> {
    if rules.is_empty() {
        return None;
    }

    let assignments: Vec<String> = rules
        .iter()
        .map(|rule| {
            let column = rule.column_expression(dialect);
            dialect.obfuscation_assignment(&column, rule.obfuscation)
        })
        .collect();

    Some(dialect.update_statement(schema, table, &assignments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::dialect::{BigQueryDialect, SnowflakeDialect};
    use fastsync_config::shared::TransformationRule;

    fn rule(stream: &str, field: &str, transform_type: &str) -> TransformationRule {
        TransformationRule {
            tap_stream_name: stream.to_owned(),
            field_id: field.to_owned(),
            safe_field_id: None,
            transform_type: transform_type.to_owned(),
        }
    }

    #[test]
    fn test_parse_obfuscation_types() {
        assert_eq!("SET-NULL".parse(), Ok(ObfuscationType::SetNull));
        assert_eq!("HASH".parse(), Ok(ObfuscationType::Hash));
        assert_eq!(
            "HASH-SKIP-FIRST-12".parse(),
            Ok(ObfuscationType::HashSkipFirst(12))
        );
        assert_eq!("MASK-DATE".parse(), Ok(ObfuscationType::MaskDate));
        assert_eq!("MASK-NUMBER".parse(), Ok(ObfuscationType::MaskNumber));
        assert!("HASH-SKIP-FIRST-x".parse::<ObfuscationType>().is_err());
        assert!("MASK-HIDDEN".parse::<ObfuscationType>().is_err());
    }

    #[test]
    fn test_rules_filtered_by_stream_and_unknown_types_skipped() {
        let config = TransformationConfig {
            transformations: vec![
                rule("public-users", "email", "HASH"),
                rule("public-orders", "note", "SET-NULL"),
                rule("public-users", "secret", "ENCRYPT"),
                rule("public-users", "phone", "HASH-SKIP-FIRST-3"),
            ],
        };
        let table = TableName::parse("public.users").unwrap();

        let rules = obfuscation_rules(&table, &config);

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].obfuscation, ObfuscationType::Hash);
        assert_eq!(rules[1].obfuscation, ObfuscationType::HashSkipFirst(3));
    }

    #[test]
    fn test_no_rules_no_update() {
        let dialect = SnowflakeDialect::new("stage");

        assert_eq!(obfuscation_update(&dialect, "s", "t_temp", &[]), None);
    }

    #[test]
    fn test_single_update_for_all_rules() {
        let dialect = SnowflakeDialect::new("stage");
        let rules = vec![
            ObfuscationRule {
                field_id: "email".into(),
                safe_field_id: None,
                obfuscation: ObfuscationType::Hash,
            },
            ObfuscationRule {
                field_id: "select".into(),
                safe_field_id: Some("\"SELECT\"".into()),
                obfuscation: ObfuscationType::SetNull,
            },
        ];

        let update = obfuscation_update(&dialect, "test_schema", "users_temp", &rules).unwrap();

        assert_eq!(
            update,
            "UPDATE test_schema.\"USERS_TEMP\" SET \"EMAIL\" = SHA2(\"EMAIL\", 256), \"SELECT\" = NULL"
        );
    }

    #[test]
    fn test_hash_skip_first_references_column_twice() {
        let dialect = BigQueryDialect::default();
        let rules = vec![ObfuscationRule {
            field_id: "phone".into(),
            safe_field_id: None,
            obfuscation: ObfuscationType::HashSkipFirst(3),
        }];

        let update = obfuscation_update(&dialect, "s", "users_temp", &rules).unwrap();
        let expression = update.split(" = ").nth(1).unwrap();

        assert_eq!(expression.matches("`phone`").count(), 2);
        assert!(expression.contains("SUBSTR(`phone`, 1, 3)"));
        assert!(expression.contains("TO_HEX(SHA256(SUBSTR(`phone`, 3 + 1)))"));
    }
}
