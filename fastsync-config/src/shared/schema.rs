use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A principal that receives read access on loaded schemas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grantee {
    /// A role (Snowflake, BigQuery principal) or user (Redshift).
    Role(String),
    /// A group of users, rendered with the warehouse's group syntax.
    Group(String),
}

impl Grantee {
    pub fn name(&self) -> &str {
        match self {
            Grantee::Role(name) | Grantee::Group(name) => name,
        }
    }
}

impl fmt::Display for Grantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grantee::Role(name) => write!(f, "{name}"),
            Grantee::Group(name) => write!(f, "group {name}"),
        }
    }
}

/// Select permissions as written in target configs.
///
/// Accepts a single role, a list of roles, or an object splitting users from groups:
///
/// ```json
/// "default_target_schema_select_permissions": "reader"
/// "default_target_schema_select_permissions": ["reader", "analyst"]
/// "default_target_schema_select_permissions": {"users": ["bi"], "groups": ["analysts"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectPermissions {
    Single(String),
    List(Vec<String>),
    Split {
        #[serde(default)]
        users: Vec<String>,
        #[serde(default)]
        groups: Vec<String>,
    },
}

impl SelectPermissions {
    /// Expands the permissions into grantees, users first, skipping blank names.
    pub fn grantees(&self) -> Vec<Grantee> {
        let roles = |names: &[String]| -> Vec<Grantee> {
            names
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .map(|name| Grantee::Role(name.to_owned()))
                .collect()
        };

        match self {
            SelectPermissions::Single(name) => roles(std::slice::from_ref(name)),
            SelectPermissions::List(names) => roles(names),
            SelectPermissions::Split { users, groups } => {
                let mut grantees = roles(users);
                grantees.extend(
                    groups
                        .iter()
                        .map(|name| name.trim())
                        .filter(|name| !name.is_empty())
                        .map(|name| Grantee::Group(name.to_owned())),
                );
                grantees
            }
        }
    }
}

/// Per source schema override of the destination schema and its grantees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchemaMappingEntry {
    pub target_schema: Option<String>,
    pub target_schema_select_permissions: Option<SelectPermissions>,
}

/// Static mapping from source schemas to target schemas, shared by every target kind.
///
/// Read-only during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TargetSchemaConfig {
    pub default_target_schema: Option<String>,
    pub default_target_schema_select_permissions: Option<SelectPermissions>,
    #[serde(default)]
    pub schema_mapping: HashMap<String, SchemaMappingEntry>,
}

impl TargetSchemaConfig {
    /// Returns the mapping entry of a source schema.
    ///
    /// Exact matches win. Configuration loaders may normalize key case, so a case-insensitive
    /// match is used as a fallback.
    pub fn mapping_for(&self, source_schema: &str) -> Option<&SchemaMappingEntry> {
        self.schema_mapping.get(source_schema).or_else(|| {
            self.schema_mapping
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(source_schema))
                .map(|(_, entry)| entry)
        })
    }

    /// Every grantee named anywhere in the config, default permissions first.
    pub fn all_grantees(&self) -> Vec<Grantee> {
        self.default_target_schema_select_permissions
            .iter()
            .chain(
                self.schema_mapping
                    .values()
                    .filter_map(|entry| entry.target_schema_select_permissions.as_ref()),
            )
            .flat_map(SelectPermissions::grantees)
            .collect()
    }

    /// Returns the trimmed default target schema, treating blank values as unset.
    pub fn default_target_schema(&self) -> Option<&str> {
        self.default_target_schema
            .as_deref()
            .map(str::trim)
            .filter(|schema| !schema.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_permissions_shapes() {
        let single: SelectPermissions = serde_json::from_str(r#""reader""#).unwrap();
        assert_eq!(single.grantees(), vec![Grantee::Role("reader".into())]);

        let list: SelectPermissions = serde_json::from_str(r#"["a", " ", "b"]"#).unwrap();
        assert_eq!(
            list.grantees(),
            vec![Grantee::Role("a".into()), Grantee::Role("b".into())]
        );

        let split: SelectPermissions =
            serde_json::from_str(r#"{"users": ["bi"], "groups": ["analysts"]}"#).unwrap();
        assert_eq!(
            split.grantees(),
            vec![
                Grantee::Role("bi".into()),
                Grantee::Group("analysts".into())
            ]
        );
    }

    #[test]
    fn test_blank_default_schema_is_unset() {
        let config = TargetSchemaConfig {
            default_target_schema: Some("   ".into()),
            ..Default::default()
        };

        assert_eq!(config.default_target_schema(), None);
    }

    #[test]
    fn test_mapping_lookup_falls_back_to_case_insensitive() {
        let config: TargetSchemaConfig = serde_json::from_str(
            r#"{"schema_mapping": {"Sales": {"target_schema": "sales_raw"}}}"#,
        )
        .unwrap();

        assert!(config.mapping_for("Sales").is_some());
        assert_eq!(
            config.mapping_for("sales").unwrap().target_schema.as_deref(),
            Some("sales_raw")
        );
        assert!(config.mapping_for("hr").is_none());
    }
}
