use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{MySqlConnectionConfig, PgConnectionConfig, ValidationError};

/// Configuration of a Postgres tap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PostgresTapConfig {
    #[serde(flatten)]
    pub connection: PgConnectionConfig,
    /// Logical replication slot checked before capturing a log based bookmark.
    ///
    /// Defaults to `pipelinewise_{dbname}`.
    pub slot_name: Option<String>,
}

impl PostgresTapConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.validate()
    }

    /// Returns the configured slot name or the default derived from the database name.
    pub fn slot_name(&self) -> String {
        match &self.slot_name {
            Some(slot_name) => slot_name.clone(),
            None => format!("pipelinewise_{}", self.connection.dbname.to_lowercase()),
        }
    }
}

impl Config for PostgresTapConfig {
    const ENV_SCOPE: &'static str = "TAP";
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// Configuration of a MySQL tap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MySqlTapConfig {
    #[serde(flatten)]
    pub connection: MySqlConnectionConfig,
}

impl MySqlTapConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.validate()
    }
}

impl Config for MySqlTapConfig {
    const ENV_SCOPE: &'static str = "TAP";
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_slot_name_uses_lowercase_dbname() {
        let config: PostgresTapConfig = serde_json::from_str(
            r#"{"host": "db", "user": "u", "dbname": "Shop"}"#,
        )
        .unwrap();

        assert_eq!(config.slot_name(), "pipelinewise_shop");
    }

    #[test]
    fn test_explicit_slot_name() {
        let config: PostgresTapConfig = serde_json::from_str(
            r#"{"host": "db", "user": "u", "dbname": "shop", "slot_name": "custom"}"#,
        )
        .unwrap();

        assert_eq!(config.slot_name(), "custom");
    }
}
