use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// Suffix appended to a table name to build its temporary twin.
pub const TEMP_TABLE_SUFFIX: &str = "_temp";

/// A table selected for syncing, as written on the command line: `schema.table` or `table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    /// Parses a table identifier, splitting the schema off at the first `.`.
    pub fn parse(identifier: &str) -> SyncResult<TableName> {
        let identifier = identifier.trim();

        let (schema, name) = match identifier.split_once('.') {
            Some((schema, name)) => (Some(schema.trim()), name.trim()),
            None => (None, identifier),
        };

        if name.is_empty() || schema.is_some_and(str::is_empty) {
            bail!(
                ErrorKind::InvalidTableName,
                "Table identifier must be `schema.table` or `table`",
                identifier
            );
        }

        Ok(TableName {
            schema: schema.map(str::to_owned),
            name: name.to_owned(),
        })
    }

    /// Name of the temporary table the data is loaded into before the swap.
    ///
    /// The suffix is appended before any warehouse case normalization.
    pub fn temp_name(&self) -> String {
        format!("{}{TEMP_TABLE_SUFFIX}", self.name)
    }

    /// Stream name used to match transformation rules: `schema-table`, or `table`.
    pub fn stream_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}-{}", self.name),
            None => self.name.clone(),
        }
    }

    /// This table with `schema` filled in when it was selected without one.
    pub fn with_default_schema(&self, schema: Option<&str>) -> TableName {
        TableName {
            schema: self.schema.clone().or_else(|| schema.map(str::to_owned)),
            name: self.name.clone(),
        }
    }

    /// The identifier as it was selected, `schema.table` or `table`.
    pub fn qualified_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
