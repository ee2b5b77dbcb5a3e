//! Resolution of destination schemas and grantees from the static target configuration.
//!
//! Every table is resolved before any table work starts, a table without a destination schema
//! is a configuration error that aborts the whole run.

use std::collections::HashMap;

use fastsync_config::shared::{Grantee, TargetSchemaConfig};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::table::TableName;

/// Where a table lands and who may read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    pub table: TableName,
    pub target_schema: String,
    pub grantees: Vec<Grantee>,
}

impl TablePlan {
    pub fn resolve(table: &TableName, config: &TargetSchemaConfig) -> SyncResult<TablePlan> {
        Ok(TablePlan {
            table: table.clone(),
            target_schema: resolve_target_schema(table, config)?,
            grantees: resolve_grantees(table, config),
        })
    }
}

/// Returns the destination schema of a table.
///
/// A `schema_mapping` entry for the source schema wins over `default_target_schema`. A mapping
/// entry without `target_schema` does not fall back to the default.
pub fn resolve_target_schema(table: &TableName, config: &TargetSchemaConfig) -> SyncResult<String> {
    let mapping = table
        .schema
        .as_deref()
        .and_then(|schema| config.mapping_for(schema));

    let target_schema = match mapping {
        Some(entry) => entry
            .target_schema
            .as_deref()
            .map(str::trim)
            .filter(|schema| !schema.is_empty()),
        None => config.default_target_schema(),
    };

    match target_schema {
        Some(schema) => Ok(schema.to_owned()),
        None => bail!(
            ErrorKind::ConfigError,
            "Target schema name not defined in config, set `default_target_schema` or a `schema_mapping` entry",
            table
        ),
    }
}

/// Returns the grantees of a table's destination schema.
///
/// A `schema_mapping` entry replaces the default permissions entirely, even when it has none.
pub fn resolve_grantees(table: &TableName, config: &TargetSchemaConfig) -> Vec<Grantee> {
    let mapping = table
        .schema
        .as_deref()
        .and_then(|schema| config.mapping_for(schema));

    let permissions = match mapping {
        Some(entry) => entry.target_schema_select_permissions.as_ref(),
        None => config.default_target_schema_select_permissions.as_ref(),
    };

    permissions.map(|p| p.grantees()).unwrap_or_default()
}

/// Resolves every table, failing on the first table without a destination schema.
pub fn resolve_plans(tables: &[TableName], config: &TargetSchemaConfig) -> SyncResult<Vec<TablePlan>> {
    tables
        .iter()
        .map(|table| TablePlan::resolve(table, config))
        .collect()
}

/// Distinct destination schemas in first-seen order.
pub fn distinct_target_schemas(plans: &[TablePlan]) -> Vec<String> {
    let mut schemas: Vec<String> = Vec::new();
    for plan in plans {
        if !schemas.contains(&plan.target_schema) {
            schemas.push(plan.target_schema.clone());
        }
    }

    schemas
}

/// Rejects runs where two selected tables would write to the same warehouse table: a shared
/// destination name, a shared temporary table, or one table's temporary table being another
/// selected table.
///
/// `temp_schema` maps a destination schema to the schema its temporary tables are created in.
/// Names are compared case-insensitively since warehouses normalize identifier case.
pub fn check_temp_table_collisions<F>(plans: &[TablePlan], temp_schema: F) -> SyncResult<()>
where
    F: Fn(&str) -> String,
{
    let mut live_tables: HashMap<(String, String), &TableName> = HashMap::new();
    for plan in plans {
        let key = (
            plan.target_schema.to_lowercase(),
            plan.table.name.to_lowercase(),
        );

        if let Some(other) = live_tables.insert(key, &plan.table)
            && *other != plan.table
        {
            bail!(
                ErrorKind::ConfigError,
                "Selected tables are loaded into the same target table",
                format!("{} and {}", plan.table, other)
            );
        }
    }

    let mut temp_tables: HashMap<(String, String), &TableName> = HashMap::new();
    for plan in plans {
        let key = (
            temp_schema(&plan.target_schema).to_lowercase(),
            plan.table.temp_name().to_lowercase(),
        );

        if let Some(other) = live_tables.get(&key) {
            bail!(
                ErrorKind::ConfigError,
                "Temporary table of a selected table collides with another selected table",
                format!("{} and {}", plan.table, other)
            );
        }
        if let Some(other) = temp_tables.insert(key, &plan.table)
            && *other != plan.table
        {
            bail!(
                ErrorKind::ConfigError,
                "Selected tables share the same temporary table",
                format!("{} and {}", plan.table, other)
            );
        }
    }

    Ok(())
}
