//! Bookmarks recorded in the singer state file so that the incremental replication following a
//! fastsync resumes from the position the export started at.

use fastsync_config::shared::{Catalog, ReplicationMethod};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::source::SourceConnection;
use crate::table::TableName;
use crate::types::is_reserved_column;

const BOOKMARK_VERSION: u32 = 1;

/// Position in a source database's change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPosition {
    /// Postgres write-ahead log position, `(hi << 32) | lo`.
    Lsn(u64),
    /// MySQL binary log coordinates.
    Binlog { file: String, position: u64 },
}

/// A bookmark as singer taps read it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bookmark {
    Postgres {
        lsn: u64,
        version: u32,
    },
    MySql {
        log_file: String,
        log_pos: u64,
        version: u32,
    },
    Incremental {
        replication_key: String,
        replication_key_value: Value,
        version: u32,
    },
}

impl From<LogPosition> for Bookmark {
    fn from(position: LogPosition) -> Self {
        match position {
            LogPosition::Lsn(lsn) => Bookmark::Postgres {
                lsn,
                version: BOOKMARK_VERSION,
            },
            LogPosition::Binlog { file, position } => Bookmark::MySql {
                log_file: file,
                log_pos: position,
                version: BOOKMARK_VERSION,
            },
        }
    }
}

/// Parses a Postgres textual LSN such as `16/B374D848`.
pub fn parse_lsn(lsn: &str) -> SyncResult<u64> {
    let Some((hi, lo)) = lsn.trim().split_once('/') else {
        bail!(ErrorKind::InvalidData, "Invalid LSN format", lsn);
    };

    let hi = u64::from_str_radix(hi, 16)?;
    let lo = u64::from_str_radix(lo, 16)?;

    Ok((hi << 32) | lo)
}

/// Captures the bookmark of `table` according to its replication method in the catalog.
///
/// A table selected without a schema is looked up in the catalog under `default_schema`.
/// Tables without a catalog entry or replicated with `FULL_TABLE` get no bookmark.
pub async fn capture_bookmark<C>(
    connection: &mut C,
    table: &TableName,
    default_schema: Option<&str>,
    catalog: &Catalog,
) -> SyncResult<Option<Bookmark>>
where
    C: SourceConnection + Send,
{
    let catalog_name = table.with_default_schema(default_schema).qualified_name();
    let Some(replication) = catalog.replication_for(&catalog_name) else {
        debug!(table = %table, "table not in catalog, no bookmark captured");
        return Ok(None);
    };

    match replication.method {
        Some(ReplicationMethod::LogBased) => {
            let position = connection.log_position().await?;

            Ok(Some(position.into()))
        }
        Some(ReplicationMethod::Incremental) => {
            let Some(key) = replication.replication_key else {
                bail!(
                    ErrorKind::ReplicationKeyNotFound,
                    "No replication key configured for incremental table",
                    table
                );
            };

            let columns = connection.table_columns(table).await?;
            let Some(column) = columns
                .iter()
                .find(|column| column.name == key && !is_reserved_column(&column.name))
            else {
                bail!(
                    ErrorKind::ReplicationKeyNotFound,
                    "Replication key is not a column of the table",
                    format!("{table}.{key}")
                );
            };

            let value = connection.max_value(table, &column.name).await?;

            Ok(Some(Bookmark::Incremental {
                replication_key: key,
                replication_key_value: value,
                version: BOOKMARK_VERSION,
            }))
        }
        Some(ReplicationMethod::FullTable) | None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::source::MemorySource;
    use crate::source::Source;
    use crate::types::SourceColumn;
    use serde_json::json;

    fn catalog(method: &str, key: Option<&str>) -> Catalog {
        let mut metadata = json!({
            "schema-name": "public",
            "replication-method": method,
        });
        if let Some(key) = key {
            metadata["replication-key"] = json!(key);
        }

        serde_json::from_value(json!({
            "streams": [{
                "tap_stream_id": "public-orders",
                "table_name": "orders",
                "metadata": [{"breadcrumb": [], "metadata": metadata}]
            }]
        }))
        .unwrap()
    }

    fn source() -> MemorySource {
        MemorySource::new("shop").with_table(
            "public.orders",
            vec![
                SourceColumn::new("id", "integer"),
                SourceColumn::new("updated_at", "timestamp"),
            ],
            vec![vec![Some("1".into()), Some("2024-01-01 00:00:00".into())]],
        )
    }

    #[test]
    fn test_parse_lsn() {
        assert_eq!(parse_lsn("0/16B3748").unwrap(), 0x16B3748);
        assert_eq!(parse_lsn("16/B374D848").unwrap(), (0x16 << 32) | 0xB374D848);
        assert!(parse_lsn("16B374D848").is_err());
        assert!(parse_lsn("zz/1").is_err());
    }

    #[test]
    fn test_bookmark_serialization() {
        let postgres: Bookmark = LogPosition::Lsn(108).into();
        let mysql: Bookmark = LogPosition::Binlog {
            file: "mysql-bin.000004".into(),
            position: 1234,
        }
        .into();

        assert_eq!(
            serde_json::to_string(&postgres).unwrap(),
            r#"{"lsn":108,"version":1}"#
        );
        assert_eq!(
            serde_json::to_string(&mysql).unwrap(),
            r#"{"log_file":"mysql-bin.000004","log_pos":1234,"version":1}"#
        );
    }

    #[tokio::test]
    async fn test_log_based_bookmark() {
        let source = source().with_log_position(LogPosition::Lsn(42));
        let mut connection = source.connect().await.unwrap();
        let table = TableName::parse("public.orders").unwrap();

        let bookmark = capture_bookmark(&mut connection, &table, None, &catalog("LOG_BASED", None))
            .await
            .unwrap();

        assert_eq!(
            bookmark,
            Some(Bookmark::Postgres {
                lsn: 42,
                version: 1
            })
        );
    }

    #[tokio::test]
    async fn test_bare_table_is_looked_up_under_the_default_schema() {
        let source = source().with_log_position(LogPosition::Lsn(5));
        let mut connection = source.connect().await.unwrap();
        let table = TableName::parse("orders").unwrap();
        let catalog = catalog("LOG_BASED", None);

        let bookmark = capture_bookmark(&mut connection, &table, source.default_schema(), &catalog)
            .await
            .unwrap();
        let without_default = capture_bookmark(&mut connection, &table, None, &catalog)
            .await
            .unwrap();

        assert_eq!(
            bookmark,
            Some(Bookmark::Postgres {
                lsn: 5,
                version: 1
            })
        );
        assert_eq!(without_default, None);
    }

    #[tokio::test]
    async fn test_full_table_and_unknown_tables_have_no_bookmark() {
        let source = source();
        let mut connection = source.connect().await.unwrap();
        let table = TableName::parse("public.orders").unwrap();
        let other = TableName::parse("public.customers").unwrap();

        let full_table = catalog("FULL_TABLE", None);

        assert_eq!(
            capture_bookmark(&mut connection, &table, None, &full_table)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            capture_bookmark(&mut connection, &other, None, &catalog("LOG_BASED", None))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_incremental_bookmark_uses_max_value() {
        let source = source();
        let mut connection = source.connect().await.unwrap();
        let table = TableName::parse("public.orders").unwrap();

        let catalog = catalog("INCREMENTAL", Some("updated_at"));

        let bookmark = capture_bookmark(&mut connection, &table, None, &catalog)
            .await
            .unwrap();

        assert_eq!(
            bookmark,
            Some(Bookmark::Incremental {
                replication_key: "updated_at".into(),
                replication_key_value: json!("2024-01-01 00:00:00"),
                version: 1,
            })
        );
    }

    #[tokio::test]
    async fn test_incremental_without_usable_key_fails() {
        let source = source();
        let mut connection = source.connect().await.unwrap();
        let table = TableName::parse("public.orders").unwrap();

        let missing = capture_bookmark(&mut connection, &table, None, &catalog("INCREMENTAL", None))
            .await
            .unwrap_err();
        let unknown_key = catalog("INCREMENTAL", Some("created_at"));
        let unknown = capture_bookmark(&mut connection, &table, None, &unknown_key)
            .await
            .unwrap_err();

        assert_eq!(missing.kind(), ErrorKind::ReplicationKeyNotFound);
        assert_eq!(unknown.kind(), ErrorKind::ReplicationKeyNotFound);
    }
}
