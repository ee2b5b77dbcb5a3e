use fastsync_config::shared::{IntoConnectOptions, MySqlTapConfig};
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlRow};
use sqlx::{Connection, Row};
use tracing::{debug, info, warn};

use crate::bail;
use crate::bookmark::LogPosition;
use crate::error::{ErrorKind, SyncResult};
use crate::source::{
    ExportFile, ExportWriter, Source, SourceConnection, csv_writer, take_chunk,
};
use crate::table::TableName;
use crate::types::{SourceColumn, SourceKind};

/// Rows buffered before a chunk is handed to the export writer.
const ROWS_PER_CHUNK: u64 = 10_000;

/// Column types exported as hex strings.
const BINARY_TYPES: [&str; 7] = [
    "binary",
    "varbinary",
    "blob",
    "tinyblob",
    "mediumblob",
    "longblob",
    "geometry",
];

fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// A MySQL tap database.
#[derive(Debug, Clone)]
pub struct MySqlSource {
    config: MySqlTapConfig,
}

impl MySqlSource {
    pub fn new(config: MySqlTapConfig) -> MySqlSource {
        MySqlSource { config }
    }
}

impl Source for MySqlSource {
    type Connection = MySqlConnection;

    fn kind(&self) -> SourceKind {
        SourceKind::MySql
    }

    fn database_name(&self) -> &str {
        self.config.connection.dbname.as_deref().unwrap_or_default()
    }

    fn default_schema(&self) -> Option<&str> {
        self.config.connection.dbname.as_deref()
    }

    fn stream_id(&self, table: &TableName) -> String {
        match &table.schema {
            Some(schema) => format!("{schema}-{}", table.name),
            None => table.name.clone(),
        }
    }

    async fn connect(&self) -> SyncResult<MySqlConnection> {
        let options: MySqlConnectOptions = self.config.connection.with_db();
        let connection = sqlx::MySqlConnection::connect_with(&options).await?;
        debug!(host = %self.config.connection.host, "connected to mysql");

        Ok(MySqlConnection { connection })
    }
}

/// A connection to the MySQL tap database used by one table sync.
pub struct MySqlConnection {
    connection: sqlx::MySqlConnection,
}

impl MySqlConnection {
    fn qualified_table(table: &TableName) -> String {
        match &table.schema {
            Some(schema) => format!(
                "{}.{}",
                quote_identifier(schema),
                quote_identifier(&table.name)
            ),
            None => quote_identifier(&table.name),
        }
    }

    fn export_expression(column: &SourceColumn) -> String {
        let quoted = quote_identifier(&column.name);

        if BINARY_TYPES.contains(&column.data_type.as_str()) {
            format!("HEX({quoted})")
        } else {
            format!("CAST({quoted} AS CHAR)")
        }
    }

    async fn binlog_status(&mut self, query: &str) -> SyncResult<Option<MySqlRow>> {
        Ok(sqlx::query(query)
            .fetch_optional(&mut self.connection)
            .await?)
    }
}

impl SourceConnection for MySqlConnection {
    async fn log_position(&mut self) -> SyncResult<LogPosition> {
        // Renamed in MySQL 8.4.
        let status = match self.binlog_status("SHOW MASTER STATUS").await {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "SHOW MASTER STATUS failed, trying SHOW BINARY LOG STATUS");
                self.binlog_status("SHOW BINARY LOG STATUS").await?
            }
        };

        let Some(row) = status else {
            bail!(
                ErrorKind::LogPositionUnavailable,
                "MySQL binary logging is not enabled"
            );
        };

        let file: String = row.try_get("File")?;
        let position: u64 = row.try_get("Position")?;

        Ok(LogPosition::Binlog { file, position })
    }

    async fn max_value(&mut self, table: &TableName, column: &str) -> SyncResult<serde_json::Value> {
        let query = format!(
            "SELECT CAST(JSON_ARRAY(MAX({})) AS CHAR) FROM {}",
            quote_identifier(column),
            Self::qualified_table(table)
        );

        let row = sqlx::query(&query).fetch_one(&mut self.connection).await?;
        let array: Option<String> = row.try_get(0)?;

        let value = match array {
            Some(array) => {
                let mut values: Vec<serde_json::Value> = serde_json::from_str(&array)?;
                values.pop().unwrap_or_default()
            }
            None => serde_json::Value::Null,
        };

        Ok(value)
    }

    async fn table_columns(&mut self, table: &TableName) -> SyncResult<Vec<SourceColumn>> {
        let rows = sqlx::query(
            "SELECT CAST(column_name AS CHAR), CAST(data_type AS CHAR), CAST(column_type AS CHAR) \
            FROM information_schema.columns \
            WHERE table_schema = COALESCE(?, DATABASE()) AND table_name = ? \
            ORDER BY ordinal_position",
        )
        .bind(table.schema.as_deref())
        .bind(&table.name)
        .fetch_all(&mut self.connection)
        .await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get(0)?;
                let data_type: String = row.try_get(1)?;
                let column_type: String = row.try_get(2)?;

                Ok(SourceColumn::new(name, data_type.to_lowercase()).with_column_type(column_type))
            })
            .collect()
    }

    async fn export_table(
        &mut self,
        table: &TableName,
        columns: &[SourceColumn],
        export: &ExportFile,
    ) -> SyncResult<u64> {
        let column_list = columns
            .iter()
            .map(Self::export_expression)
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT {column_list}, CAST(UTC_TIMESTAMP() AS CHAR), CAST(UTC_TIMESTAMP() AS CHAR), \
            CAST(NULL AS CHAR) FROM {}",
            Self::qualified_table(table)
        );
        let field_count = columns.len() + 3;

        let writer = ExportWriter::create(export);
        let mut csv = csv_writer();
        let mut rows = 0u64;
        let mut fields: Vec<Option<String>> = Vec::with_capacity(field_count);

        let mut stream = sqlx::query(&query).fetch(&mut self.connection);
        let result: SyncResult<()> = async {
            while let Some(row) = stream.try_next().await? {
                fields.clear();
                for index in 0..field_count {
                    fields.push(row.try_get(index)?);
                }
                csv.write_record(fields.iter().map(|field| field.as_deref().unwrap_or_default()))?;
                rows += 1;

                if rows % ROWS_PER_CHUNK == 0 {
                    writer.write(take_chunk(&mut csv)?).await?;
                }
            }

            writer.write(take_chunk(&mut csv)?).await?;

            Ok(())
        }
        .await;
        drop(stream);

        if let Err(err) = result {
            return Err(writer.abort().await.unwrap_or(err));
        }

        writer.finish().await?;
        info!(table = %table, rows, "table exported");

        Ok(rows)
    }

    async fn close(self) -> SyncResult<()> {
        self.connection.close().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_expressions() {
        assert_eq!(
            MySqlConnection::export_expression(&SourceColumn::new("payload", "varbinary")),
            "HEX(`payload`)"
        );
        assert_eq!(
            MySqlConnection::export_expression(&SourceColumn::new("created", "datetime")),
            "CAST(`created` AS CHAR)"
        );
    }

    #[test]
    fn test_identifiers_are_backtick_quoted() {
        assert_eq!(
            MySqlConnection::qualified_table(&TableName::parse("shop.or`ders").unwrap()),
            "`shop`.`or``ders`"
        );
    }

    #[test]
    fn test_stream_id_has_no_database_prefix() {
        let config: MySqlTapConfig =
            serde_json::from_str(r#"{"host": "db", "user": "u", "dbname": "shop"}"#).unwrap();
        let source = MySqlSource::new(config);

        assert_eq!(
            source.stream_id(&TableName::parse("shop.orders").unwrap()),
            "shop-orders"
        );
        assert_eq!(source.database_name(), "shop");
    }
}
