use bytes::Bytes;
use fastsync_config::shared::{IntoConnectOptions, PgConnectionConfig, PostgresTapConfig};
use futures::StreamExt;
use pg_escape::{quote_identifier, quote_literal};
use rustls::ClientConfig;
use std::io::BufReader;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, SimpleQueryMessage, SimpleQueryRow, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info};

use crate::bail;
use crate::bookmark::{LogPosition, parse_lsn};
use crate::error::{ErrorKind, SyncResult};
use crate::source::{ExportFile, ExportWriter, Source, SourceConnection};
use crate::sync_error;
use crate::table::TableName;
use crate::types::{SourceColumn, SourceKind};

const DEFAULT_SCHEMA: &str = "public";

/// Spawns a background task driving a Postgres connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        if let Err(e) = connection.await {
            error!("an error occurred during the Postgres connection: {}", e);
            return;
        }

        debug!("postgres connection terminated successfully")
    }
    .instrument(span);

    tokio::spawn(task);
}

/// Opens a client to a Postgres-protocol server, with TLS when configured.
///
/// Used for the Postgres tap and for Redshift.
pub async fn connect_postgres(config: &PgConnectionConfig) -> SyncResult<Client> {
    let options: Config = config.with_db();

    if !config.tls.enabled {
        let (client, connection) = options.connect(NoTls).await?;
        spawn_postgres_connection::<NoTls>(connection);
        debug!(host = %config.host, "connected to postgres without tls");

        return Ok(client);
    }

    let mut root_store = rustls::RootCertStore::empty();
    let mut root_certs_reader = BufReader::new(config.tls.trusted_root_certs.as_bytes());
    for cert in rustls_pemfile::certs(&mut root_certs_reader) {
        let cert = cert?;
        root_store.add(cert)?;
    }

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let (client, connection) = options.connect(MakeRustlsConnect::new(tls_config)).await?;
    spawn_postgres_connection::<MakeRustlsConnect>(connection);
    debug!(host = %config.host, "connected to postgres with tls");

    Ok(client)
}

/// A Postgres tap database.
#[derive(Debug, Clone)]
pub struct PostgresSource {
    config: PostgresTapConfig,
}

impl PostgresSource {
    pub fn new(config: PostgresTapConfig) -> PostgresSource {
        PostgresSource { config }
    }
}

impl Source for PostgresSource {
    type Connection = PostgresConnection;

    fn kind(&self) -> SourceKind {
        SourceKind::Postgres
    }

    fn database_name(&self) -> &str {
        &self.config.connection.dbname
    }

    fn default_schema(&self) -> Option<&str> {
        Some(DEFAULT_SCHEMA)
    }

    fn stream_id(&self, table: &TableName) -> String {
        format!(
            "{}-{}-{}",
            self.config.connection.dbname,
            table.schema.as_deref().unwrap_or(DEFAULT_SCHEMA),
            table.name
        )
    }

    async fn connect(&self) -> SyncResult<PostgresConnection> {
        let client = connect_postgres(&self.config.connection).await?;

        Ok(PostgresConnection {
            client,
            slot_name: self.config.slot_name(),
        })
    }
}

/// A connection to the Postgres tap database used by one table sync.
pub struct PostgresConnection {
    client: Client,
    slot_name: String,
}

impl PostgresConnection {
    async fn query_single_value(&self, query: &str, column: &str) -> SyncResult<Option<String>> {
        for message in self.client.simple_query(query).await? {
            if let SimpleQueryMessage::Row(row) = message {
                return Ok(row.try_get(column)?.map(str::to_owned));
            }
        }

        Ok(None)
    }

    async fn ensure_replication_slot(&self) -> SyncResult<()> {
        let query = format!(
            "select slot_name from pg_replication_slots where slot_name = {};",
            quote_literal(&self.slot_name)
        );

        if self.query_single_value(&query, "slot_name").await?.is_none() {
            bail!(
                ErrorKind::ReplicationSlotNotFound,
                "Replication slot not found",
                format!("Replication slot '{}' not found in database", self.slot_name)
            );
        }

        Ok(())
    }

    /// Column expression exported for a column, in its textual form.
    fn export_expression(column: &SourceColumn) -> String {
        let quoted = quote_identifier(&column.name);

        match column.data_type.as_str() {
            "ARRAY" => format!("array_to_json({quoted})"),
            // `24:00:00` is valid in Postgres only.
            "time" | "time without time zone" => {
                format!("replace({quoted}::varchar, '24:00:00', '00:00:00')")
            }
            _ => quoted.into_owned(),
        }
    }
}

fn qualified_table(table: &TableName) -> String {
    format!(
        "{}.{}",
        quote_identifier(table.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)),
        quote_identifier(&table.name)
    )
}

fn get_row_value<'a>(row: &'a SimpleQueryRow, column: &str) -> SyncResult<&'a str> {
    row.try_get(column)?.ok_or_else(|| {
        sync_error!(
            ErrorKind::SourceSchemaError,
            "Column not found",
            format!("Column '{column}' is null in information_schema.columns")
        )
    })
}

impl SourceConnection for PostgresConnection {
    async fn log_position(&mut self) -> SyncResult<LogPosition> {
        self.ensure_replication_slot().await?;

        // A standby has no current WAL position, it reports the last replayed one.
        let query = "select case when pg_is_in_recovery() \
            then pg_last_wal_replay_lsn() else pg_current_wal_lsn() end as current_lsn;";
        let Some(lsn) = self.query_single_value(query, "current_lsn").await? else {
            bail!(
                ErrorKind::LogPositionUnavailable,
                "Postgres did not report a WAL position"
            );
        };

        Ok(LogPosition::Lsn(parse_lsn(&lsn)?))
    }

    async fn max_value(&mut self, table: &TableName, column: &str) -> SyncResult<serde_json::Value> {
        let query = format!(
            "select to_json(max({}))::text as max_value from {};",
            quote_identifier(column),
            qualified_table(table)
        );

        match self.query_single_value(&query, "max_value").await? {
            Some(value) => Ok(serde_json::from_str(&value)?),
            None => Ok(serde_json::Value::Null),
        }
    }

    async fn table_columns(&mut self, table: &TableName) -> SyncResult<Vec<SourceColumn>> {
        let query = format!(
            "select column_name, data_type from information_schema.columns \
            where table_schema = {} and table_name = {} order by ordinal_position;",
            quote_literal(table.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)),
            quote_literal(&table.name)
        );

        let mut columns = vec![];
        for message in self.client.simple_query(&query).await? {
            if let SimpleQueryMessage::Row(row) = message {
                columns.push(SourceColumn::new(
                    get_row_value(&row, "column_name")?,
                    get_row_value(&row, "data_type")?,
                ));
            }
        }

        Ok(columns)
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

        let copy_query = format!(
            "copy (select {column_list}, now() at time zone 'UTC', now() at time zone 'UTC', null \
            from {}) to stdout with csv;",
            qualified_table(table)
        );

        let stream = self.client.copy_out(copy_query.as_str()).await?;
        let writer = ExportWriter::create(export);
        let mut stream = std::pin::pin!(stream);
        let mut rows = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    writer.abort().await;
                    return Err(err.into());
                }
            };

            // Postgres sends one copy message per row.
            rows += 1;
            if let Err(err) = writer.write(chunk).await {
                return Err(writer.abort().await.unwrap_or(err));
            }
        }

        writer.finish().await?;
        info!(table = %table, rows, "table exported");

        Ok(rows)
    }

    async fn close(self) -> SyncResult<()> {
        // Dropping the client terminates the connection task.
        drop(self.client);

        Ok(())
    }
}
