//! Snowflake query execution over the SQL API, loading from an external S3 stage.

use fastsync::error::{ErrorKind, SyncError, SyncResult};
use fastsync::target::dialect::SnowflakeDialect;
use fastsync::target::warehouse::{QueryClient, WarehouseTarget};
use fastsync::{bail, sync_error};
use fastsync_config::shared::{SnowflakeTargetConfig, SnowflakeTokenType};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::encryption::install_crypto_provider;
use crate::s3::s3_stage;
use crate::stage::ObjectStoreStage;

/// Seconds Snowflake lets one statement run before cancelling it.
const STATEMENT_TIMEOUT_SECS: u64 = 3600;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";

pub type SnowflakeTarget = WarehouseTarget<SnowflakeDialect, SnowflakeClient, ObjectStoreStage>;

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    database: &'a str,
    warehouse: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

/// Body of both the accepted (202) and the failed responses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementStatus {
    statement_status_url: Option<String>,
    message: Option<String>,
    sql_state: Option<String>,
}

/// Runs statements through the Snowflake SQL API, one request per statement.
#[derive(Clone)]
pub struct SnowflakeClient {
    http: Client,
    base_url: String,
    database: String,
    warehouse: String,
    role: Option<String>,
    token: SecretString,
    token_type: SnowflakeTokenType,
}

impl SnowflakeClient {
    pub fn new(config: &SnowflakeTargetConfig) -> SyncResult<SnowflakeClient> {
        install_crypto_provider();

        let http = Client::builder()
            .user_agent(concat!("fastsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                sync_error!(
                    ErrorKind::ConfigError,
                    "Failed to build the Snowflake http client",
                    err
                )
            })?;

        Ok(SnowflakeClient {
            http,
            base_url: format!("https://{}.snowflakecomputing.com", config.account),
            database: config.dbname.clone(),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            token: SecretString::from(config.token.expose_secret().to_owned()),
            token_type: config.token_type,
        })
    }

    /// Points the client at another host, for example a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> SnowflakeClient {
        self.base_url = base_url.into();
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(self.token.expose_secret())
            .header(TOKEN_TYPE_HEADER, self.token_type.header_value())
            .header(reqwest::header::ACCEPT, "application/json")
    }

    fn statement_request<'a>(&'a self, statement: &'a str) -> StatementRequest<'a> {
        StatementRequest {
            statement,
            timeout: STATEMENT_TIMEOUT_SECS,
            database: &self.database,
            warehouse: &self.warehouse,
            role: self.role.as_deref(),
        }
    }

    async fn run_statement(&self, statement: &str) -> SyncResult<()> {
        let response = self
            .authorize(self.http.post(format!("{}/api/v2/statements", self.base_url)))
            .json(&self.statement_request(statement))
            .send()
            .await
            .map_err(request_error)?;

        let mut status = response.status();
        let mut body: StatementStatus = read_status(response).await?;

        while status == StatusCode::ACCEPTED {
            let Some(status_url) = body.statement_status_url.take() else {
                bail!(
                    ErrorKind::TargetQueryFailed,
                    "Snowflake accepted a statement without a status url"
                );
            };

            debug!(status_url = %status_url, "waiting for snowflake statement");
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .authorize(self.http.get(format!("{}{status_url}", self.base_url)))
                .send()
                .await
                .map_err(request_error)?;
            status = response.status();
            body = read_status(response).await?;
            body.statement_status_url.get_or_insert(status_url);
        }

        if status.is_success() {
            return Ok(());
        }

        Err(statement_error(status, &body))
    }
}

impl fmt::Debug for SnowflakeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeClient")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl QueryClient for SnowflakeClient {
    async fn execute(&self, statements: &[String]) -> SyncResult<()> {
        for statement in statements {
            self.run_statement(statement).await?;
        }

        Ok(())
    }
}

/// Reads a status body. Result sets of successful statements are ignored.
async fn read_status(response: reqwest::Response) -> SyncResult<StatementStatus> {
    let bytes = response.bytes().await.map_err(request_error)?;

    Ok(serde_json::from_slice(&bytes).unwrap_or_default())
}

fn statement_error(status: StatusCode, body: &StatementStatus) -> SyncError {
    let kind = match status {
        StatusCode::UNAUTHORIZED => ErrorKind::AuthenticationError,
        StatusCode::FORBIDDEN => ErrorKind::PermissionDenied,
        _ => ErrorKind::TargetQueryFailed,
    };

    sync_error!(
        kind,
        "Snowflake statement failed",
        format!(
            "{status}: {} (sql state {})",
            body.message.as_deref().unwrap_or("no message"),
            body.sql_state.as_deref().unwrap_or("unknown")
        )
    )
}

fn request_error(err: reqwest::Error) -> SyncError {
    sync_error!(
        ErrorKind::TargetConnectionFailed,
        "Snowflake request failed",
        err
    )
}

/// Builds a Snowflake target loading from the configured external stage.
pub fn snowflake_target(config: &SnowflakeTargetConfig) -> SyncResult<SnowflakeTarget> {
    let client = SnowflakeClient::new(config)?;
    let stage = s3_stage(&config.s3)?;

    info!(
        account = %config.account,
        warehouse = %config.warehouse,
        stage = %config.stage,
        "snowflake target ready"
    );

    Ok(WarehouseTarget::new(
        SnowflakeDialect::new(&config.stage),
        client,
        stage,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SnowflakeTargetConfig {
        serde_json::from_str(
            r#"{
                "account": "acme-eu", "dbname": "ANALYTICS", "warehouse": "LOAD_WH",
                "role": "LOADER", "token": "t0ken", "stage": "raw.fastsync_stage",
                "s3_bucket": "stage"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_statement_request_body() {
        let client = SnowflakeClient::new(&config()).unwrap();

        let body = serde_json::to_value(client.statement_request("SELECT 1")).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "statement": "SELECT 1",
                "timeout": 3600,
                "database": "ANALYTICS",
                "warehouse": "LOAD_WH",
                "role": "LOADER"
            })
        );
        assert_eq!(client.base_url, "https://acme-eu.snowflakecomputing.com");
    }

    #[test]
    fn test_debug_hides_token() {
        let client = SnowflakeClient::new(&config()).unwrap();

        assert!(!format!("{client:?}").contains("t0ken"));
    }

    #[test]
    fn test_statement_error_kinds() {
        let body: StatementStatus = serde_json::from_str(
            r#"{"code": "002003", "message": "Table 'X' does not exist", "sqlState": "02000"}"#,
        )
        .unwrap();

        let err = statement_error(StatusCode::UNPROCESSABLE_ENTITY, &body);
        assert_eq!(err.kind(), ErrorKind::TargetQueryFailed);
        assert!(err.to_string().contains("Table 'X' does not exist"));
        assert!(err.to_string().contains("02000"));

        assert_eq!(
            statement_error(StatusCode::UNAUTHORIZED, &StatementStatus::default()).kind(),
            ErrorKind::AuthenticationError
        );
    }
}
