//! BigQuery query execution over the REST jobs api, staging through Google Cloud Storage.

use fastsync::error::{ErrorKind, SyncError, SyncResult};
use fastsync::target::dialect::BigQueryDialect;
use fastsync::target::warehouse::{QueryClient, WarehouseTarget};
use fastsync::{bail, sync_error};
use fastsync_config::shared::BigQueryTargetConfig;
use gcp_bigquery_client::Client;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::error_proto::ErrorProto;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::model::query_request::QueryRequest;
use object_store::RetryConfig;
use object_store::gcp::GoogleCloudStorageBuilder;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::encryption::install_crypto_provider;
use crate::stage::{ObjectStoreStage, stage_error};

/// How long one `getQueryResults` call waits for the job before returning.
const POLL_TIMEOUT_MS: i32 = 10_000;

/// Pause between polls of a job that is still running.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub type BigQueryTarget = WarehouseTarget<BigQueryDialect, BigQueryClient, ObjectStoreStage>;

/// Runs statements as BigQuery query jobs and waits for each job to complete.
#[derive(Clone)]
pub struct BigQueryClient {
    project_id: String,
    location: Option<String>,
    client: Client,
}

impl BigQueryClient {
    /// Creates a client authenticated with a service account key file, or with application
    /// default credentials when `key_file` is `None`.
    pub async fn new(
        project_id: impl Into<String>,
        location: Option<String>,
        key_file: Option<&str>,
    ) -> SyncResult<BigQueryClient> {
        install_crypto_provider();

        let client = match key_file {
            Some(key_file) => Client::from_service_account_key_file(key_file).await,
            None => Client::from_application_default_credentials().await,
        }
        .map_err(bq_error_to_sync_error)?;

        Ok(BigQueryClient {
            project_id: project_id.into(),
            location,
            client,
        })
    }

    fn query_request(&self, statement: &str) -> QueryRequest {
        let mut request = QueryRequest::new(statement);
        request.location = self.location.clone();
        request.use_legacy_sql = false;
        request
    }

    /// Runs one statement, polling until its job completes.
    async fn run_statement(&self, statement: &str) -> SyncResult<()> {
        let response = self
            .client
            .job()
            .query(&self.project_id, self.query_request(statement))
            .await
            .map_err(bq_error_to_sync_error)?;
        check_job_errors(response.errors.as_deref())?;

        if response.job_complete.unwrap_or(false) {
            return Ok(());
        }

        let Some(job) = response.job_reference else {
            bail!(
                ErrorKind::TargetQueryFailed,
                "BigQuery returned an incomplete job without reference"
            );
        };
        let Some(job_id) = job.job_id else {
            bail!(
                ErrorKind::TargetQueryFailed,
                "BigQuery returned a job reference without id"
            );
        };

        let parameters = GetQueryResultsParameters {
            location: job.location.or_else(|| self.location.clone()),
            timeout_ms: Some(POLL_TIMEOUT_MS),
            max_results: Some(0),
            ..Default::default()
        };

        loop {
            debug!(job_id = %job_id, "waiting for bigquery job");
            let results = self
                .client
                .job()
                .get_query_results(&self.project_id, &job_id, parameters.clone())
                .await
                .map_err(bq_error_to_sync_error)?;
            check_job_errors(results.errors.as_deref())?;

            if results.job_complete.unwrap_or(false) {
                return Ok(());
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl QueryClient for BigQueryClient {
    async fn execute(&self, statements: &[String]) -> SyncResult<()> {
        for statement in statements {
            self.run_statement(statement).await.map_err(|err| {
                debug!(statement = %statement, error = %err, "bigquery statement failed");
                err
            })?;
        }

        Ok(())
    }
}

/// Fails with every error a job reported.
fn check_job_errors(errors: Option<&[ErrorProto]>) -> SyncResult<()> {
    let errors: Vec<SyncError> = errors
        .unwrap_or_default()
        .iter()
        .map(|error| {
            sync_error!(
                ErrorKind::TargetQueryFailed,
                "BigQuery job failed",
                error.message.as_deref().unwrap_or("no message")
            )
        })
        .collect();

    if errors.is_empty() {
        return Ok(());
    }
    Err(SyncError::many(errors))
}

/// Builds a BigQuery target staging through the configured bucket.
pub async fn bigquery_target(config: &BigQueryTargetConfig) -> SyncResult<BigQueryTarget> {
    let client = BigQueryClient::new(
        &config.project_id,
        config.location.clone(),
        config.key_file.as_deref(),
    )
    .await?;

    let mut builder = GoogleCloudStorageBuilder::from_env()
        .with_bucket_name(&config.bucket_name)
        .with_retry(RetryConfig::default());
    if let Some(key_file) = &config.key_file {
        builder = builder.with_service_account_path(key_file);
    }
    let store = builder
        .build()
        .map_err(|err| stage_error(ErrorKind::ConfigError, err))?;

    info!(
        project_id = %config.project_id,
        bucket = %config.bucket_name,
        "bigquery target ready"
    );

    Ok(WarehouseTarget::new(
        BigQueryDialect::new(config.location.clone(), config.temp_schema.clone()),
        client,
        ObjectStoreStage::new(
            Arc::new(store),
            "gs",
            &config.bucket_name,
            &config.stage_prefix,
        ),
    ))
}

/// Converts a BigQuery client error into a [`SyncError`] of a matching kind.
fn bq_error_to_sync_error(err: BQError) -> SyncError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::InvalidApplicationDefaultCredentialsAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery application default credentials",
        ),
        BQError::AuthError(_) | BQError::YupAuthError(_) | BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication failed",
        ),
        BQError::RequestError(_) => (
            ErrorKind::TargetConnectionFailed,
            "BigQuery request failed",
        ),
        BQError::ResponseError { .. } => (
            ErrorKind::TargetQueryFailed,
            "BigQuery rejected the statement",
        ),
        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery JSON serialization error",
        ),
        _ => (ErrorKind::TargetError, "BigQuery client error"),
    };

    sync_error!(kind, description, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_error(message: &str) -> ErrorProto {
        ErrorProto {
            message: Some(message.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn test_job_errors_fail_the_statement() {
        assert!(check_job_errors(None).is_ok());
        assert!(check_job_errors(Some(&[])).is_ok());

        let err = check_job_errors(Some(&[job_error("Not found: Dataset acme:analytics")]))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TargetQueryFailed);
        assert!(err.to_string().contains("Not found: Dataset acme:analytics"));
    }

    #[test]
    fn test_every_job_error_is_reported() {
        let err = check_job_errors(Some(&[
            job_error("Invalid value for column amount"),
            job_error("Too many errors encountered"),
        ]))
        .unwrap_err();

        assert_eq!(
            err.kinds(),
            vec![ErrorKind::TargetQueryFailed, ErrorKind::TargetQueryFailed]
        );
        let message = err.to_string();
        assert!(message.contains("2 total"));
        assert!(message.contains("Invalid value for column amount"));
        assert!(message.contains("Too many errors encountered"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            bq_error_to_sync_error(BQError::NoToken).kind(),
            ErrorKind::AuthenticationError
        );
        assert_eq!(
            bq_error_to_sync_error(BQError::NoDataAvailable).kind(),
            ErrorKind::TargetError
        );
    }
}
