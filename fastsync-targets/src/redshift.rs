//! Redshift query execution over the Postgres wire protocol, staging through S3.

use fastsync::error::{ErrorKind, SyncResult};
use fastsync::source::connect_postgres;
use fastsync::sync_error;
use fastsync::target::dialect::{RedshiftCopyCredentials, RedshiftDialect};
use fastsync::target::warehouse::{QueryClient, WarehouseTarget};
use fastsync_config::shared::{PgConnectionConfig, RedshiftTargetConfig};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::s3::s3_stage;
use crate::stage::ObjectStoreStage;

pub type RedshiftTarget = WarehouseTarget<RedshiftDialect, RedshiftClient, ObjectStoreStage>;

/// Runs statements on a Redshift cluster.
///
/// Every call to [`QueryClient::execute`] opens its own connection, so a transaction spanning
/// several statements never shares a session with another table's statements.
#[derive(Debug, Clone)]
pub struct RedshiftClient {
    config: PgConnectionConfig,
}

impl RedshiftClient {
    pub fn new(config: PgConnectionConfig) -> RedshiftClient {
        RedshiftClient { config }
    }
}

impl QueryClient for RedshiftClient {
    async fn execute(&self, statements: &[String]) -> SyncResult<()> {
        let client = connect_postgres(&self.config).await.map_err(|err| {
            sync_error!(
                ErrorKind::TargetConnectionFailed,
                "Failed to connect to Redshift",
                err
            )
        })?;

        for statement in statements {
            debug!(statement = %statement, "running redshift statement");
            client.batch_execute(statement).await.map_err(|err| {
                sync_error!(
                    ErrorKind::TargetQueryFailed,
                    "Redshift statement failed",
                    err
                )
            })?;
        }

        Ok(())
    }
}

/// Credentials the `COPY` command reads the stage with. The role wins over the key pair.
fn copy_credentials(config: &RedshiftTargetConfig) -> SyncResult<RedshiftCopyCredentials> {
    if let Some(role_arn) = &config.aws_redshift_copy_role_arn {
        return Ok(RedshiftCopyCredentials::IamRole(role_arn.clone()));
    }

    match (&config.stage.aws_access_key_id, &config.stage.aws_secret_access_key) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(RedshiftCopyCredentials::Keys {
            access_key_id: access_key_id.expose_secret().to_owned(),
            secret_access_key: secret_access_key.expose_secret().to_owned().into(),
        }),
        _ => Err(sync_error!(
            ErrorKind::ConfigError,
            "Redshift COPY needs aws_redshift_copy_role_arn or an AWS key pair"
        )),
    }
}

/// Builds a Redshift target staging through the configured S3 bucket.
pub fn redshift_target(config: &RedshiftTargetConfig) -> SyncResult<RedshiftTarget> {
    let credentials = copy_credentials(config)?;
    let stage = s3_stage(&config.stage)?;

    info!(
        host = %config.connection.host,
        bucket = %config.stage.s3_bucket,
        "redshift target ready"
    );

    Ok(WarehouseTarget::new(
        RedshiftDialect::new(credentials),
        RedshiftClient::new(config.connection.clone()),
        stage,
    ))
}
