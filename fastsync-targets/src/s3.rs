use fastsync::error::{ErrorKind, SyncResult};
use fastsync_config::shared::S3StageConfig;
use object_store::RetryConfig;
use object_store::aws::AmazonS3Builder;
use secrecy::ExposeSecret;
use std::sync::Arc;

use crate::stage::{ObjectStoreStage, stage_error};

/// Opens the S3 bucket Redshift and Snowflake load from.
///
/// Credentials and region missing from the config are read from the usual `AWS_*`
/// environment variables.
pub fn s3_stage(config: &S3StageConfig) -> SyncResult<ObjectStoreStage> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(&config.s3_bucket)
        .with_retry(RetryConfig::default());

    if let Some(region) = &config.s3_region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = &config.s3_endpoint_url {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }
    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.aws_access_key_id, &config.aws_secret_access_key)
    {
        builder = builder
            .with_access_key_id(access_key_id.expose_secret())
            .with_secret_access_key(secret_access_key.expose_secret());
    }

    let store = builder
        .build()
        .map_err(|err| stage_error(ErrorKind::ConfigError, err))?;

    Ok(ObjectStoreStage::new(
        Arc::new(store),
        "s3",
        &config.s3_bucket,
        &config.s3_key_prefix,
    ))
}
