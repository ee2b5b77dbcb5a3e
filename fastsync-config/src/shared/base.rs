use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,

    #[error("`{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("`max_parallelism` cannot be zero")]
    MaxParallelismZero,

    /// Redshift needs either an IAM role or a key pair to read from S3.
    #[error(
        "Invalid Redshift config: set `aws_redshift_copy_role_arn` or both `aws_access_key_id` and `aws_secret_access_key`"
    )]
    MissingCopyCredentials,

    /// Only one of the two AWS keys was configured.
    #[error("Invalid S3 config: `aws_access_key_id` and `aws_secret_access_key` must be set together")]
    IncompleteAwsKeyPair,

    /// BigQuery grants need a typed principal, groups get `group:` added automatically.
    #[error(
        "Invalid BigQuery grantee `{0}`: use a principal such as `user:{0}`, `group:{0}` or `serviceAccount:{0}`"
    )]
    UnqualifiedBigQueryPrincipal(String),
}
