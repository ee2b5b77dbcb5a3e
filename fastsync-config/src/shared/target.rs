use serde::{Deserialize, Serialize};

use crate::shared::{Grantee, PgConnectionConfig, TargetSchemaConfig, ValidationError};
use crate::{Config, SerializableSecretString};

/// Default object key prefix for files staged in Google Cloud Storage.
const DEFAULT_GCS_STAGE_PREFIX: &str = "fastsync/";

fn default_gcs_stage_prefix() -> String {
    DEFAULT_GCS_STAGE_PREFIX.to_owned()
}

/// Keys of target configs that are split on `,` when set through the environment.
const TARGET_LIST_PARSE_KEYS: &[&str] = &["default_target_schema_select_permissions"];

/// S3 bucket used to stage exports for Redshift and Snowflake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct S3StageConfig {
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_key_prefix: String,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3 compatible object stores.
    pub s3_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<SerializableSecretString>,
    pub aws_secret_access_key: Option<SerializableSecretString>,
}

impl S3StageConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.s3_bucket.trim().is_empty() {
            return Err(ValidationError::EmptyField("s3_bucket"));
        }
        if self.aws_access_key_id.is_some() != self.aws_secret_access_key.is_some() {
            return Err(ValidationError::IncompleteAwsKeyPair);
        }

        Ok(())
    }
}

/// Configuration of a BigQuery target staging through Google Cloud Storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BigQueryTargetConfig {
    pub project_id: String,
    /// Dataset location, for example `EU`. Jobs run in the default location when unset.
    pub location: Option<String>,
    /// Bucket holding staged export files.
    pub bucket_name: String,
    #[serde(default = "default_gcs_stage_prefix")]
    pub stage_prefix: String,
    /// Path to a service account key file. Application default credentials are used when
    /// unset.
    pub key_file: Option<String>,
    /// Dataset that holds temporary tables instead of the target dataset.
    pub temp_schema: Option<String>,
    #[serde(flatten)]
    pub schema: TargetSchemaConfig,
}

impl BigQueryTargetConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.project_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("project_id"));
        }
        if self.bucket_name.trim().is_empty() {
            return Err(ValidationError::EmptyField("bucket_name"));
        }
        for grantee in self.schema.all_grantees() {
            if let Grantee::Role(name) = grantee
                && !name.contains(':')
            {
                return Err(ValidationError::UnqualifiedBigQueryPrincipal(name));
            }
        }

        Ok(())
    }
}

impl Config for BigQueryTargetConfig {
    const ENV_SCOPE: &'static str = "TARGET";
    const LIST_PARSE_KEYS: &'static [&'static str] = TARGET_LIST_PARSE_KEYS;
}

/// Configuration of a Redshift target staging through S3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedshiftTargetConfig {
    #[serde(flatten)]
    pub connection: PgConnectionConfig,
    #[serde(flatten)]
    pub stage: S3StageConfig,
    /// IAM role Redshift assumes to read staged files. Takes precedence over the key pair.
    pub aws_redshift_copy_role_arn: Option<String>,
    #[serde(flatten)]
    pub schema: TargetSchemaConfig,
}

impl RedshiftTargetConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.validate()?;
        self.stage.validate()?;

        if self.aws_redshift_copy_role_arn.is_none() && self.stage.aws_access_key_id.is_none() {
            return Err(ValidationError::MissingCopyCredentials);
        }

        Ok(())
    }
}

impl Config for RedshiftTargetConfig {
    const ENV_SCOPE: &'static str = "TARGET";
    const LIST_PARSE_KEYS: &'static [&'static str] = TARGET_LIST_PARSE_KEYS;
}

/// Token types accepted by the Snowflake SQL API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnowflakeTokenType {
    #[default]
    Oauth,
    KeypairJwt,
    ProgrammaticAccessToken,
}

impl SnowflakeTokenType {
    /// Value of the `X-Snowflake-Authorization-Token-Type` header.
    pub fn header_value(&self) -> &'static str {
        match self {
            SnowflakeTokenType::Oauth => "OAUTH",
            SnowflakeTokenType::KeypairJwt => "KEYPAIR_JWT",
            SnowflakeTokenType::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
        }
    }
}

/// Configuration of a Snowflake target loading from an external S3 stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SnowflakeTargetConfig {
    /// Account identifier, the host name prefix of `{account}.snowflakecomputing.com`.
    pub account: String,
    pub dbname: String,
    pub warehouse: String,
    pub role: Option<String>,
    pub token: SerializableSecretString,
    #[serde(default)]
    pub token_type: SnowflakeTokenType,
    /// Fully qualified external stage pointing at the root of `s3_bucket`.
    pub stage: String,
    #[serde(flatten)]
    pub s3: S3StageConfig,
    #[serde(flatten)]
    pub schema: TargetSchemaConfig,
}

impl SnowflakeTargetConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.account.trim().is_empty() {
            return Err(ValidationError::EmptyField("account"));
        }
        if self.stage.trim().is_empty() {
            return Err(ValidationError::EmptyField("stage"));
        }
        if self.token.is_blank() {
            return Err(ValidationError::EmptyField("token"));
        }

        self.s3.validate()
    }
}

impl Config for SnowflakeTargetConfig {
    const ENV_SCOPE: &'static str = "TARGET";
    const LIST_PARSE_KEYS: &'static [&'static str] = TARGET_LIST_PARSE_KEYS;
}
