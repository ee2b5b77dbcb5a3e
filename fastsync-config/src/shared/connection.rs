use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Default Postgres port, also used by Redshift clusters listening on a custom port when unset.
const fn default_postgres_port() -> u16 {
    5432
}

const fn default_mysql_port() -> u16 {
    3306
}

/// TLS settings for Postgres-protocol connections (Postgres taps and Redshift targets).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Returns [`ValidationError::MissingTrustedRootCerts`] if TLS is enabled without
    /// certificates.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Connection settings for a server speaking the Postgres wire protocol.
///
/// Field names follow the singer tap configuration format so existing `tap_postgres`
/// configuration files can be reused unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub user: String,
    pub password: Option<SerializableSecretString>,
    pub dbname: String,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::EmptyField("host"));
        }
        if self.dbname.trim().is_empty() {
            return Err(ValidationError::EmptyField("dbname"));
        }

        self.tls.validate()
    }
}

/// Connection settings for a MySQL or MariaDB server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MySqlConnectionConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    pub password: Option<SerializableSecretString>,
    /// Optional default database; tables are always addressed as `database.table`.
    pub dbname: Option<String>,
    /// Require an encrypted connection.
    #[serde(default)]
    pub ssl: bool,
}

impl MySqlConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::EmptyField("host"));
        }

        Ok(())
    }
}

/// Converts a connection config into the connect options of a specific driver crate.
///
/// Postgres-protocol servers are reached with `tokio_postgres` and MySQL servers with `sqlx`,
/// so the connection settings stay in one place and each driver gets its own implementation.
pub trait IntoConnectOptions<Output> {
    /// Connect options without selecting a database.
    fn without_db(&self) -> Output;

    /// Connect options including the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> TokioPgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Prefer
        };
        let mut config = TokioPgConnectOptions::new();
        config
            .host(self.host.clone())
            .port(self.port)
            .user(self.user.clone())
            // Certificates are verified by the rustls connector, `tokio_postgres` only needs to
            // know whether TLS is mandatory.
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        config
    }

    fn with_db(&self) -> TokioPgConnectOptions {
        let mut options: TokioPgConnectOptions = self.without_db();
        options.dbname(self.dbname.clone());
        options
    }
}

impl IntoConnectOptions<MySqlConnectOptions> for MySqlConnectionConfig {
    fn without_db(&self) -> MySqlConnectOptions {
        let ssl_mode = if self.ssl {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Preferred
        };
        let options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .ssl_mode(ssl_mode);

        match &self.password {
            Some(password) => options.password(password.expose_secret()),
            None => options,
        }
    }

    fn with_db(&self) -> MySqlConnectOptions {
        let options: MySqlConnectOptions = self.without_db();

        match &self.dbname {
            Some(dbname) => options.database(dbname),
            None => options,
        }
    }
}
