use std::error;
use std::fmt;

/// Convenient result type for fastsync operations using [`SyncError`] as the error type.
pub type SyncResult<T> = Result<T, SyncError>;

/// Main error type of fastsync.
///
/// A [`SyncError`] is either a single classified error, optionally carrying a dynamic detail,
/// or an aggregation of several errors, for example the failures of multiple tables.
#[derive(Debug, Clone)]
pub struct SyncError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<SyncError>),
}

/// Categories of errors that can occur while syncing tables.
///
/// Kinds are grouped by the stage of a table sync in which they surface, so callers can tell
/// configuration problems (fatal for the run) from per-table failures and residual cleanup
/// issues.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,
    TargetConnectionFailed,

    // Query & Execution Errors
    SourceQueryFailed,
    TargetQueryFailed,
    SourceOperationCanceled,

    // Schema & Naming Errors
    SourceSchemaError,
    MissingTableSchema,
    InvalidTableName,

    // Data Errors
    ConversionError,
    InvalidData,
    ValidationError,

    // Configuration Errors
    ConfigError,
    SourceConfigurationLimitExceeded,

    // IO & Serialization Errors
    IoError,
    SourceIoError,
    SerializationError,
    DeserializationError,

    // Security & Authentication Errors
    EncryptionError,
    AuthenticationError,
    PermissionDenied,

    // State & Workflow Errors
    InvalidState,
    TableSyncWorkerPanic,
    StateFileError,

    // Bookmark Errors
    ReplicationSlotNotFound,
    ReplicationKeyNotFound,
    LogPositionUnavailable,
    SourceDatabaseInRecovery,
    SourceDatabaseShutdown,

    // Staging & Swap Errors
    StageUploadFailed,
    StageCleanupFailed,
    SwapFailed,
    TempTableCleanupFailed,

    // General Errors
    SourceError,
    TargetError,
}

impl SyncError {
    /// Aggregates several errors into one.
    pub fn many(errors: Vec<SyncError>) -> SyncError {
        SyncError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors this is the kind of the first error, or [`ErrorKind::InvalidState`]
    /// when the aggregation is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::InvalidState),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattening aggregations.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the dynamic detail, or the first detail found in an aggregation.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            ErrorRepr::WithDescription(_, _) => None,
        }
    }
}

impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => errors_a == errors_b,
            _ => false,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                write!(f, "{kind:?}: {desc} -> {detail}")
            }
            ErrorRepr::Many(ref errors) => match errors.as_slice() {
                [] => write!(f, "Multiple errors occurred (empty)"),
                [error] => error.fmt(f),
                errors => {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                    Ok(())
                }
            },
        }
    }
}

impl error::Error for SyncError {}

impl From<(ErrorKind, &'static str)> for SyncError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for SyncError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for SyncError
where
    E: Into<SyncError>,
{
    fn from(errors: Vec<E>) -> SyncError {
        SyncError::many(errors.into_iter().map(Into::into).collect())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> SyncError {
        SyncError::from((ErrorKind::IoError, "I/O error occurred", err.to_string()))
    }
}

/// Maps syntax and data problems to [`ErrorKind::DeserializationError`] and I/O problems to
/// [`ErrorKind::IoError`].
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> SyncError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        SyncError::from((kind, description, err.to_string()))
    }
}

impl From<std::str::Utf8Error> for SyncError {
    fn from(err: std::str::Utf8Error) -> SyncError {
        SyncError::from((
            ErrorKind::ConversionError,
            "UTF-8 conversion failed",
            err.to_string(),
        ))
    }
}

impl From<std::string::FromUtf8Error> for SyncError {
    fn from(err: std::string::FromUtf8Error) -> SyncError {
        SyncError::from((
            ErrorKind::ConversionError,
            "UTF-8 string conversion failed",
            err.to_string(),
        ))
    }
}

impl From<std::num::ParseIntError> for SyncError {
    fn from(err: std::num::ParseIntError) -> SyncError {
        SyncError::from((
            ErrorKind::ConversionError,
            "Integer parsing failed",
            err.to_string(),
        ))
    }
}

impl From<chrono::ParseError> for SyncError {
    fn from(err: chrono::ParseError) -> SyncError {
        SyncError::from((
            ErrorKind::ConversionError,
            "Timestamp parsing failed",
            err.to_string(),
        ))
    }
}

/// Classifies Postgres errors by SQLSTATE class.
///
/// Errors without a SQLSTATE never reached the server and are reported as connection failures.
impl From<tokio_postgres::Error> for SyncError {
    fn from(err: tokio_postgres::Error) -> SyncError {
        let (kind, description) = match err.code().map(|state| state.code()) {
            Some(code) => classify_sqlstate(code),
            None => (
                ErrorKind::SourceConnectionFailed,
                "PostgreSQL connection failed",
            ),
        };

        SyncError::from((kind, description, err.to_string()))
    }
}

fn classify_sqlstate(code: &str) -> (ErrorKind, &'static str) {
    // Specific states first, then whole classes.
    match code {
        "55P03" => {
            return (
                ErrorKind::SourceQueryFailed,
                "PostgreSQL lock not available",
            );
        }
        "57P01" | "57P02" => {
            return (
                ErrorKind::SourceDatabaseShutdown,
                "PostgreSQL server shutting down",
            );
        }
        "57P03" => {
            return (
                ErrorKind::SourceDatabaseInRecovery,
                "PostgreSQL cannot accept connections now",
            );
        }
        "42501" => {
            return (
                ErrorKind::PermissionDenied,
                "PostgreSQL insufficient privilege",
            );
        }
        "42P01" | "42703" | "3F000" | "3D000" => {
            return (
                ErrorKind::SourceSchemaError,
                "PostgreSQL schema object not found",
            );
        }
        "53400" => {
            return (
                ErrorKind::SourceConfigurationLimitExceeded,
                "PostgreSQL configuration limit exceeded",
            );
        }
        "53100" => return (ErrorKind::SourceIoError, "PostgreSQL disk full"),
        _ => {}
    }

    match code.get(..2).unwrap_or_default() {
        "08" => (
            ErrorKind::SourceConnectionFailed,
            "PostgreSQL connection error",
        ),
        "28" => (
            ErrorKind::AuthenticationError,
            "PostgreSQL authentication failed",
        ),
        "22" => (
            ErrorKind::ConversionError,
            "PostgreSQL data conversion error",
        ),
        "23" => (
            ErrorKind::ValidationError,
            "PostgreSQL constraint violation",
        ),
        "25" | "40" => (ErrorKind::InvalidState, "PostgreSQL transaction error"),
        "42" => (
            ErrorKind::SourceQueryFailed,
            "PostgreSQL syntax or access error",
        ),
        "53" => (
            ErrorKind::SourceConnectionFailed,
            "PostgreSQL resource limitation",
        ),
        "57" => (
            ErrorKind::SourceOperationCanceled,
            "PostgreSQL operation canceled",
        ),
        "58" | "XX" => (ErrorKind::SourceIoError, "PostgreSQL system error"),
        "72" => (
            ErrorKind::SourceQueryFailed,
            "PostgreSQL snapshot too old",
        ),
        _ => (ErrorKind::SourceError, "PostgreSQL error"),
    }
}

/// Converts [`sqlx::Error`] raised by the MySQL source.
impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> SyncError {
        let (kind, description) = match &err {
            sqlx::Error::Database(_) => (ErrorKind::SourceQueryFailed, "MySQL query failed"),
            sqlx::Error::Io(_) => (ErrorKind::SourceIoError, "MySQL I/O error"),
            sqlx::Error::Tls(_) => (ErrorKind::EncryptionError, "MySQL TLS negotiation failed"),
            sqlx::Error::Configuration(_) => {
                (ErrorKind::ConfigError, "MySQL connection misconfigured")
            }
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => (
                ErrorKind::SourceConnectionFailed,
                "MySQL connection unavailable",
            ),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => (
                ErrorKind::ConversionError,
                "MySQL value could not be decoded",
            ),
            _ => (ErrorKind::SourceError, "MySQL operation failed"),
        };

        SyncError::from((kind, description, err.to_string()))
    }
}

impl From<csv::Error> for SyncError {
    fn from(err: csv::Error) -> SyncError {
        let kind = if err.is_io_error() {
            ErrorKind::IoError
        } else {
            ErrorKind::SerializationError
        };

        SyncError::from((kind, "CSV encoding failed", err.to_string()))
    }
}

impl From<rustls::Error> for SyncError {
    fn from(err: rustls::Error) -> SyncError {
        SyncError::from((
            ErrorKind::EncryptionError,
            "TLS configuration failed",
            err.to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, sync_error};

    #[test]
    fn test_simple_error_creation() {
        let err = SyncError::from((
            ErrorKind::ReplicationSlotNotFound,
            "Replication slot not found",
        ));
        assert_eq!(err.kind(), ErrorKind::ReplicationSlotNotFound);
        assert_eq!(err.detail(), None);
        assert_eq!(err.kinds(), vec![ErrorKind::ReplicationSlotNotFound]);
    }

    #[test]
    fn test_error_with_detail() {
        let err = SyncError::from((
            ErrorKind::TargetQueryFailed,
            "Warehouse statement failed",
            "Dataset analytics was not found".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::TargetQueryFailed);
        assert_eq!(err.detail(), Some("Dataset analytics was not found"));
    }

    #[test]
    fn test_multiple_errors() {
        let multi_err = SyncError::many(vec![
            SyncError::from((ErrorKind::SwapFailed, "Swap failed")),
            SyncError::from((ErrorKind::StageUploadFailed, "Upload failed")),
        ]);

        assert_eq!(multi_err.kind(), ErrorKind::SwapFailed);
        assert_eq!(
            multi_err.kinds(),
            vec![ErrorKind::SwapFailed, ErrorKind::StageUploadFailed]
        );
        assert_eq!(multi_err.detail(), None);
    }

    #[test]
    fn test_nested_multiple_errors_flatten_kinds() {
        let inner = SyncError::many(vec![
            SyncError::from((ErrorKind::ConversionError, "Inner 1")),
            SyncError::from((ErrorKind::ValidationError, "Inner 2", "detail".to_string())),
        ]);
        let outer = SyncError::from(vec![inner, SyncError::from((ErrorKind::IoError, "Outer"))]);

        assert_eq!(outer.kinds().len(), 3);
        assert_eq!(outer.detail(), Some("detail"));
    }

    #[test]
    fn test_empty_multiple_errors() {
        let multi_err = SyncError::many(vec![]);
        assert_eq!(multi_err.kind(), ErrorKind::InvalidState);
        assert!(multi_err.kinds().is_empty());
        assert_eq!(multi_err.to_string(), "Multiple errors occurred (empty)");
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::from((
            ErrorKind::ConfigError,
            "Target schema is not defined",
            "public.orders".to_string(),
        ));

        assert_eq!(
            err.to_string(),
            "ConfigError: Target schema is not defined -> public.orders"
        );
    }

    #[test]
    fn test_multiple_errors_display() {
        let multi_err = SyncError::many(vec![
            SyncError::from((ErrorKind::ValidationError, "Invalid schema")),
            SyncError::from((ErrorKind::ConversionError, "Type mismatch")),
        ]);
        let display = multi_err.to_string();

        assert!(display.starts_with("Multiple errors occurred (2 total):"));
        assert!(display.contains("2: ConversionError: Type mismatch"));
    }

    #[test]
    fn test_macro_usage() {
        let err = sync_error!(ErrorKind::InvalidTableName, "Table name is empty");
        assert_eq!(err.kind(), ErrorKind::InvalidTableName);

        let err = sync_error!(
            ErrorKind::ReplicationKeyNotFound,
            "Replication key column not found",
            "updated_at"
        );
        assert_eq!(err.detail(), Some("updated_at"));
    }

    #[test]
    fn test_bail_macro() {
        fn fails() -> SyncResult<()> {
            bail!(
                ErrorKind::LogPositionUnavailable,
                "Binary logging is disabled",
                "SHOW MASTER STATUS returned no rows"
            );
        }

        let err = fails().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LogPositionUnavailable);
        assert!(err.detail().unwrap().contains("no rows"));
    }

    #[test]
    fn test_sqlstate_classification() {
        assert_eq!(
            classify_sqlstate("08006").0,
            ErrorKind::SourceConnectionFailed
        );
        assert_eq!(classify_sqlstate("42P01").0, ErrorKind::SourceSchemaError);
        assert_eq!(classify_sqlstate("42601").0, ErrorKind::SourceQueryFailed);
        assert_eq!(
            classify_sqlstate("55P03"),
            (ErrorKind::SourceQueryFailed, "PostgreSQL lock not available")
        );
        assert_eq!(
            classify_sqlstate("72000"),
            (ErrorKind::SourceQueryFailed, "PostgreSQL snapshot too old")
        );
        assert_eq!(classify_sqlstate("P0001").0, ErrorKind::SourceError);
    }

    #[test]
    fn test_json_error_classification() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err = SyncError::from(json_err);
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(err.detail().unwrap().contains("expected"));
    }
}
