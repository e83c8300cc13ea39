//! Restore error types
//!
//! Every failure inside a restore run is fatal for that run. The variants carry
//! the object key, table name or database address needed to diagnose the
//! failure without re-running with extra instrumentation.

use thiserror::Error;

/// Boxed error used for causes that come from more than one client library
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for restore operations
pub type RestoreResult<T> = std::result::Result<T, RestoreError>;

/// Errors raised by the restore pipeline
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Object {key} (version {version:?}) not found in bucket {bucket}")]
    ObjectNotFound {
        bucket: String,
        key: String,
        version: Option<String>,
    },

    #[error("Object store unavailable while reading {key} from bucket {bucket}: {source}")]
    ObjectStoreUnavailable {
        bucket: String,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to read manifest {key}: {source}")]
    ManifestMissing {
        key: String,
        #[source]
        source: Box<RestoreError>,
    },

    #[error("Malformed manifest {key}: {reason}")]
    ManifestMalformed { key: String, reason: String },

    #[error("Failed to install schema {schema}: {source}")]
    SchemaInstallFailed {
        schema: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to import table {table} from {key}: {source}")]
    TableImportFailed {
        table: String,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to connect to database {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database {stage} failed: {source}")]
    TransactionFailed {
        stage: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Config(#[from] lampi_common::LampiError),
}

impl RestoreError {
    /// Short machine-friendly name of the error kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            RestoreError::ObjectNotFound { .. } => "object_not_found",
            RestoreError::ObjectStoreUnavailable { .. } => "object_store_unavailable",
            RestoreError::ManifestMissing { .. } => "manifest_missing",
            RestoreError::ManifestMalformed { .. } => "manifest_malformed",
            RestoreError::SchemaInstallFailed { .. } => "schema_install_failed",
            RestoreError::TableImportFailed { .. } => "table_import_failed",
            RestoreError::ConnectionFailed { .. } => "connection_failed",
            RestoreError::TransactionFailed { .. } => "transaction_failed",
            RestoreError::Config(_) => "config",
        }
    }

    pub(crate) fn table_import(table: &str, key: &str, source: impl Into<BoxError>) -> Self {
        RestoreError::TableImportFailed {
            table: table.to_string(),
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn schema_install(schema: &str, source: impl Into<BoxError>) -> Self {
        RestoreError::SchemaInstallFailed {
            schema: schema.to_string(),
            source: source.into(),
        }
    }
}
