//! Error handling module
//!
//! Provides the unified error type for the whole diff pipeline. Every variant
//! names the endpoint, file or statement it concerns wherever that is known.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;
use tracing::error;

/// Pipeline-wide error type
#[derive(Error, Debug)]
pub enum ShiftError {
    #[error("Connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    #[error("Failed to load schema file {}: {cause}", file.display())]
    SchemaLoad { file: PathBuf, cause: String },

    #[error("Migration {} failed: {cause}", file.display())]
    MigrationApply { file: PathBuf, cause: String },

    #[error(
        "Unresolvable safety conflict: statement #{kept} ({kept_sql}) requires withheld unsafe statement #{withheld} ({withheld_sql})"
    )]
    UnresolvableSafetyConflict {
        kept: usize,
        kept_sql: String,
        withheld: usize,
        withheld_sql: String,
    },

    #[error("Unsafe change rejected (statement #{ordinal}, rule {rule}): {statement}")]
    UnsafeChangeRejected {
        ordinal: usize,
        rule: String,
        statement: String,
    },

    #[error("Timed out after {seconds}s while {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Execution failed at statement #{ordinal}: {cause}")]
    Execution {
        ordinal: usize,
        statement: String,
        cause: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid file pattern {pattern}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShiftError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            ShiftError::Config(_) | ShiftError::Pattern { .. } => 2,
            ShiftError::Connection { .. } | ShiftError::Pool(_) => 3,
            ShiftError::SchemaLoad { .. } | ShiftError::MigrationApply { .. } | ShiftError::Io { .. } => 4,
            ShiftError::UnresolvableSafetyConflict { .. } | ShiftError::UnsafeChangeRejected { .. } => 5,
            ShiftError::Execution { .. } => 6,
            ShiftError::Timeout { .. } => 7,
            ShiftError::Cancelled => 130,
            ShiftError::Database(e) => {
                error!("Database error: {:?}", e);
                8
            }
            ShiftError::Internal(msg) => {
                error!("Internal error: {}", msg);
                70
            }
        }
    }

    /// Short machine-readable code, used in JSON output
    pub fn code(&self) -> &'static str {
        match self {
            ShiftError::Connection { .. } => "CONNECTION_ERROR",
            ShiftError::SchemaLoad { .. } => "SCHEMA_LOAD_ERROR",
            ShiftError::MigrationApply { .. } => "MIGRATION_APPLY_ERROR",
            ShiftError::UnresolvableSafetyConflict { .. } => "UNRESOLVABLE_SAFETY_CONFLICT",
            ShiftError::UnsafeChangeRejected { .. } => "UNSAFE_CHANGE_REJECTED",
            ShiftError::Timeout { .. } => "TIMEOUT",
            ShiftError::Execution { .. } => "EXECUTION_ERROR",
            ShiftError::Cancelled => "CANCELLED",
            ShiftError::Database(_) => "DATABASE_ERROR",
            ShiftError::Pool(_) => "POOL_ERROR",
            ShiftError::Io { .. } => "IO_ERROR",
            ShiftError::Pattern { .. } => "PATTERN_ERROR",
            ShiftError::Config(_) => "CONFIG_ERROR",
            ShiftError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias used throughout the crate
pub type ShiftResult<T> = Result<T, ShiftError>;

/// Helper function to create a connection error
pub fn connection_error(endpoint: impl Into<String>, message: impl ToString) -> ShiftError {
    ShiftError::Connection {
        endpoint: endpoint.into(),
        message: message.to_string(),
    }
}

/// Helper function to wrap an I/O error with the path it concerns
pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> ShiftError {
    ShiftError::Io {
        path: path.into(),
        source,
    }
}

/// Render a database error with its server-side detail when there is one
pub fn describe_db_error(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => {
            let mut message = format!("{}: {}", db.code().code(), db.message());
            if let Some(detail) = db.detail() {
                message.push_str(&format!(" ({})", detail));
            }
            if let Some(position) = db.position() {
                message.push_str(&format!(" at {:?}", position));
            }
            message
        }
        None => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        let conflict = ShiftError::UnsafeChangeRejected {
            ordinal: 1,
            rule: "drop_table".to_string(),
            statement: "DROP TABLE \"public\".\"t\"".to_string(),
        };
        let timeout = ShiftError::Timeout {
            operation: "connecting".to_string(),
            seconds: 5,
        };
        assert_eq!(conflict.exit_code(), 5);
        assert_eq!(timeout.exit_code(), 7);
        assert_eq!(ShiftError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_messages_name_the_file() {
        let err = ShiftError::MigrationApply {
            file: PathBuf::from("migrations/0002_users.sql"),
            cause: "syntax error".to_string(),
        };
        assert!(err.to_string().contains("migrations/0002_users.sql"));
        assert_eq!(err.code(), "MIGRATION_APPLY_ERROR");
    }
}
