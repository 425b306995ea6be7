/// scopedb Error Module
///
/// This module defines the error type shared by the manager, the driver seam
/// and the settings loader.
use thiserror::Error;

/// Error type for every fallible scopedb operation.
///
/// Failures raised by a driver propagate to the caller unchanged. The only
/// errors that never reach the caller are `Close` failures hit while a scope
/// is being drained; those are logged and dropped.
#[derive(Error, Debug)]
pub enum ScopeDbError {
    /// Opening the connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Errors reported by SQLite
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A statement failed while preparing, executing or fetching
    #[error("Statement error: {message}")]
    Statement {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// Commit, rollback or an auto-commit switch failed
    #[error("Transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// Use of a cursor that is closed or was never handed out
    #[error("Cursor error: {0}")]
    Cursor(String),

    /// A resource refused to close
    #[error("Close error: {0}")]
    Close(String),

    /// Settings were missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML settings
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ScopeDbError {
    /// Statement failure with no underlying SQLite error.
    pub fn statement(message: impl Into<String>) -> Self {
        ScopeDbError::Statement { message: message.into(), source: None }
    }

    /// Transaction failure with no underlying SQLite error.
    pub fn transaction(message: impl Into<String>) -> Self {
        ScopeDbError::Transaction { message: message.into(), source: None }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ScopeDbError>;
