//! Error types for cubbi-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using cubbi-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cubbi-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote backend error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// No authenticated session is available
    #[error("No authenticated session")]
    NoSession,

    /// The remote store is not reachable right now
    #[error("Remote store is offline")]
    Offline,
}
