//! Typed error type for the db crate.

use thiserror::Error;

/// Errors returned by the document store and its connector.
///
/// Driver and query messages are kept verbatim: the executor reports them
/// to the workflow unchanged.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    Mongo(#[from] mongodb::error::Error),

    /// Credentials are incomplete or contradictory.
    #[error("invalid credentials: {0}")]
    Credentials(String),

    /// The server could not be reached during connect.
    #[error("{0}")]
    Unreachable(String),

    /// A JSON value could not be represented as BSON (or back).
    #[error("{0}")]
    Conversion(String),

    /// The store rejected a query, update or pipeline.
    #[error("{0}")]
    Query(String),
}
