//! Error types for record-adapter

use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineError;

/// Result type for adapter operations
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Errors surfaced by the adapter to its callers.
///
/// Request-level failures keep the engine's native error as their source so
/// callers can inspect exactly what the engine reported.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Opening a connection to the database failed
    #[error("Connection to database '{database}' failed: {source}")]
    Connection {
        database: String,
        #[source]
        source: EngineError,
    },

    /// A get/add/put/delete/cursor request failed
    #[error("{operation} request on '{collection}' failed: {source}")]
    Request {
        collection: String,
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    /// A record with the same id already exists in the collection
    #[error("Record '{id}' already exists in '{collection}'")]
    Constraint {
        collection: String,
        id: String,
        #[source]
        source: EngineError,
    },

    /// The record to delete does not exist
    #[error("Record '{id}' not found in '{collection}'")]
    NotFound {
        collection: String,
        id: String,
        #[source]
        source: EngineError,
    },

    /// The collection was never provisioned by a migration
    #[error("Collection not found: {collection}")]
    MissingCollection { collection: String },

    /// The enclosing transaction reported an error or abort (strict policy only)
    #[error("Transaction on '{collection}' did not complete: {detail}")]
    Transaction { collection: String, detail: String },

    /// An operation was issued before `initialize` completed
    #[error("Adapter used before initialization completed")]
    NotInitialized,

    /// The record carries no usable `id`
    #[error("Record in '{collection}' has no usable id")]
    MissingId { collection: String },

    /// A relationship field holds a value that cannot address a record
    #[error("Relationship '{relation}' on '{type_name}' holds an invalid reference: {value}")]
    InvalidReference {
        type_name: String,
        relation: String,
        value: String,
    },

    /// A query matcher could not be built
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Record encoding/decoding failed
    #[error("Codec failed: {0}")]
    Codec(String),

    /// Migration could not be applied
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid adapter configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The operation exceeded the configured request timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Resolving relationships for one record of a batch failed
    #[error("Loading relationships for {type_name} record #{index} failed: {source}")]
    Relationship {
        type_name: String,
        index: usize,
        #[source]
        source: Box<AdapterError>,
    },
}

impl AdapterError {
    /// Map a failed engine request onto the adapter taxonomy.
    pub(crate) fn from_request(
        collection: &str,
        operation: &'static str,
        source: EngineError,
    ) -> Self {
        match source {
            EngineError::ConstraintViolation(ref id) => AdapterError::Constraint {
                collection: collection.to_string(),
                id: id.clone(),
                source,
            },
            EngineError::KeyNotFound(ref id) => AdapterError::NotFound {
                collection: collection.to_string(),
                id: id.clone(),
                source,
            },
            EngineError::StoreNotFound(name) => AdapterError::MissingCollection { collection: name },
            source => AdapterError::Request {
                collection: collection.to_string(),
                operation,
                source,
            },
        }
    }

    /// Whether this error reports an absent record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound { .. })
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Codec(err.to_string())
    }
}
