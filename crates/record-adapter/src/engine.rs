//! Storage engine primitives consumed by the adapter.
//!
//! The engine is an asynchronous key-value object store: a database holds
//! named collections, a connection opens transactions scoped to one
//! collection, and a transaction issues single requests or opens a forward
//! cursor. The adapter never assumes more than these traits promise.
//!
//! [`crate::memory::MemoryEngine`] is the in-process implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{Record, RecordKey};

/// Result type for engine primitives
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Native failures reported by a storage engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The database could not be opened
    #[error("cannot open database '{database}': {reason}")]
    OpenFailed { database: String, reason: String },

    /// No object store with this name exists
    #[error("object store not found: {0}")]
    StoreNotFound(String),

    /// The key is already present
    #[error("key already exists: {0}")]
    ConstraintViolation(String),

    /// No record is stored under the key
    #[error("no record for key: {0}")]
    KeyNotFound(String),

    /// The record has no valid key
    #[error("record has no valid key")]
    InvalidKey,

    /// A write was issued on a read-only transaction
    #[error("transaction is read-only")]
    ReadOnly,

    /// The transaction already finished
    #[error("transaction is no longer active")]
    TransactionInactive,

    /// An upgrade requested a version lower than the stored one
    #[error("requested version {requested} is lower than current version {current}")]
    VersionError { requested: u64, current: u64 },

    /// Any other engine failure
    #[error("engine failure: {0}")]
    Internal(String),
}

/// Access mode of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Terminal event of a transaction.
///
/// Distinct from the outcome of the requests issued inside it: a request can
/// succeed and its transaction still abort afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Complete,
    Error(EngineError),
    Aborted(String),
}

/// An asynchronous key-value engine hosting named databases.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Open a fresh connection. Every call yields an independent handle.
    async fn open(&self, database: &str) -> EngineResult<Box<dyn Connection>>;

    /// Current schema version of a database (0 if it was never upgraded).
    async fn version(&self, database: &str) -> EngineResult<u64>;

    /// Raise a database to `version`, creating any missing collections.
    async fn upgrade(
        &self,
        database: &str,
        version: u64,
        collections: &[String],
    ) -> EngineResult<()>;
}

/// An open handle to one database.
pub trait Connection: Send + Sync {
    fn database(&self) -> &str;

    /// Start a transaction scoped to a single collection.
    fn transaction(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> EngineResult<Box<dyn Transaction>>;

    /// Release the handle. Consumes it, so a connection closes at most once.
    fn close(self: Box<Self>);
}

/// A transaction over one collection.
#[async_trait]
pub trait Transaction: Send {
    fn collection(&self) -> &str;

    fn mode(&self) -> TransactionMode;

    /// Look up a record. `Ok(None)` when the key is absent.
    async fn get(&mut self, key: &RecordKey) -> EngineResult<Option<Record>>;

    /// Insert a new record. Fails with `ConstraintViolation` if the key exists.
    async fn add(&mut self, record: Record) -> EngineResult<RecordKey>;

    /// Insert or replace a record.
    async fn put(&mut self, record: Record) -> EngineResult<RecordKey>;

    /// Remove a record, returning what was stored. Fails with `KeyNotFound`.
    async fn delete(&mut self, key: &RecordKey) -> EngineResult<Record>;

    /// Open a forward cursor over the whole collection.
    async fn open_cursor(&mut self) -> EngineResult<Box<dyn Cursor>>;

    /// Finish the transaction and report its terminal event.
    async fn commit(&mut self) -> TransactionOutcome;
}

/// Forward-only, single-pass iteration over a collection.
#[async_trait]
pub trait Cursor: Send {
    /// Continue to the next record; `None` once the collection is exhausted.
    async fn advance(&mut self) -> EngineResult<Option<Record>>;
}
