//! Record-Adapter: record persistence over a transactional key-value store
//!
//! This crate maps application model records onto an asynchronous,
//! transactional object store: one collection per model type, one
//! connection and one transaction per operation, and one-hop embedding of
//! related records under `_embedded`.
//!
//! ## Layers
//!
//! - Engine: the [`StorageEngine`] primitives and the in-process
//!   [`MemoryEngine`]
//! - Access: [`Gateway`], [`Executor`] (single requests) and [`Scanner`]
//!   (cursor walks filtered by a [`Query`])
//! - Resolution: [`Resolver`] and its [`BatchRunner`]
//! - Facade: [`RecordAdapter`], configured by [`AdapterConfig`] and
//!   provisioned by a [`Migrator`]

pub mod adapter;
pub mod codec;
pub mod config;
pub mod engine;
mod error;
pub mod executor;
pub mod gateway;
pub mod id;
pub mod memory;
pub mod migration;
pub mod obs;
pub mod query;
pub mod record;
pub mod resolver;
pub mod scanner;
pub mod schema;

pub use adapter::{FindOptions, RecordAdapter};
pub use codec::{JsonCodec, RecordCodec};
pub use config::{AdapterConfig, TransactionPolicy, DEFAULT_DATABASE_NAME};
pub use engine::{
    Connection, Cursor, EngineError, EngineResult, StorageEngine, Transaction, TransactionMode,
    TransactionOutcome,
};
pub use error::{AdapterError, AdapterResult};
pub use executor::Executor;
pub use gateway::{ConnectionLease, Gateway};
pub use id::{generate_id, generate_id_with_length};
pub use memory::{ConnectionStats, DatabaseSnapshot, EngineSnapshot, MemoryEngine};
pub use migration::{Migration, Migrator};
pub use query::{Matcher, Query};
pub use record::{Record, RecordKey, EMBEDDED_KEY, ID_FIELD};
pub use resolver::{BatchRunner, Resolver};
pub use scanner::{RecordStream, Scanner};
pub use schema::{
    RelationshipDescriptor, RelationshipKind, Relationships, SchemaProvider, StaticSchema,
};

/// Result type for record-adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;
