//! Connection gateway
//!
//! Every logical operation opens its own connection through [`Gateway::open`]
//! and holds it as a [`ConnectionLease`]. The lease closes the connection
//! exactly once: explicitly via [`ConnectionLease::close`] after the
//! transaction's terminal event, or on drop when an operation returns early,
//! fails, or is cancelled.

use std::sync::Arc;

use tracing::debug;

use crate::engine::{Connection, EngineError, StorageEngine, Transaction, TransactionMode};
use crate::error::{AdapterError, AdapterResult};

/// Opens one fresh connection per operation. No pooling, no caching.
#[derive(Clone)]
pub struct Gateway {
    engine: Arc<dyn StorageEngine>,
    database: Arc<str>,
}

impl Gateway {
    pub fn new(engine: Arc<dyn StorageEngine>, database: impl Into<Arc<str>>) -> Self {
        Self {
            engine,
            database: database.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Open a connection for a single operation.
    pub async fn open(&self, operation: &'static str) -> AdapterResult<ConnectionLease> {
        let conn = self
            .engine
            .open(&self.database)
            .await
            .map_err(|source| AdapterError::Connection {
                database: self.database.to_string(),
                source,
            })?;
        debug!(database = %self.database, operation, "connection opened");
        Ok(ConnectionLease {
            conn: Some(conn),
            operation,
        })
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// A connection owned by exactly one operation.
pub struct ConnectionLease {
    conn: Option<Box<dyn Connection>>,
    operation: &'static str,
}

impl ConnectionLease {
    /// Start the operation's transaction.
    ///
    /// A collection the migrations never created surfaces as
    /// [`AdapterError::MissingCollection`].
    pub fn transaction(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> AdapterResult<Box<dyn Transaction>> {
        let conn = self.conn.as_ref().ok_or_else(|| AdapterError::Request {
            collection: collection.to_string(),
            operation: self.operation,
            source: EngineError::TransactionInactive,
        })?;
        conn.transaction(collection, mode)
            .map_err(|source| AdapterError::from_request(collection, "transaction", source))
    }

    /// Close the connection after the transaction's terminal event.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            let database = conn.database().to_string();
            conn.close();
            debug!(database = %database, operation = self.operation, "connection closed");
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEngine;

    #[tokio::test]
    async fn lease_closes_on_drop() {
        let engine = MemoryEngine::new();
        let gateway = Gateway::new(Arc::new(engine.clone()), "db");

        {
            let _lease = gateway.open("test").await.unwrap();
            assert_eq!(engine.stats().open, 1);
        }

        let stats = engine.stats();
        assert_eq!(stats.open, 0);
        assert_eq!(stats.closed, 1);
    }

    #[tokio::test]
    async fn explicit_close_is_not_repeated_by_drop() {
        let engine = MemoryEngine::new();
        let gateway = Gateway::new(Arc::new(engine.clone()), "db");

        gateway.open("test").await.unwrap().close();

        let stats = engine.stats();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.closed, 1);
    }

    #[tokio::test]
    async fn open_failure_maps_to_connection_error() {
        let engine = MemoryEngine::new();
        engine.fail_next_opens(1);
        let gateway = Gateway::new(Arc::new(engine.clone()), "db");

        let err = gateway.open("test").await.err().unwrap();
        assert!(matches!(err, AdapterError::Connection { .. }));
        assert_eq!(engine.stats().open, 0);
    }
}
