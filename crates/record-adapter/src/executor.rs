//! CRUD executor
//!
//! Each verb runs the same sequence: open a connection, open a transaction on
//! one collection, issue exactly one request, observe the transaction's
//! terminal event, close the connection. The result settles from the
//! request's own outcome; the terminal event only feeds diagnostics unless
//! the strict [`TransactionPolicy`] is configured.

use tracing::{debug, instrument};

use crate::config::TransactionPolicy;
use crate::engine::{Transaction, TransactionMode, TransactionOutcome};
use crate::error::{AdapterError, AdapterResult};
use crate::gateway::Gateway;
use crate::obs;
use crate::record::{Record, RecordKey};

/// Issues single get/add/put/delete requests.
#[derive(Debug, Clone)]
pub struct Executor {
    gateway: Gateway,
    policy: TransactionPolicy,
}

impl Executor {
    pub fn new(gateway: Gateway, policy: TransactionPolicy) -> Self {
        Self { gateway, policy }
    }

    /// Read one record. An absent key is `Ok(None)`.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn fetch(&self, collection: &str, key: &RecordKey) -> AdapterResult<Option<Record>> {
        let lease = self.gateway.open("get").await?;
        let mut tx = lease.transaction(collection, TransactionMode::ReadOnly)?;

        let found = tx
            .get(key)
            .await
            .map_err(|e| AdapterError::from_request(collection, "get", e))?;

        settle(tx.as_mut(), self.policy).await?;
        lease.close();
        Ok(found)
    }

    /// Add a new record; fails with `Constraint` if its id is taken.
    #[instrument(skip(self, record))]
    pub async fn insert(&self, collection: &str, record: Record) -> AdapterResult<Record> {
        let lease = self.gateway.open("add").await?;
        let mut tx = lease.transaction(collection, TransactionMode::ReadWrite)?;

        let key = tx
            .add(record.clone())
            .await
            .map_err(|e| AdapterError::from_request(collection, "add", e))?;
        debug!("Added record {}", key);

        settle(tx.as_mut(), self.policy).await?;
        lease.close();
        Ok(record)
    }

    /// Replace (or insert) the record stored at its id.
    #[instrument(skip(self, record))]
    pub async fn replace(&self, collection: &str, record: Record) -> AdapterResult<Record> {
        let lease = self.gateway.open("put").await?;
        let mut tx = lease.transaction(collection, TransactionMode::ReadWrite)?;

        let key = tx
            .put(record.clone())
            .await
            .map_err(|e| AdapterError::from_request(collection, "put", e))?;
        debug!("Put record {}", key);

        settle(tx.as_mut(), self.policy).await?;
        lease.close();
        Ok(record)
    }

    /// Delete a record, returning the snapshot stored before deletion.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn remove(&self, collection: &str, key: &RecordKey) -> AdapterResult<Record> {
        let lease = self.gateway.open("delete").await?;
        let mut tx = lease.transaction(collection, TransactionMode::ReadWrite)?;

        let removed = tx
            .delete(key)
            .await
            .map_err(|e| AdapterError::from_request(collection, "delete", e))?;

        settle(tx.as_mut(), self.policy).await?;
        lease.close();
        Ok(removed)
    }
}

/// Wait for the transaction's terminal event and apply the policy to it.
///
/// Read-only transactions are never rejected: there is nothing to lose.
pub(crate) async fn settle(tx: &mut dyn Transaction, policy: TransactionPolicy) -> AdapterResult<()> {
    let (kind, detail) = match tx.commit().await {
        TransactionOutcome::Complete => return Ok(()),
        TransactionOutcome::Error(err) => ("error", err.to_string()),
        TransactionOutcome::Aborted(reason) => ("abort", reason),
    };
    obs::emit_transaction_diagnostic(tx.collection(), kind, &detail);

    match (policy, tx.mode()) {
        (TransactionPolicy::Strict, TransactionMode::ReadWrite) => Err(AdapterError::Transaction {
            collection: tx.collection().to_string(),
            detail,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StorageEngine;
    use crate::memory::MemoryEngine;
    use std::sync::Arc;

    async fn executor(policy: TransactionPolicy) -> (MemoryEngine, Executor) {
        let engine = MemoryEngine::new();
        engine
            .upgrade("db", 1, &["Post".to_string()])
            .await
            .unwrap();
        let gateway = Gateway::new(Arc::new(engine.clone()), "db");
        (engine, Executor::new(gateway, policy))
    }

    #[tokio::test]
    async fn every_verb_closes_its_connection() {
        let (engine, exec) = executor(TransactionPolicy::LogOnly).await;
        let key = RecordKey::from("p1");

        exec.insert("Post", Record::new().with("id", "p1")).await.unwrap();
        exec.replace("Post", Record::new().with("id", "p1").with("v", 2))
            .await
            .unwrap();
        exec.fetch("Post", &key).await.unwrap();
        exec.remove("Post", &key).await.unwrap();
        assert!(exec.remove("Post", &key).await.is_err());

        let stats = engine.stats();
        assert_eq!(stats.opened, 5);
        assert_eq!(stats.closed, 5);
        assert_eq!(stats.open, 0);
    }

    #[tokio::test]
    async fn abort_is_logged_only_by_default() {
        let (engine, exec) = executor(TransactionPolicy::LogOnly).await;
        engine.abort_transactions_on("Post");

        let saved = exec.insert("Post", Record::new().with("id", "p1")).await;
        assert!(saved.is_ok());
        assert_eq!(engine.record_count("db", "Post"), Some(0));
    }

    #[tokio::test]
    async fn strict_policy_rejects_aborted_writes() {
        let (engine, exec) = executor(TransactionPolicy::Strict).await;
        engine.abort_transactions_on("Post");

        let err = exec
            .insert("Post", Record::new().with("id", "p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Transaction { .. }));
        assert_eq!(engine.stats().open, 0);
    }

    #[tokio::test]
    async fn missing_collection_is_reported() {
        let (engine, exec) = executor(TransactionPolicy::LogOnly).await;
        let err = exec.fetch("Comment", &"c1".into()).await.unwrap_err();
        assert!(matches!(err, AdapterError::MissingCollection { .. }));
        assert_eq!(engine.stats().open, 0);
    }
}
