//! Cursor scanner
//!
//! Walks a whole collection in engine key order through a read-only cursor.
//! [`Scanner::scan`] exposes the walk as a lazy stream; the `select_*`
//! helpers collect the records that pass a filter, preserving scan order.

use std::collections::HashSet;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::instrument;

use crate::config::TransactionPolicy;
use crate::engine::{Cursor, Transaction, TransactionMode};
use crate::error::{AdapterError, AdapterResult};
use crate::executor::settle;
use crate::gateway::{ConnectionLease, Gateway};
use crate::obs;
use crate::query::Query;
use crate::record::{Record, RecordKey};

/// Records of one collection in scan order.
///
/// Dropping the stream early releases its connection.
pub type RecordStream = BoxStream<'static, AdapterResult<Record>>;

/// Full-collection reads.
#[derive(Debug, Clone)]
pub struct Scanner {
    gateway: Gateway,
    policy: TransactionPolicy,
}

impl Scanner {
    pub fn new(gateway: Gateway, policy: TransactionPolicy) -> Self {
        Self { gateway, policy }
    }

    /// Open a cursor over `collection` and stream every record.
    pub async fn scan(&self, collection: &str) -> AdapterResult<RecordStream> {
        let lease = self.gateway.open("scan").await?;
        let mut tx = lease.transaction(collection, TransactionMode::ReadOnly)?;
        let cursor = tx
            .open_cursor()
            .await
            .map_err(|e| AdapterError::from_request(collection, "openCursor", e))?;

        let state = ScanState {
            lease,
            tx,
            cursor,
            collection: collection.to_string(),
            scanned: 0,
            policy: self.policy,
        };
        Ok(stream::try_unfold(state, ScanState::step).boxed())
    }

    /// Collect the records for which `keep` returns true.
    pub async fn collect_where<F>(&self, collection: &str, mut keep: F) -> AdapterResult<Vec<Record>>
    where
        F: FnMut(&Record) -> bool + Send,
    {
        let mut records = self.scan(collection).await?;
        let mut selected = Vec::new();
        while let Some(record) = records.try_next().await? {
            if keep(&record) {
                selected.push(record);
            }
        }
        Ok(selected)
    }

    /// Records whose key is in `ids`, in scan order (not `ids` order).
    ///
    /// Unknown ids are skipped. An empty id list returns without opening a
    /// connection.
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn select_ids(&self, collection: &str, ids: &[RecordKey]) -> AdapterResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<&RecordKey> = ids.iter().collect();
        self.collect_where(collection, |record| {
            record.key().is_some_and(|key| wanted.contains(&key))
        })
        .await
    }

    /// Every record of the collection.
    #[instrument(skip(self))]
    pub async fn select_all(&self, collection: &str) -> AdapterResult<Vec<Record>> {
        self.scan(collection).await?.try_collect().await
    }

    /// Records matching every field of `query`.
    #[instrument(skip(self, query), fields(fields = query.len()))]
    pub async fn select_query(&self, collection: &str, query: &Query) -> AdapterResult<Vec<Record>> {
        self.collect_where(collection, |record| query.matches(record)).await
    }
}

struct ScanState {
    lease: ConnectionLease,
    tx: Box<dyn Transaction>,
    cursor: Box<dyn Cursor>,
    collection: String,
    scanned: usize,
    policy: TransactionPolicy,
}

impl ScanState {
    async fn step(mut self) -> AdapterResult<Option<(Record, Self)>> {
        match self.cursor.advance().await {
            Ok(Some(record)) => {
                self.scanned += 1;
                Ok(Some((record, self)))
            }
            Ok(None) => {
                self.finish().await?;
                Ok(None)
            }
            Err(e) => Err(AdapterError::from_request(&self.collection, "cursor", e)),
        }
    }

    async fn finish(mut self) -> AdapterResult<()> {
        settle(self.tx.as_mut(), self.policy).await?;
        self.lease.close();
        obs::emit_scan_finished(&self.collection, self.scanned);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StorageEngine;
    use crate::memory::MemoryEngine;
    use std::sync::Arc;

    async fn seeded() -> (MemoryEngine, Scanner) {
        let engine = MemoryEngine::new();
        engine
            .upgrade("db", 1, &["Post".to_string()])
            .await
            .unwrap();
        let conn = engine.open("db").await.unwrap();
        let mut tx = conn
            .transaction("Post", TransactionMode::ReadWrite)
            .unwrap();
        for (id, title) in [("c", "gamma"), ("a", "alpha"), ("b", "beta")] {
            tx.add(Record::new().with("id", id).with("title", title))
                .await
                .unwrap();
        }
        tx.commit().await;
        conn.close();
        engine.reset_stats();

        let gateway = Gateway::new(Arc::new(engine.clone()), "db");
        (engine, Scanner::new(gateway, TransactionPolicy::LogOnly))
    }

    fn ids(records: &[Record]) -> Vec<RecordKey> {
        records.iter().filter_map(Record::key).collect()
    }

    #[tokio::test]
    async fn select_all_follows_key_order() {
        let (engine, scanner) = seeded().await;
        let all = scanner.select_all("Post").await.unwrap();
        assert_eq!(ids(&all), vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(engine.stats().open, 0);
    }

    #[tokio::test]
    async fn select_ids_keeps_scan_order_and_skips_unknown() {
        let (_engine, scanner) = seeded().await;
        let found = scanner
            .select_ids("Post", &["c".into(), "zz".into(), "a".into()])
            .await
            .unwrap();
        assert_eq!(ids(&found), vec!["a".into(), "c".into()]);
    }

    #[tokio::test]
    async fn empty_id_list_opens_nothing() {
        let (engine, scanner) = seeded().await;
        assert!(scanner.select_ids("Post", &[]).await.unwrap().is_empty());
        assert_eq!(engine.stats().opened, 0);
    }

    #[tokio::test]
    async fn select_query_filters() {
        let (_engine, scanner) = seeded().await;
        let query = Query::new().matching("title", "^(alpha|gamma)$").unwrap();
        let found = scanner.select_query("Post", &query).await.unwrap();
        assert_eq!(ids(&found), vec!["a".into(), "c".into()]);
    }

    #[tokio::test]
    async fn dropping_stream_early_releases_connection() {
        let (engine, scanner) = seeded().await;
        let mut stream = scanner.scan("Post").await.unwrap();
        assert!(stream.try_next().await.unwrap().is_some());
        assert_eq!(engine.stats().open, 1);

        drop(stream);
        let stats = engine.stats();
        assert_eq!(stats.open, 0);
        assert_eq!(stats.closed, 1);
    }

    #[tokio::test]
    async fn scanning_missing_collection_fails() {
        let (engine, scanner) = seeded().await;
        let err = scanner.select_all("Comment").await.unwrap_err();
        assert!(matches!(err, AdapterError::MissingCollection { .. }));
        assert_eq!(engine.stats().open, 0);
    }
}
