//! In-memory storage engine
//!
//! `MemoryEngine` satisfies the [`StorageEngine`] contract without any external
//! dependencies. It backs the test suite and the CLI (which persists it as a
//! JSON snapshot between invocations).
//!
//! Behaviour worth knowing:
//! - Writes are staged in the transaction and applied on commit; reads inside
//!   the same transaction see them.
//! - Cursors walk committed records in ascending key order and pick up
//!   records committed while they are open.
//! - Connection accounting ([`MemoryEngine::stats`]) counts every open and
//!   close, so leaked handles show up as a non-zero `open` count.
//! - Faults can be injected: failing opens, aborting write transactions on a
//!   collection, and per-collection request latency.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{
    Connection, Cursor, EngineError, EngineResult, StorageEngine, Transaction, TransactionMode,
    TransactionOutcome,
};
use crate::record::{Record, RecordKey};

type Collection = BTreeMap<RecordKey, Record>;

#[derive(Debug, Default, Clone)]
struct DatabaseState {
    version: u64,
    collections: BTreeMap<String, Collection>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_opens: usize,
    aborting: HashSet<String>,
    latency: HashMap<String, Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    open: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Debug, Default)]
struct Shared {
    databases: Mutex<BTreeMap<String, DatabaseState>>,
    faults: Mutex<Faults>,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection accounting for a [`MemoryEngine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Connections opened since creation (or the last reset)
    pub opened: usize,
    /// Connections closed since creation (or the last reset)
    pub closed: usize,
    /// Connections currently open
    pub open: usize,
    /// Highest number of simultaneously open connections
    pub peak: usize,
}

/// Serialisable image of every database held by a [`MemoryEngine`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseSnapshot>,
}

/// One database inside an [`EngineSnapshot`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: u64,
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<Record>>,
}

/// In-memory object store. Cloning shares the underlying databases.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current connection accounting.
    pub fn stats(&self) -> ConnectionStats {
        let c = &self.shared.counters;
        ConnectionStats {
            opened: c.opened.load(Ordering::SeqCst),
            closed: c.closed.load(Ordering::SeqCst),
            open: c.open.load(Ordering::SeqCst),
            peak: c.peak.load(Ordering::SeqCst),
        }
    }

    /// Zero the open/close totals and restart peak tracking from the
    /// number of connections open right now.
    pub fn reset_stats(&self) {
        let c = &self.shared.counters;
        c.opened.store(0, Ordering::SeqCst);
        c.closed.store(0, Ordering::SeqCst);
        c.peak.store(c.open.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: usize) {
        lock(&self.shared.faults).failing_opens = count;
    }

    /// Abort every read-write transaction on `collection` at commit time.
    pub fn abort_transactions_on(&self, collection: impl Into<String>) {
        lock(&self.shared.faults).aborting.insert(collection.into());
    }

    /// Delay every request and cursor step on `collection`.
    pub fn set_latency(&self, collection: impl Into<String>, delay: Duration) {
        lock(&self.shared.faults).latency.insert(collection.into(), delay);
    }

    pub fn clear_faults(&self) {
        *lock(&self.shared.faults) = Faults::default();
    }

    /// Number of committed records in a collection, if it exists.
    pub fn record_count(&self, database: &str, collection: &str) -> Option<usize> {
        lock(&self.shared.databases)
            .get(database)
            .and_then(|db| db.collections.get(collection))
            .map(BTreeMap::len)
    }

    /// Names of the collections provisioned in a database.
    pub fn collection_names(&self, database: &str) -> Vec<String> {
        lock(&self.shared.databases)
            .get(database)
            .map(|db| db.collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Capture every committed record.
    pub fn snapshot(&self) -> EngineSnapshot {
        let databases = lock(&self.shared.databases)
            .iter()
            .map(|(name, db)| {
                let collections = db
                    .collections
                    .iter()
                    .map(|(c, records)| (c.clone(), records.values().cloned().collect()))
                    .collect();
                (
                    name.clone(),
                    DatabaseSnapshot {
                        version: db.version,
                        collections,
                    },
                )
            })
            .collect();
        EngineSnapshot {
            saved_at: Some(Utc::now()),
            databases,
        }
    }

    /// Rebuild an engine from a snapshot. Every record must carry a valid key.
    pub fn from_snapshot(snapshot: EngineSnapshot) -> EngineResult<Self> {
        let mut databases = BTreeMap::new();
        for (name, db) in snapshot.databases {
            let mut collections = BTreeMap::new();
            for (collection, records) in db.collections {
                let mut stored = Collection::new();
                for record in records {
                    let key = record.key().ok_or(EngineError::InvalidKey)?;
                    stored.insert(key, record);
                }
                collections.insert(collection, stored);
            }
            databases.insert(
                name,
                DatabaseState {
                    version: db.version,
                    collections,
                },
            );
        }
        let engine = Self::new();
        *lock(&engine.shared.databases) = databases;
        Ok(engine)
    }

    /// Write a JSON snapshot to `path`.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| EngineError::Internal(format!("writing {}: {}", path.display(), e)))?;
        debug!("Engine snapshot saved to {}", path.display());
        Ok(())
    }

    /// Load an engine from a JSON snapshot at `path`.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Internal(format!("reading {}: {}", path.display(), e)))?;
        let snapshot: EngineSnapshot = serde_json::from_str(&content)
            .map_err(|e| EngineError::Internal(format!("parsing {}: {}", path.display(), e)))?;
        Self::from_snapshot(snapshot)
    }

    /// Load from `path` when it exists, otherwise start empty.
    pub fn load_or_default(path: &Path) -> EngineResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    fn latency(&self, collection: &str) -> Option<Duration> {
        lock(&self.shared.faults).latency.get(collection).copied()
    }

    fn aborts(&self, collection: &str) -> bool {
        lock(&self.shared.faults).aborting.contains(collection)
    }

    fn read<R>(
        &self,
        database: &str,
        collection: &str,
        f: impl FnOnce(&Collection) -> R,
    ) -> EngineResult<R> {
        let databases = lock(&self.shared.databases);
        databases
            .get(database)
            .and_then(|db| db.collections.get(collection))
            .map(f)
            .ok_or_else(|| EngineError::StoreNotFound(collection.to_string()))
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn open(&self, database: &str) -> EngineResult<Box<dyn Connection>> {
        {
            let mut faults = lock(&self.shared.faults);
            if faults.failing_opens > 0 {
                faults.failing_opens -= 1;
                return Err(EngineError::OpenFailed {
                    database: database.to_string(),
                    reason: "injected open failure".to_string(),
                });
            }
        }

        lock(&self.shared.databases)
            .entry(database.to_string())
            .or_default();

        let c = &self.shared.counters;
        c.opened.fetch_add(1, Ordering::SeqCst);
        let now_open = c.open.fetch_add(1, Ordering::SeqCst) + 1;
        c.peak.fetch_max(now_open, Ordering::SeqCst);

        Ok(Box::new(MemoryConnection {
            engine: self.clone(),
            database: database.to_string(),
        }))
    }

    async fn version(&self, database: &str) -> EngineResult<u64> {
        Ok(lock(&self.shared.databases)
            .get(database)
            .map(|db| db.version)
            .unwrap_or(0))
    }

    async fn upgrade(
        &self,
        database: &str,
        version: u64,
        collections: &[String],
    ) -> EngineResult<()> {
        let mut databases = lock(&self.shared.databases);
        let db = databases.entry(database.to_string()).or_default();
        if version < db.version {
            return Err(EngineError::VersionError {
                requested: version,
                current: db.version,
            });
        }
        for name in collections {
            db.collections.entry(name.clone()).or_default();
        }
        db.version = version;
        Ok(())
    }
}

struct MemoryConnection {
    engine: MemoryEngine,
    database: String,
}

impl Connection for MemoryConnection {
    fn database(&self) -> &str {
        &self.database
    }

    fn transaction(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> EngineResult<Box<dyn Transaction>> {
        self.engine.read(&self.database, collection, |_| ())?;
        Ok(Box::new(MemoryTransaction {
            engine: self.engine.clone(),
            database: self.database.clone(),
            collection: collection.to_string(),
            mode,
            staged: BTreeMap::new(),
            active: true,
        }))
    }

    fn close(self: Box<Self>) {
        let c = &self.engine.shared.counters;
        c.open.fetch_sub(1, Ordering::SeqCst);
        c.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct MemoryTransaction {
    engine: MemoryEngine,
    database: String,
    collection: String,
    mode: TransactionMode,
    // `None` marks a staged delete
    staged: BTreeMap<RecordKey, Option<Record>>,
    active: bool,
}

impl MemoryTransaction {
    fn check_active(&self) -> EngineResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(EngineError::TransactionInactive)
        }
    }

    fn check_writable(&self) -> EngineResult<()> {
        self.check_active()?;
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(EngineError::ReadOnly),
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.engine.latency(&self.collection) {
            tokio::time::sleep(delay).await;
        }
    }

    fn current(&self, key: &RecordKey) -> EngineResult<Option<Record>> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        self.engine
            .read(&self.database, &self.collection, |c| c.get(key).cloned())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn get(&mut self, key: &RecordKey) -> EngineResult<Option<Record>> {
        self.pause().await;
        self.check_active()?;
        self.current(key)
    }

    async fn add(&mut self, record: Record) -> EngineResult<RecordKey> {
        self.pause().await;
        self.check_writable()?;
        let key = record.key().ok_or(EngineError::InvalidKey)?;
        if self.current(&key)?.is_some() {
            return Err(EngineError::ConstraintViolation(key.to_string()));
        }
        self.staged.insert(key.clone(), Some(record));
        Ok(key)
    }

    async fn put(&mut self, record: Record) -> EngineResult<RecordKey> {
        self.pause().await;
        self.check_writable()?;
        let key = record.key().ok_or(EngineError::InvalidKey)?;
        self.staged.insert(key.clone(), Some(record));
        Ok(key)
    }

    async fn delete(&mut self, key: &RecordKey) -> EngineResult<Record> {
        self.pause().await;
        self.check_writable()?;
        let existing = self
            .current(key)?
            .ok_or_else(|| EngineError::KeyNotFound(key.to_string()))?;
        self.staged.insert(key.clone(), None);
        Ok(existing)
    }

    async fn open_cursor(&mut self) -> EngineResult<Box<dyn Cursor>> {
        self.pause().await;
        self.check_active()?;
        Ok(Box::new(MemoryCursor {
            engine: self.engine.clone(),
            database: self.database.clone(),
            collection: self.collection.clone(),
            position: None,
        }))
    }

    async fn commit(&mut self) -> TransactionOutcome {
        if !self.active {
            return TransactionOutcome::Error(EngineError::TransactionInactive);
        }
        self.active = false;
        let staged = std::mem::take(&mut self.staged);

        if self.mode == TransactionMode::ReadWrite && self.engine.aborts(&self.collection) {
            return TransactionOutcome::Aborted(format!(
                "transaction on '{}' aborted",
                self.collection
            ));
        }

        let mut databases = lock(&self.engine.shared.databases);
        let Some(collection) = databases
            .get_mut(&self.database)
            .and_then(|db| db.collections.get_mut(&self.collection))
        else {
            return TransactionOutcome::Error(EngineError::StoreNotFound(self.collection.clone()));
        };
        for (key, change) in staged {
            match change {
                Some(record) => {
                    collection.insert(key, record);
                }
                None => {
                    collection.remove(&key);
                }
            }
        }
        TransactionOutcome::Complete
    }
}

struct MemoryCursor {
    engine: MemoryEngine,
    database: String,
    collection: String,
    position: Option<RecordKey>,
}

#[async_trait]
impl Cursor for MemoryCursor {
    async fn advance(&mut self) -> EngineResult<Option<Record>> {
        if let Some(delay) = self.engine.latency(&self.collection) {
            tokio::time::sleep(delay).await;
        }
        let position = self.position.clone();
        let next = self.engine.read(&self.database, &self.collection, |c| {
            let lower = match position {
                None => Bound::Unbounded,
                Some(key) => Bound::Excluded(key),
            };
            let mut range = c.range::<RecordKey, (Bound<RecordKey>, Bound<RecordKey>)>((
                lower,
                Bound::Unbounded,
            ));
            range.next().map(|(k, r)| (k.clone(), r.clone()))
        })?;
        Ok(next.map(|(key, record)| {
            self.position = Some(key);
            record
        }))
    }
}
