//! The record adapter: model-level find/create/update/delete over a
//! [`StorageEngine`], with one-hop relationship embedding.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{field, info, instrument, Span};

use crate::codec::RecordCodec;
use crate::config::AdapterConfig;
use crate::engine::StorageEngine;
use crate::error::{AdapterError, AdapterResult};
use crate::executor::Executor;
use crate::gateway::Gateway;
use crate::id::generate_id_with_length;
use crate::migration::Migrator;
use crate::obs;
use crate::query::Query;
use crate::record::{Record, RecordKey, ID_FIELD};
use crate::resolver::{BatchRunner, Resolver};
use crate::scanner::Scanner;
use crate::schema::SchemaProvider;

/// Options for read operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindOptions {
    /// Embed related records of each result (one hop).
    pub allow_recursive: bool,
}

impl FindOptions {
    /// Return stored records only, without resolving relationships.
    pub fn shallow() -> Self {
        Self {
            allow_recursive: false,
        }
    }
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            allow_recursive: true,
        }
    }
}

/// Persists model records in a transactional key-value object store.
///
/// Each model type maps to a collection of the same name. Every operation
/// opens its own connection and transaction and closes them before it
/// settles. Collections must exist before use: call
/// [`RecordAdapter::initialize`] once to run the configured migrations.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use record_adapter::*;
/// # async fn demo() -> AdapterResult<()> {
/// let schema = StaticSchema::new().has_many("User", "posts", "Post");
/// let migrator = Migrator::new().with_migration(Migration::new(1, schema.type_names()));
/// let adapter = RecordAdapter::new(
///     AdapterConfig::default(),
///     Arc::new(MemoryEngine::new()),
///     Arc::new(schema),
///     migrator,
/// )?;
/// adapter.initialize().await?;
///
/// let user = adapter
///     .create_record("User", Record::new().with("name", "Ada"))
///     .await?;
/// let found = adapter
///     .find("User", user.key().unwrap(), FindOptions::default())
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RecordAdapter {
    config: AdapterConfig,
    engine: Arc<dyn StorageEngine>,
    migrator: Migrator,
    executor: Executor,
    scanner: Scanner,
    resolver: Resolver,
    initialized: AtomicBool,
}

impl RecordAdapter {
    /// Build an adapter. Nothing touches the engine until [`initialize`].
    ///
    /// [`initialize`]: RecordAdapter::initialize
    pub fn new(
        config: AdapterConfig,
        engine: Arc<dyn StorageEngine>,
        schema: Arc<dyn SchemaProvider>,
        migrator: Migrator,
    ) -> AdapterResult<Self> {
        config.validate()?;

        let gateway = Gateway::new(engine.clone(), config.database_name.as_str());
        let policy = config.transaction_policy;
        let executor = Executor::new(gateway.clone(), policy);
        let scanner = Scanner::new(gateway, policy);
        let resolver = Resolver::new(
            executor.clone(),
            scanner.clone(),
            schema,
            BatchRunner::new(config.relationship_concurrency),
        );

        Ok(Self {
            config,
            engine,
            migrator,
            executor,
            scanner,
            resolver,
            initialized: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Apply pending migrations and mark the adapter ready.
    ///
    /// Safe to call again; returns the database version.
    #[instrument(skip(self), fields(database = %self.config.database_name))]
    pub async fn initialize(&self) -> AdapterResult<u64> {
        let database = self.config.database_name.as_str();
        let version = self
            .with_deadline(self.migrator.migrate(self.engine.as_ref(), database))
            .await?;
        self.initialized.store(true, Ordering::Release);
        info!("Adapter ready on '{}' at version {}", database, version);
        Ok(version)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Find one record by id. An absent id is `Ok(None)`.
    #[instrument(skip(self, id), fields(key = field::Empty))]
    pub async fn find(
        &self,
        type_name: &str,
        id: impl Into<RecordKey>,
        opts: FindOptions,
    ) -> AdapterResult<Option<Record>> {
        let key = id.into();
        Span::current().record("key", field::display(&key));
        self.guarded(self.find_one(type_name, &key, opts)).await
    }

    /// Records whose id is in `ids`, in scan order.
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn find_many(
        &self,
        type_name: &str,
        ids: &[RecordKey],
        opts: FindOptions,
    ) -> AdapterResult<Vec<Record>> {
        self.guarded(async {
            let records = self.scanner.select_ids(type_name, ids).await?;
            self.resolve_all(type_name, records, opts).await
        })
        .await
    }

    /// Every record of the type, in scan order.
    #[instrument(skip(self))]
    pub async fn find_all(&self, type_name: &str, opts: FindOptions) -> AdapterResult<Vec<Record>> {
        self.guarded(async {
            let records = self.scanner.select_all(type_name).await?;
            self.resolve_all(type_name, records, opts).await
        })
        .await
    }

    /// Records matching every field of `query`, in scan order.
    #[instrument(skip(self, query), fields(fields = query.len()))]
    pub async fn find_query(
        &self,
        type_name: &str,
        query: &Query,
        opts: FindOptions,
    ) -> AdapterResult<Vec<Record>> {
        self.guarded(async {
            let records = self.scanner.select_query(type_name, query).await?;
            self.resolve_all(type_name, records, opts).await
        })
        .await
    }

    /// Insert a new record, generating an id when none is set.
    ///
    /// Embedded relationships are never stored.
    #[instrument(skip(self, record))]
    pub async fn create_record(&self, type_name: &str, record: Record) -> AdapterResult<Record> {
        let mut record = record.without_embedded();
        if !record.has_id() {
            let id = self.generate_id_for_record();
            obs::emit_id_generated(type_name, &id);
            record.insert(ID_FIELD, id);
        }
        self.guarded(self.executor.insert(type_name, record)).await
    }

    /// Replace the record stored at `record.id` (inserting it if absent).
    #[instrument(skip(self, record))]
    pub async fn update_record(&self, type_name: &str, record: Record) -> AdapterResult<Record> {
        let record = record.without_embedded();
        if record.key().is_none() {
            return Err(AdapterError::MissingId {
                collection: type_name.to_string(),
            });
        }
        self.guarded(self.executor.replace(type_name, record)).await
    }

    /// Delete the record stored at `record.id`, returning what was stored.
    #[instrument(skip(self, record))]
    pub async fn delete_record(&self, type_name: &str, record: &Record) -> AdapterResult<Record> {
        let key = record.key().ok_or_else(|| AdapterError::MissingId {
            collection: type_name.to_string(),
        })?;
        self.guarded(self.executor.remove(type_name, &key)).await
    }

    /// Embed the records `record` refers to, one hop deep.
    pub async fn load_relationships(&self, type_name: &str, record: Record) -> AdapterResult<Record> {
        self.guarded(self.resolver.load_relationships(type_name, record))
            .await
    }

    /// [`load_relationships`](Self::load_relationships) for each record,
    /// preserving input order.
    pub async fn load_relationships_for_many(
        &self,
        type_name: &str,
        records: Vec<Record>,
    ) -> AdapterResult<Vec<Record>> {
        self.guarded(self.resolver.load_relationships_for_many(type_name, records))
            .await
    }

    /// A fresh random id of the configured length. Not checked for uniqueness.
    pub fn generate_id_for_record(&self) -> String {
        generate_id_with_length(self.config.id_length)
    }

    /// Encode `model` and insert it.
    pub async fn create_model<M, C>(&self, type_name: &str, codec: &C, model: &M) -> AdapterResult<M>
    where
        C: RecordCodec<M>,
    {
        let record = codec.encode(model)?;
        codec.decode(self.create_record(type_name, record).await?)
    }

    /// Encode `model` and replace the stored record.
    pub async fn update_model<M, C>(&self, type_name: &str, codec: &C, model: &M) -> AdapterResult<M>
    where
        C: RecordCodec<M>,
    {
        let record = codec.encode(model)?;
        codec.decode(self.update_record(type_name, record).await?)
    }

    /// Delete the stored record for `model`, returning the stored version.
    pub async fn delete_model<M, C>(&self, type_name: &str, codec: &C, model: &M) -> AdapterResult<M>
    where
        C: RecordCodec<M>,
    {
        let record = codec.encode(model)?;
        codec.decode(self.delete_record(type_name, &record).await?)
    }

    /// Find and decode one record. Embedded relationships are not decoded.
    pub async fn find_model<M, C>(
        &self,
        type_name: &str,
        codec: &C,
        id: impl Into<RecordKey>,
    ) -> AdapterResult<Option<M>>
    where
        C: RecordCodec<M>,
    {
        self.find(type_name, id, FindOptions::shallow())
            .await?
            .map(|record| codec.decode(record))
            .transpose()
    }

    async fn find_one(
        &self,
        type_name: &str,
        key: &RecordKey,
        opts: FindOptions,
    ) -> AdapterResult<Option<Record>> {
        match self.executor.fetch(type_name, key).await? {
            Some(record) if opts.allow_recursive => {
                self.resolver.load_relationships(type_name, record).await.map(Some)
            }
            found => Ok(found),
        }
    }

    async fn resolve_all(
        &self,
        type_name: &str,
        records: Vec<Record>,
        opts: FindOptions,
    ) -> AdapterResult<Vec<Record>> {
        if !opts.allow_recursive || records.is_empty() {
            return Ok(records);
        }
        self.resolver.load_relationships_for_many(type_name, records).await
    }

    /// Reject use before initialization, then apply the configured deadline.
    async fn guarded<T>(&self, op: impl Future<Output = AdapterResult<T>>) -> AdapterResult<T> {
        if !self.is_initialized() {
            return Err(AdapterError::NotInitialized);
        }
        self.with_deadline(op).await
    }

    async fn with_deadline<T>(&self, op: impl Future<Output = AdapterResult<T>>) -> AdapterResult<T> {
        match self.config.request_timeout {
            None => op.await,
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .map_err(|_| AdapterError::Timeout(limit))?,
        }
    }
}

impl std::fmt::Debug for RecordAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordAdapter")
            .field("config", &self.config)
            .field("migrator", &self.migrator)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
