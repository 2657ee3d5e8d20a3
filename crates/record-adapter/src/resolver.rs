//! Relationship resolution
//!
//! [`Resolver::load_relationships`] embeds the records a record refers to
//! under `_embedded`, one hop deep. Related records are read straight
//! through the executor and scanner, which never resolve relationships
//! themselves, so an embedded record never carries an `_embedded` map of its
//! own.
//!
//! [`Resolver::load_relationships_for_many`] does the same for a list of
//! records through a [`BatchRunner`], bounding how many records resolve at
//! once.

use std::future::Future;
use std::sync::Arc;

use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use futures::TryFutureExt;
use serde_json::Value;
use tracing::instrument;

use crate::error::{AdapterError, AdapterResult};
use crate::executor::Executor;
use crate::obs;
use crate::record::{Record, RecordKey};
use crate::scanner::Scanner;
use crate::schema::{RelationshipDescriptor, RelationshipKind, SchemaProvider};

/// Runs one future per item with at most `limit` in flight, keeping input
/// order in the output.
///
/// With `limit == 1` the next item starts only after the previous one
/// settled. The first failure stops the run and is reported with its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRunner {
    limit: usize,
}

impl BatchRunner {
    /// Strictly sequential runner
    pub const SEQUENTIAL: BatchRunner = BatchRunner { limit: 1 };

    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, (usize, AdapterError)>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = AdapterResult<R>>,
    {
        stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| f(item).map_err(move |err| (index, err)))
            .buffered(self.limit)
            .try_collect()
            .await
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::SEQUENTIAL
    }
}

/// What to read for one relationship field.
#[derive(Debug)]
enum Lookup {
    One(RecordKey),
    Many(Vec<RecordKey>),
}

impl Lookup {
    fn plan(type_name: &str, descriptor: &RelationshipDescriptor, value: &Value) -> AdapterResult<Self> {
        let invalid = || AdapterError::InvalidReference {
            type_name: type_name.to_string(),
            relation: descriptor.name.clone(),
            value: value.to_string(),
        };

        match descriptor.kind {
            RelationshipKind::BelongsTo | RelationshipKind::HasOne => {
                RecordKey::from_value(value).map(Lookup::One).ok_or_else(invalid)
            }
            RelationshipKind::HasMany => {
                let Value::Array(items) = value else {
                    return Err(invalid());
                };
                items
                    .iter()
                    .map(RecordKey::from_value)
                    .collect::<Option<Vec<_>>>()
                    .map(Lookup::Many)
                    .ok_or_else(invalid)
            }
        }
    }
}

/// Embeds related records using the type metadata from a [`SchemaProvider`].
#[derive(Clone)]
pub struct Resolver {
    executor: Executor,
    scanner: Scanner,
    schema: Arc<dyn SchemaProvider>,
    batch: BatchRunner,
}

impl Resolver {
    pub fn new(
        executor: Executor,
        scanner: Scanner,
        schema: Arc<dyn SchemaProvider>,
        batch: BatchRunner,
    ) -> Self {
        Self {
            executor,
            scanner,
            schema,
            batch,
        }
    }

    /// Resolve every non-null relationship field of `record`.
    ///
    /// Fetches run concurrently; any failure fails the whole record.
    #[instrument(skip(self, record))]
    pub async fn load_relationships(&self, type_name: &str, mut record: Record) -> AdapterResult<Record> {
        let relationships = self.schema.relationships(type_name);

        let mut lookups = Vec::new();
        for descriptor in relationships.ordered() {
            match record.get(&descriptor.name) {
                None | Some(Value::Null) => continue,
                Some(value) => lookups.push((descriptor, Lookup::plan(type_name, descriptor, value)?)),
            }
        }
        if lookups.is_empty() {
            return Ok(record);
        }

        let related = try_join_all(
            lookups
                .iter()
                .map(|(descriptor, lookup)| self.fetch_related(descriptor, lookup)),
        )
        .await?;

        let mut embedded = 0;
        for ((descriptor, _), value) in lookups.iter().zip(related) {
            if let Some(value) = value {
                record.embed(descriptor.name.as_str(), value);
                embedded += 1;
            }
        }
        obs::emit_relationships_loaded(type_name, lookups.len(), embedded);
        Ok(record)
    }

    /// Resolve relationships for each record, preserving input order.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn load_relationships_for_many(
        &self,
        type_name: &str,
        records: Vec<Record>,
    ) -> AdapterResult<Vec<Record>> {
        let total = records.len();
        self.batch
            .run(records, |record| self.load_relationships(type_name, record))
            .await
            .map_err(|(index, source)| {
                obs::emit_batch_failed(type_name, index, total, &source);
                AdapterError::Relationship {
                    type_name: type_name.to_string(),
                    index,
                    source: Box::new(source),
                }
            })
    }

    async fn fetch_related(
        &self,
        descriptor: &RelationshipDescriptor,
        lookup: &Lookup,
    ) -> AdapterResult<Option<Value>> {
        match lookup {
            Lookup::One(key) => Ok(self
                .executor
                .fetch(&descriptor.target_type, key)
                .await?
                .map(Record::into_value)),
            Lookup::Many(keys) => {
                let records = self.scanner.select_ids(&descriptor.target_type, keys).await?;
                Ok(Some(Value::Array(
                    records.into_iter().map(Record::into_value).collect(),
                )))
            }
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("executor", &self.executor)
            .field("scanner", &self.scanner)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}
