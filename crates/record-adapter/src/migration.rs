//! Collection provisioning.
//!
//! The adapter never creates collections on demand. A [`Migrator`] holds an
//! ordered list of versioned steps; `migrate` applies every step newer than
//! the database's stored version and is safe to run on every start.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::engine::StorageEngine;
use crate::error::{AdapterError, AdapterResult};
use crate::obs;

/// One schema version and the collections it introduces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub version: u64,
    pub collections: Vec<String>,
}

impl Migration {
    pub fn new<I, S>(version: u64, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version,
            collections: collections.into_iter().map(Into::into).collect(),
        }
    }
}

/// Ordered list of migrations for one database
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    migrations: Vec<Migration>,
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a migration step
    pub fn with_migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Highest version this migrator knows about
    pub fn latest_version(&self) -> u64 {
        self.migrations.iter().map(|m| m.version).max().unwrap_or(0)
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    fn validate(&self) -> AdapterResult<()> {
        let mut versions: Vec<u64> = self.migrations.iter().map(|m| m.version).collect();
        versions.sort_unstable();
        if versions.first() == Some(&0) {
            return Err(AdapterError::Migration(
                "migration versions start at 1".to_string(),
            ));
        }
        if let Some(pair) = versions.windows(2).find(|w| w[0] == w[1]) {
            return Err(AdapterError::Migration(format!(
                "version {} is declared twice",
                pair[0]
            )));
        }
        Ok(())
    }

    /// Apply pending migrations, returning the database version afterwards.
    #[instrument(skip(self, engine))]
    pub async fn migrate(&self, engine: &dyn StorageEngine, database: &str) -> AdapterResult<u64> {
        self.validate()?;

        let current = engine
            .version(database)
            .await
            .map_err(|e| AdapterError::Migration(format!("reading version of '{}': {}", database, e)))?;

        let mut pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| m.version > current)
            .collect();
        pending.sort_by_key(|m| m.version);

        if pending.is_empty() {
            debug!("Database '{}' is up to date at version {}", database, current);
            return Ok(current);
        }

        let mut version = current;
        for migration in pending {
            engine
                .upgrade(database, migration.version, &migration.collections)
                .await
                .map_err(|e| {
                    AdapterError::Migration(format!(
                        "upgrading '{}' to version {}: {}",
                        database, migration.version, e
                    ))
                })?;
            obs::emit_migration_applied(database, migration.version, migration.collections.len());
            version = migration.version;
        }

        info!("Database '{}' migrated from version {} to {}", database, current, version);
        Ok(version)
    }
}
