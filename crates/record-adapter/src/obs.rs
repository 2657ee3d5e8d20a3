//! Structured observability events for adapter operations.
//!
//! Events are emitted as `tracing` events with an `event` field so they can
//! be filtered and aggregated (`RUST_LOG`, JSON output in the CLI).

use tracing::{debug, info, warn};

/// Emit event: a transaction reported an error or abort after its request settled.
pub fn emit_transaction_diagnostic(collection: &str, kind: &str, detail: &str) {
    warn!(
        event = "adapter.transaction_diagnostic",
        collection = %collection,
        kind = %kind,
        detail = %detail,
    );
}

/// Emit event: a cursor scan ran to exhaustion.
pub fn emit_scan_finished(collection: &str, scanned: usize) {
    debug!(event = "adapter.scan_finished", collection = %collection, scanned = scanned);
}

/// Emit event: relationships were embedded into a record.
pub fn emit_relationships_loaded(type_name: &str, requested: usize, embedded: usize) {
    debug!(
        event = "adapter.relationships_loaded",
        type_name = %type_name,
        requested = requested,
        embedded = embedded,
    );
}

/// Emit event: a batch relationship load stopped at a failing record.
pub fn emit_batch_failed(type_name: &str, index: usize, total: usize, error: &dyn std::fmt::Display) {
    warn!(
        event = "adapter.batch_failed",
        type_name = %type_name,
        index = index,
        total = total,
        error = %error,
    );
}

/// Emit event: a migration step raised the database version.
pub fn emit_migration_applied(database: &str, version: u64, collections: usize) {
    info!(
        event = "adapter.migration_applied",
        database = %database,
        version = version,
        collections = collections,
    );
}

/// Emit event: a record was written without a caller-supplied id.
pub fn emit_id_generated(collection: &str, id: &str) {
    debug!(event = "adapter.id_generated", collection = %collection, id = %id);
}
