//! Record-Adapter CLI
//!
//! The `record-adapter` command reads and writes model records in a store
//! persisted as a JSON snapshot file.
//!
//! ## Commands
//!
//! - `init`: Provision a collection for every type in the schema
//! - `create` / `update` / `delete`: Write single records
//! - `find` / `find-many` / `all`: Read records, embedding relationships
//! - `query`: Filter a collection with `field=value` and `field~pattern` terms

mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use record_adapter::{
    AdapterConfig, FindOptions, MemoryEngine, Migration, Migrator, Query, Record, RecordAdapter,
    RecordKey, StaticSchema, StorageEngine,
};
use serde_json::Value;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "record-adapter")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Record store with one-hop relationship embedding", long_about = None)]
struct Cli {
    /// Snapshot file holding the store
    #[arg(long, global = true, env = "RECORD_ADAPTER_STORE", default_value = "records.json")]
    store: PathBuf,

    /// JSON schema file declaring types and relationships
    #[arg(long, global = true, env = "RECORD_ADAPTER_SCHEMA")]
    schema: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and provision collections for the schema's types
    Init,

    /// Insert a record; an id is generated when the record has none
    Create {
        /// Model type (collection name)
        type_name: String,

        /// Record as a JSON object
        data: String,
    },

    /// Replace the record stored at the record's id
    Update {
        /// Model type (collection name)
        type_name: String,

        /// Record as a JSON object, including its id
        data: String,
    },

    /// Delete a record by id
    Delete {
        /// Model type (collection name)
        type_name: String,

        /// Record id (integers are parsed as integer keys)
        id: String,
    },

    /// Find one record by id
    Find {
        type_name: String,

        id: String,

        /// Do not embed related records
        #[arg(long)]
        shallow: bool,
    },

    /// Find the records with the given ids
    FindMany {
        type_name: String,

        ids: Vec<String>,

        /// Do not embed related records
        #[arg(long)]
        shallow: bool,
    },

    /// Find records matching every term
    Query {
        type_name: String,

        /// `field=value` (JSON literal or bare string) or `field~pattern`
        #[arg(required = true)]
        terms: Vec<String>,

        /// Do not embed related records
        #[arg(long)]
        shallow: bool,
    },

    /// List every record of a type
    All {
        type_name: String,

        /// Do not embed related records
        #[arg(long)]
        shallow: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    let session = Session::open(&cli.store, cli.schema.as_deref()).await?;

    match cli.command {
        Commands::Init => cmd_init(&session),
        Commands::Create { type_name, data } => cmd_create(&session, &type_name, &data).await,
        Commands::Update { type_name, data } => cmd_update(&session, &type_name, &data).await,
        Commands::Delete { type_name, id } => cmd_delete(&session, &type_name, &id).await,
        Commands::Find {
            type_name,
            id,
            shallow,
        } => cmd_find(&session, &type_name, &id, find_options(shallow)).await,
        Commands::FindMany {
            type_name,
            ids,
            shallow,
        } => cmd_find_many(&session, &type_name, &ids, find_options(shallow)).await,
        Commands::Query {
            type_name,
            terms,
            shallow,
        } => cmd_query(&session, &type_name, &terms, find_options(shallow)).await,
        Commands::All { type_name, shallow } => {
            cmd_all(&session, &type_name, find_options(shallow)).await
        }
    }
}

/// An initialized adapter over the snapshot file.
struct Session {
    engine: MemoryEngine,
    adapter: RecordAdapter,
    store: PathBuf,
    version: u64,
}

impl Session {
    async fn open(store: &Path, schema: Option<&Path>) -> Result<Self> {
        let schema = match schema {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read schema {}", path.display()))?;
                StaticSchema::from_json(&json)
                    .with_context(|| format!("Invalid schema {}", path.display()))?
            }
            None => StaticSchema::new(),
        };

        let engine = MemoryEngine::load_or_default(store)
            .with_context(|| format!("Failed to load store {}", store.display()))?;
        let config = AdapterConfig::from_env().context("Invalid adapter configuration")?;
        let migrator = migrator_for(&engine, &config.database_name, &schema).await?;

        let adapter = RecordAdapter::new(
            config,
            Arc::new(engine.clone()),
            Arc::new(schema),
            migrator,
        )?;
        let version = adapter
            .initialize()
            .await
            .context("Failed to initialize store")?;

        Ok(Self {
            engine,
            adapter,
            store: store.to_path_buf(),
            version,
        })
    }

    fn save(&self) -> Result<()> {
        self.engine
            .save(&self.store)
            .with_context(|| format!("Failed to save store {}", self.store.display()))
    }
}

/// Version 1 provisions every schema type; types added to the schema later
/// get a follow-up version on the next run.
async fn migrator_for(
    engine: &MemoryEngine,
    database: &str,
    schema: &StaticSchema,
) -> Result<Migrator> {
    let types = schema.type_names();
    let current = engine.version(database).await?;
    let existing = engine.collection_names(database);
    let missing: Vec<String> = types
        .iter()
        .filter(|t| !existing.contains(t))
        .cloned()
        .collect();

    let mut migrator = Migrator::new().with_migration(Migration::new(1, types));
    if current >= 1 && !missing.is_empty() {
        migrator = migrator.with_migration(Migration::new(current + 1, missing));
    }
    Ok(migrator)
}

fn find_options(shallow: bool) -> FindOptions {
    if shallow {
        FindOptions::shallow()
    } else {
        FindOptions::default()
    }
}

/// Integers become integer keys; anything else is a string key.
fn parse_key(raw: &str) -> RecordKey {
    raw.parse::<i64>()
        .map(RecordKey::Int)
        .unwrap_or_else(|_| RecordKey::Text(raw.to_string()))
}

fn parse_record(data: &str) -> Result<Record> {
    let value: Value = serde_json::from_str(data).context("Record is not valid JSON")?;
    Ok(Record::try_from(value)?)
}

/// Split a term at its first `=` or `~`.
fn parse_term(query: Query, term: &str) -> Result<Query> {
    let Some(at) = term.find(|c: char| c == '=' || c == '~') else {
        bail!("Query term '{}' must be field=value or field~pattern", term);
    };
    let (field, rest) = term.split_at(at);
    if field.is_empty() {
        bail!("Query term '{}' has no field name", term);
    }
    let operand = &rest[1..];

    if rest.starts_with('~') {
        Ok(query.matching(field, operand)?)
    } else {
        let literal =
            serde_json::from_str(operand).unwrap_or_else(|_| Value::String(operand.to_string()));
        Ok(query.equals(field, literal))
    }
}

fn parse_query(terms: &[String]) -> Result<Query> {
    terms
        .iter()
        .try_fold(Query::new(), |query, term| parse_term(query, term))
}

fn print_value(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_records(records: Vec<Record>) -> Result<()> {
    print_value(Value::Array(records.into_iter().map(Record::into_value).collect()))
}

/// Create the store and provision collections
fn cmd_init(session: &Session) -> Result<()> {
    session.save()?;
    info!("Store initialized at {}", session.store.display());

    println!(
        "Initialized store at {} (version {})",
        session.store.display(),
        session.version
    );
    for name in session
        .engine
        .collection_names(&session.adapter.config().database_name)
    {
        println!("  {}", name);
    }
    Ok(())
}

/// Insert a record
async fn cmd_create(session: &Session, type_name: &str, data: &str) -> Result<()> {
    let record = parse_record(data)?;
    let saved = session
        .adapter
        .create_record(type_name, record)
        .await
        .with_context(|| format!("Failed to create {} record", type_name))?;
    session.save()?;
    print_value(saved.into_value())
}

/// Replace a record
async fn cmd_update(session: &Session, type_name: &str, data: &str) -> Result<()> {
    let record = parse_record(data)?;
    let saved = session
        .adapter
        .update_record(type_name, record)
        .await
        .with_context(|| format!("Failed to update {} record", type_name))?;
    session.save()?;
    print_value(saved.into_value())
}

/// Delete a record by id
async fn cmd_delete(session: &Session, type_name: &str, id: &str) -> Result<()> {
    let mut record = Record::new();
    record.set_key(&parse_key(id));

    let removed = session
        .adapter
        .delete_record(type_name, &record)
        .await
        .with_context(|| format!("Failed to delete {} '{}'", type_name, id))?;
    session.save()?;
    print_value(removed.into_value())
}

/// Find one record
async fn cmd_find(session: &Session, type_name: &str, id: &str, opts: FindOptions) -> Result<()> {
    match session.adapter.find(type_name, parse_key(id), opts).await? {
        Some(record) => print_value(record.into_value()),
        None => {
            eprintln!("No {} record with id '{}'", type_name, id);
            print_value(Value::Null)
        }
    }
}

/// Find records by id
async fn cmd_find_many(
    session: &Session,
    type_name: &str,
    ids: &[String],
    opts: FindOptions,
) -> Result<()> {
    let keys: Vec<RecordKey> = ids.iter().map(|id| parse_key(id)).collect();
    let records = session.adapter.find_many(type_name, &keys, opts).await?;
    print_records(records)
}

/// Filter a collection
async fn cmd_query(
    session: &Session,
    type_name: &str,
    terms: &[String],
    opts: FindOptions,
) -> Result<()> {
    let query = parse_query(terms)?;
    let records = session.adapter.find_query(type_name, &query, opts).await?;
    print_records(records)
}

/// List a collection
async fn cmd_all(session: &Session, type_name: &str, opts: FindOptions) -> Result<()> {
    let records = session.adapter.find_all(type_name, opts).await?;
    print_records(records)
}
