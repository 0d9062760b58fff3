//! folio maintenance binary.
//!
//! Inspects the shared idempotency store and derives keys the same way the
//! coordinator does.
//!
//! Usage:
//!   folio store list [--json]
//!   folio store prune
//!   folio key --command block.append --request '{"parent":"p1","children":[]}'
//!   folio config
//!
//! Set `FOLIO_DEBUG=1` (or `RUST_LOG`) for verbose logs on stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{Level, debug, info};

use folio_kernel::FolioConfig;
use folio_store::{FileBackend, IdempotencyStore, StoreEntry};
use folio_types::{IdempotencyKey, now_millis, request_hash};

/// Maintenance CLI for the folio idempotency store.
#[derive(Parser, Debug)]
#[command(name = "folio", version)]
#[command(about = "Inspect and maintain the folio idempotency store")]
struct Args {
    /// Config file (defaults to $FOLIO_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect or maintain the idempotency store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },

    /// Print the idempotency key, request hash and composite key for a request
    Key {
        /// Command name, e.g. block.append
        #[arg(long)]
        command: String,

        /// Canonical request as JSON
        #[arg(long)]
        request: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand, Debug)]
enum StoreAction {
    /// List every entry, expired ones included
    List {
        /// Emit a JSON array instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Remove expired entries now
    Prune,
}

fn main() -> Result<()> {
    let level = if folio_telemetry::debug_requested() {
        Level::DEBUG
    } else {
        Level::WARN
    };
    folio_telemetry::init_tracing(level);

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => FolioConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FolioConfig::load().context("loading configuration")?,
    };

    match args.command {
        Command::Store { action } => {
            let store = open_store(&config)?;
            let result = match action {
                StoreAction::List { json } => list_entries(&store, json),
                StoreAction::Prune => prune(&store),
            };
            store.close()?;
            result
        }
        Command::Key { command, request } => print_key(&config, &command, &request),
        Command::Config => {
            println!("# store: {}", config.store_path()?.display());
            println!("# audit: {}", config.audit_path()?.display());
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn open_store(config: &FolioConfig) -> Result<IdempotencyStore> {
    let path = config.store_path()?;
    debug!(path = %path.display(), "opening idempotency store");
    let backend = FileBackend::open(&path, config.lock_config())
        .with_context(|| format!("opening store {}", path.display()))?;
    Ok(IdempotencyStore::open(backend, config.store_config()))
}

fn list_entries(store: &IdempotencyStore, as_json: bool) -> Result<()> {
    let entries = store.entries()?;
    let now = now_millis();

    if as_json {
        let rows: Vec<Value> = entries
            .iter()
            .map(|(composite, entry)| entry_json(store, composite, entry))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("(no entries in {})", store.describe());
        return Ok(());
    }
    println!("{:<9} {:>8}  {:<24} KEY", "STATE", "AGE", "COMMAND");
    for (composite, entry) in &entries {
        let (key, command) = split_composite(composite);
        let state = match (entry.is_pending(), store.is_expired(entry)) {
            (_, true) => "expired",
            (true, false) => "pending",
            (false, false) => "complete",
        };
        let age = now.saturating_sub(entry.created_at) / 1000;
        println!("{state:<9} {:>7}s  {command:<24} {key}", age);
    }
    Ok(())
}

fn entry_json(store: &IdempotencyStore, composite: &str, entry: &StoreEntry) -> Value {
    let (key, command) = split_composite(composite);
    json!({
        "key": key,
        "command": command,
        "input_hash": entry.input_hash,
        "created_at": entry.created_at,
        "expired": store.is_expired(entry),
        "outcome": entry.outcome,
    })
}

fn prune(store: &IdempotencyStore) -> Result<()> {
    let removed = store.prune()?;
    info!(removed, "pruned idempotency store");
    println!("removed {removed} expired entries");
    Ok(())
}

fn print_key(config: &FolioConfig, command: &str, request: &str) -> Result<()> {
    let request: Value = serde_json::from_str(request).context("--request is not valid JSON")?;
    let key = IdempotencyKey::derive(
        command,
        &request,
        now_millis(),
        config.coordinator_config().bucket,
    );
    println!("key:       {key}");
    println!("hash:      {}", request_hash(&request));
    println!("composite: {}", key.composite().replace('\0', "\\0"));
    Ok(())
}

/// `(key, command)` from a composite store key.
fn split_composite(composite: &str) -> (&str, &str) {
    composite.split_once('\0').unwrap_or((composite, ""))
}
