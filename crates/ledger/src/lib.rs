//! Installation ledger: durable, append-only record of per-module outcomes.
//!
//! Every status change is a new record keyed by `(run_id, module_id)`. The
//! current state of a run is the replay of its records, which is what lets a
//! run with the same id pick up where an interrupted one stopped.
//! Backends: JSON lines under `<state_dir>/ledger/` ([`store_file::FileStore`]),
//! SQLite ([`store_sqlite::SqliteStore`]) or memory for tests.

pub mod error;
pub mod handle;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    handle::{Ledger, LedgerHandle, TransitionDetails, validate_run_id},
    store::LedgerStore,
    types::{LedgerEntry, LedgerRecord, LedgerStatus, Parameters},
};

/// Run database migrations for the ledger tables.
///
/// Call before [`store_sqlite::SqliteStore::with_pool`] when sharing a pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
