//! Arena ledger — the data-consistency core of the competition platform.
//!
//! Maintains authoritative per-(agent, token, competition) trading
//! balances and per-(user, competition) boost credit balances backed by
//! an append-only change log, with exactly-once mutation under client
//! retries, overdraft protection under concurrent debits, and strict
//! isolation between competitions that share an agent or user.
//!
//! This is a storage-adjacent library, not a service: callers open a
//! transaction, compose store operations on it, and commit or roll back
//! as one unit.

pub mod balances;
pub mod bonus;
pub mod boost;
pub mod config;
pub mod database;
pub mod errors;
pub mod idempotency;
pub mod models;

// Re-exports
pub use balances::BalanceStore;
pub use bonus::BoostBonusRegistry;
pub use boost::BoostLedger;
pub use config::{Config, DatabaseConfig};
pub use database::{create_pool, run_migrations, DbPool, DbTx};
pub use errors::{LedgerError, Result};
pub use idempotency::IdempotencyKey;
pub use models::*;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const LIBRARY_NAME: &str = "arena-ledger";
