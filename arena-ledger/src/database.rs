//! Connection pool and transaction plumbing.
//!
//! Every mutating store operation accepts an `Option<&mut DbTx<'_>>`.
//! With `Some`, statements run on the caller's transaction and the
//! caller decides when the composed unit commits or rolls back. With
//! `None`, the store opens and commits a single-operation transaction
//! of its own.

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Transaction};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::errors::Result;

pub type DbPool = Pool<Postgres>;
pub type DbTx<'a> = Transaction<'a, Postgres>;

pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect(&config.url)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    info!("Database connection pool created successfully");

    Ok(pool)
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::from(e))?;

    info!("Database migrations applied");

    Ok(())
}
