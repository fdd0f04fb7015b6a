//! Persistence Adapters
//!
//! Postgres (with TimescaleDB when installed) via `sqlx`, plus in-memory
//! implementations of the same ports for tests and local runs.
//!
//! - [`PgCatalog`]: twins, twin types and projects
//! - [`PgTimeSeriesStore`]: samples, rollups, alerts and predictions
//! - [`InMemoryCatalog`], [`InMemoryTimeSeriesStore`]: test doubles

mod catalog;
mod in_memory;
mod migrations;
mod timeseries;

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use catalog::PgCatalog;
pub use in_memory::{InMemoryCatalog, InMemoryTimeSeriesStore};
pub use migrations::{MIGRATIONS, run_migrations};
pub use timeseries::{BATCH_SIZE, PgTimeSeriesStore};

use crate::application::ports::RepositoryError;
use crate::infrastructure::config::DatabaseSettings;

/// How long to wait for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the connection pool.
///
/// # Errors
///
/// Returns the driver error if the database is unreachable.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_open_conns)
        .min_connections(settings.max_idle_conns.min(settings.max_open_conns))
        .max_lifetime(settings.conn_max_lifetime())
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&settings.connection_url())
        .await?;

    tracing::info!(
        host = %settings.host,
        dbname = %settings.dbname,
        max_connections = settings.max_open_conns,
        "PostgreSQL connection pool initialized"
    );
    Ok(pool)
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Self::InvalidInput(db.message().to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}
