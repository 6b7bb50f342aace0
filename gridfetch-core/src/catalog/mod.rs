pub mod reader;
pub mod sink;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use crate::error::Result;

pub use reader::CatalogReader;
pub use sink::EventSink;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Thin wrapper around a single-connection SQLite pool. The source
/// implementation opens two driver connections plus a global mutex to work
/// around a single-writer limitation at the driver level (DESIGN NOTES, "Two
/// database connections plus a global lock"); `sqlx`'s `SqlitePool` is
/// thread-safe on its own, so one connection with WAL journaling is
/// sufficient and the pool itself serializes access — no additional mutex
/// is introduced.
#[derive(Clone, Debug)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Opens (creating if absent) the catalog file at `path`, enables WAL
    /// journaling, and applies any pending migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Builds a catalog over an already-open pool (used by tests against
    /// `sqlite::memory:`), applying migrations but skipping file setup.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
