//! Scene catalog store for Granary
//!
//! One wide table holds one row per scene. The scene key columns
//! (`starttime`, `stoptime`, `footprint`) carry a uniqueness constraint, and
//! every product kind owns a nullable TEXT column holding the granule path.
//! Product columns are added on demand as new kinds are discovered.
//!
//! # Usage
//!
//! ```rust,ignore
//! use granary_db::{CatalogDb, ProductKind, TableName};
//!
//! let db = CatalogDb::open("~/.granary/catalog.sqlite3", TableName::default()).await?;
//! let kind = ProductKind::new("mod03")?;
//! db.ensure_column(&kind).await?;
//! let outcome = db.upsert_slot(&key, &kind, "/data/MOD03.A2020001.0000.hdf").await?;
//! ```

mod error;
mod schema;
mod types;

// Method implementations organized by concern
mod catalog;

pub use catalog::POLE_LATITUDE;
pub use error::{DbError, Result};
pub use types::*;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

const MAX_CONNECTIONS: u32 = 8;

/// How long a writer waits for the SQLite write lock held by another worker.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the catalog table.
///
/// Cheap to clone; clones share the pool and the known-column cache, so one
/// handle can be given to every ingestion worker.
#[derive(Clone)]
pub struct CatalogDb {
    pool: SqlitePool,
    table: TableName,
    known_columns: Arc<RwLock<BTreeSet<ProductKind>>>,
}

impl std::fmt::Debug for CatalogDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogDb")
            .field("table", &self.table)
            .finish()
    }
}

impl CatalogDb {
    /// Open or create a catalog database at the given path.
    ///
    /// Creates the catalog table if it doesn't exist.
    pub async fn open(path: impl AsRef<Path>, table: TableName) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Self::connect(path, table, true).await?;
        db.ensure_table().await?;

        info!(path = %path.display(), table = %db.table, "Catalog opened");

        Ok(db)
    }

    /// Open an existing catalog database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>, table: TableName) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DbError::NotFound(format!(
                "Catalog database not found: {}",
                path.display()
            )));
        }

        let db = Self::connect(path, table, false).await?;
        db.refresh_schema().await?;
        Ok(db)
    }

    async fn connect(path: &Path, table: TableName, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            table,
            known_columns: Arc::new(RwLock::new(BTreeSet::new())),
        })
    }

    /// Get the underlying connection pool (escape hatch for ad-hoc queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("catalog.db");

        let db = CatalogDb::open(&db_path, TableName::default()).await.unwrap();
        assert!(db_path.exists());

        db.close().await;
    }

    #[tokio::test]
    async fn test_open_existing_fails_if_not_exists() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nonexistent.db");

        let result = CatalogDb::open_existing(&db_path, TableName::default()).await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }
}
