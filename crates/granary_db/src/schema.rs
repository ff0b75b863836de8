//! Catalog table creation and schema evolution.
//!
//! Both operations are idempotent and never destructive. Product columns are
//! only ever added.

use crate::error::{is_duplicate_column, Result};
use crate::types::{CatalogSchema, ColumnChange, ProductKind, RESERVED_COLUMNS};
use crate::CatalogDb;
use sqlx::Row;
use tracing::{debug, info};

impl CatalogDb {
    /// Create the catalog table and its footprint index if absent.
    pub async fn ensure_table(&self) -> Result<()> {
        let table = self.table.quoted();

        sqlx::query(&format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                starttime TEXT    NOT NULL,
                stoptime  TEXT    NOT NULL,
                footprint TEXT    NOT NULL,
                tile      TEXT,
                north     REAL    NOT NULL,
                south     REAL    NOT NULL,
                east      REAL    NOT NULL,
                west      REAL    NOT NULL,
                UNIQUE (starttime, stoptime, footprint)
            )"#
        ))
        .execute(&self.pool)
        .await?;

        // Plain B-tree over the bounds columns. Not a spatial index: it only
        // narrows range scans on `west`; overlap queries still filter rows.
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{}_footprint\" ON {table} (west, east, south, north)",
            self.table.as_str()
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{}_time\" ON {table} (starttime, stoptime)",
            self.table.as_str()
        ))
        .execute(&self.pool)
        .await?;

        self.refresh_schema().await?;

        debug!(table = %self.table, "Catalog table verified");
        Ok(())
    }

    /// Add a product column if it is missing.
    ///
    /// Safe to call concurrently: losing the race to another worker that added
    /// the same column counts as success.
    pub async fn ensure_column(&self, kind: &ProductKind) -> Result<ColumnChange> {
        if self.is_known_column(kind) {
            return Ok(ColumnChange::Existing);
        }

        if self.column_exists(kind).await? {
            self.remember_column(kind);
            return Ok(ColumnChange::Existing);
        }

        let alter = format!(
            "ALTER TABLE {} ADD COLUMN {} TEXT",
            self.table.quoted(),
            kind.quoted()
        );
        match sqlx::query(&alter).execute(&self.pool).await {
            Ok(_) => {
                info!(table = %self.table, column = %kind, "Added product column");
                self.remember_column(kind);
                Ok(ColumnChange::Added)
            }
            Err(err) if is_duplicate_column(&err) => {
                debug!(column = %kind, "Product column added concurrently");
                self.remember_column(kind);
                Ok(ColumnChange::Existing)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Current product columns, read from the table definition.
    pub async fn schema(&self) -> Result<CatalogSchema> {
        let rows = sqlx::query("SELECT name FROM pragma_table_info(?) ORDER BY cid")
            .bind(self.table.as_str())
            .fetch_all(&self.pool)
            .await?;

        let columns = rows
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .filter(|name| !RESERVED_COLUMNS.contains(&name.as_str()))
            .filter_map(|name| ProductKind::new(name).ok())
            .collect();

        Ok(CatalogSchema { columns })
    }

    /// Reload the known-column cache from the table definition.
    pub(crate) async fn refresh_schema(&self) -> Result<()> {
        let schema = self.schema().await?;
        if let Ok(mut known) = self.known_columns.write() {
            known.extend(schema.columns);
        }
        Ok(())
    }

    async fn column_exists(&self, kind: &ProductKind) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM pragma_table_info(?) WHERE name = ?")
            .bind(self.table.as_str())
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub(crate) fn is_known_column(&self, kind: &ProductKind) -> bool {
        self.known_columns
            .read()
            .map(|known| known.contains(kind))
            .unwrap_or(false)
    }

    fn remember_column(&self, kind: &ProductKind) {
        if let Ok(mut known) = self.known_columns.write() {
            known.insert(kind.clone());
        }
    }
}
