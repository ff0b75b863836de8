//! Scene row operations: slot upserts, reads and housekeeping.

use crate::error::{is_unique_violation, DbError, Result};
use crate::types::*;
use crate::CatalogDb;
use chrono::NaiveDateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Update → insert → retry-as-update cycles before giving up on a key.
const MAX_UPSERT_ATTEMPTS: u32 = 3;

/// Latitude at which a stored footprint is considered degenerate.
pub const POLE_LATITUDE: f64 = 90.0;

impl CatalogDb {
    // ========================================================================
    // Slot Operations
    // ========================================================================

    /// Point the `kind` slot of the scene identified by `key` at `path`.
    ///
    /// Updates the row whose key columns equal `key`; when none matches, a new
    /// row is inserted with only this slot filled. An insert that loses a race
    /// against a concurrent insert of the same key is rolled back and retried
    /// as an update, so one key never produces two rows. An existing value in
    /// the slot is overwritten.
    pub async fn upsert_slot(
        &self,
        key: &SceneKey,
        kind: &ProductKind,
        path: &str,
    ) -> Result<UpsertOutcome> {
        if !self.is_known_column(kind) {
            self.ensure_column(kind).await?;
        }

        let table = self.table.quoted();
        let column = kind.quoted();
        let update_sql = format!(
            "UPDATE {table} SET {column} = ? \
             WHERE starttime = ? AND stoptime = ? AND footprint = ? \
             RETURNING id"
        );
        let insert_sql = format!(
            "INSERT INTO {table} \
             (starttime, stoptime, footprint, tile, north, south, east, west, {column}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id"
        );

        let start = key.start_text();
        let stop = key.stop_text();
        let footprint = key.footprint();

        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            let mut tx = self.pool.begin().await?;

            let updated = sqlx::query(&update_sql)
                .bind(path)
                .bind(&start)
                .bind(&stop)
                .bind(key.footprint_wkt())
                .fetch_optional(&mut *tx)
                .await?;

            if let Some(row) = updated {
                let id: i64 = row.get("id");
                tx.commit().await?;
                return Ok(UpsertOutcome::Updated(id));
            }

            let inserted = sqlx::query(&insert_sql)
                .bind(&start)
                .bind(&stop)
                .bind(key.footprint_wkt())
                .bind(key.tile_id())
                .bind(footprint.north)
                .bind(footprint.south)
                .bind(footprint.east)
                .bind(footprint.west)
                .bind(path)
                .fetch_one(&mut *tx)
                .await;

            match inserted {
                Ok(row) => {
                    let id: i64 = row.get("id");
                    tx.commit().await?;
                    return Ok(UpsertOutcome::Inserted(id));
                }
                Err(err) if is_unique_violation(&err) => {
                    tx.rollback().await?;
                    debug!(
                        key = %key,
                        column = %kind,
                        attempt,
                        "Scene inserted concurrently, retrying as update"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(DbError::constraint(format!(
            "scene {} kept conflicting after {} attempts",
            key, MAX_UPSERT_ATTEMPTS
        )))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get the row matching a scene key.
    pub async fn get_row(&self, key: &SceneKey) -> Result<Option<CatalogRow>> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE starttime = ? AND stoptime = ? AND footprint = ?",
            self.table.quoted()
        ))
        .bind(key.start_text())
        .bind(key.stop_text())
        .bind(key.footprint_wkt())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_catalog_row).transpose()
    }

    /// List all rows in insertion order.
    pub async fn list_rows(&self) -> Result<Vec<CatalogRow>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} ORDER BY id",
            self.table.quoted()
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_catalog_row).collect()
    }

    pub async fn row_count(&self) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {}",
            self.table.quoted()
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Filled slots per product column.
    pub async fn slot_counts(&self) -> Result<BTreeMap<ProductKind, i64>> {
        let schema = self.schema().await?;
        if schema.is_empty() {
            return Ok(BTreeMap::new());
        }

        let counts = schema
            .columns
            .iter()
            .map(|kind| format!("COUNT({0}) AS {0}", kind.quoted()))
            .collect::<Vec<_>>()
            .join(", ");
        let row = sqlx::query(&format!("SELECT {} FROM {}", counts, self.table.quoted()))
            .fetch_one(&self.pool)
            .await?;

        schema
            .columns
            .into_iter()
            .map(|kind| -> Result<(ProductKind, i64)> {
                let n: i64 = row.try_get(kind.as_str())?;
                Ok((kind, n))
            })
            .collect()
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// Delete rows whose footprint reaches the pole.
    ///
    /// Malformed bounding metadata shows up as a ring touching latitude 90;
    /// such rows are dropped after ingestion. Returns the number removed.
    pub async fn remove_degenerate_footprints(&self) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE MAX(north, south) >= ?",
            self.table.quoted()
        ))
        .bind(POLE_LATITUDE)
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(table = %self.table, removed, "Removed scenes with degenerate footprints");
        }
        Ok(removed)
    }
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|e| DbError::invalid_state(format!("bad timestamp '{}': {}", value, e)))
}

fn row_to_catalog_row(row: &SqliteRow) -> Result<CatalogRow> {
    let start: String = row.try_get("starttime")?;
    let stop: String = row.try_get("stoptime")?;
    let footprint = Footprint::new(
        row.try_get("north")?,
        row.try_get("south")?,
        row.try_get("east")?,
        row.try_get("west")?,
    );
    let key = SceneKey::new(
        parse_timestamp(&start)?,
        parse_timestamp(&stop)?,
        footprint,
        row.try_get("tile")?,
    );

    let mut slots = BTreeMap::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name();
        if RESERVED_COLUMNS.contains(&name) {
            continue;
        }
        let Ok(kind) = ProductKind::new(name) else {
            continue;
        };
        if let Some(path) = row.try_get::<Option<String>, _>(index)? {
            slots.insert(kind, path);
        }
    }

    Ok(CatalogRow {
        id: row.try_get("id")?,
        key,
        slots,
    })
}
