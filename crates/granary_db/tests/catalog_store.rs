//! Integration tests for the catalog store.
//!
//! These exercise the upsert protocol, schema evolution and housekeeping
//! against a real SQLite file.

use chrono::{NaiveDate, NaiveDateTime};
use granary_db::{
    CatalogDb, ColumnChange, Footprint, ProductKind, SceneKey, TableName, UpsertOutcome,
};
use std::path::PathBuf;
use tempfile::TempDir;

struct TestEnv {
    _temp: TempDir,
    db_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp.path().join("catalog.sqlite3");
        Self {
            _temp: temp,
            db_path,
        }
    }

    async fn open(&self) -> CatalogDb {
        CatalogDb::open(&self.db_path, TableName::default())
            .await
            .expect("Failed to open catalog")
    }
}

fn ts(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn key(minute: u32, north: f64) -> SceneKey {
    SceneKey::new(
        ts(1, 0, minute),
        ts(1, 0, minute + 5),
        Footprint::new(north, north - 20.0, 40.0, 10.0),
        None,
    )
}

fn kind(name: &str) -> ProductKind {
    ProductKind::new(name).unwrap()
}

// ============================================================================
// Schema
// ============================================================================

#[tokio::test]
async fn test_ensure_table_is_idempotent() {
    let env = TestEnv::new();
    let db = env.open().await;
    db.upsert_slot(&key(0, 50.0), &kind("mod03"), "/a/MOD03.hdf")
        .await
        .unwrap();

    db.ensure_table().await.unwrap();
    db.ensure_table().await.unwrap();

    // Reopening runs ensure_table again and keeps the data
    db.close().await;
    let db = env.open().await;
    assert_eq!(db.row_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_bounds_index_is_plain_btree() {
    let env = TestEnv::new();
    let db = env.open().await;

    let indexes: Vec<(String, String)> = sqlx::query_as(
        "SELECT name, sql FROM sqlite_master \
         WHERE type = 'index' AND tbl_name = 'catalog' AND sql IS NOT NULL",
    )
    .fetch_all(db.pool())
    .await
    .unwrap();

    let (_, sql) = indexes
        .iter()
        .find(|(name, _)| name == "idx_catalog_footprint")
        .expect("bounds index missing");
    assert!(sql.contains("(west, east, south, north)"));

    let virtual_tables: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE sql LIKE '%VIRTUAL TABLE%'")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(virtual_tables, 0);
}

#[tokio::test]
async fn test_ensure_column_adds_once() {
    let env = TestEnv::new();
    let db = env.open().await;

    assert_eq!(
        db.ensure_column(&kind("mod09")).await.unwrap(),
        ColumnChange::Added
    );
    assert_eq!(
        db.ensure_column(&kind("mod09")).await.unwrap(),
        ColumnChange::Existing
    );

    let schema = db.schema().await.unwrap();
    assert_eq!(schema.len(), 1);
    assert!(schema.contains(&kind("mod09")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ensure_column_tolerates_races() {
    let env = TestEnv::new();
    let first = env.open().await;
    let second = CatalogDb::open_existing(&env.db_path, TableName::default())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let db = if i % 2 == 0 {
            first.clone()
        } else {
            second.clone()
        };
        handles.push(tokio::spawn(async move {
            db.ensure_column(&kind("mod35")).await
        }));
    }

    let mut added = 0;
    for handle in handles {
        let change = handle.await.unwrap().expect("ensure_column must not fail");
        if change == ColumnChange::Added {
            added += 1;
        }
    }

    assert_eq!(added, 1);
    assert_eq!(first.schema().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_schema_growth_keeps_existing_slots() {
    let env = TestEnv::new();
    let db = env.open().await;
    let k = key(0, 50.0);

    db.upsert_slot(&k, &kind("mod03"), "/a/MOD03.hdf").await.unwrap();
    let before = db.schema().await.unwrap();

    db.upsert_slot(&k, &kind("mod13q1"), "/a/MOD13Q1.hdf")
        .await
        .unwrap();
    let after = db.schema().await.unwrap();

    assert_eq!(after.len(), before.len() + 1);
    let row = db.get_row(&k).await.unwrap().unwrap();
    assert_eq!(row.slot("mod03"), Some("/a/MOD03.hdf"));
    assert_eq!(row.slot("mod13q1"), Some("/a/MOD13Q1.hdf"));
}

// ============================================================================
// Upserts
// ============================================================================

#[tokio::test]
async fn test_upsert_inserts_then_updates() {
    let env = TestEnv::new();
    let db = env.open().await;
    let k = key(0, 50.0);

    let first = db.upsert_slot(&k, &kind("mod03"), "/a/MOD03.hdf").await.unwrap();
    assert!(matches!(first, UpsertOutcome::Inserted(_)));

    let second = db
        .upsert_slot(&k, &kind("mod021km"), "/a/MOD021KM.hdf")
        .await
        .unwrap();
    assert_eq!(second, UpsertOutcome::Updated(first.row_id()));

    let row = db.get_row(&k).await.unwrap().unwrap();
    assert_eq!(row.id, first.row_id());
    assert_eq!(row.slots.len(), 2);
    assert_eq!(row.key, k);
}

#[tokio::test]
async fn test_upsert_same_value_is_noop() {
    let env = TestEnv::new();
    let db = env.open().await;
    let k = key(0, 50.0);

    db.upsert_slot(&k, &kind("mod03"), "/a/MOD03.hdf").await.unwrap();
    let again = db.upsert_slot(&k, &kind("mod03"), "/a/MOD03.hdf").await.unwrap();

    assert!(matches!(again, UpsertOutcome::Updated(_)));
    assert_eq!(db.row_count().await.unwrap(), 1);
    let rows = db.list_rows().await.unwrap();
    assert_eq!(rows[0].slot("mod03"), Some("/a/MOD03.hdf"));
}

#[tokio::test]
async fn test_upsert_last_writer_wins() {
    let env = TestEnv::new();
    let db = env.open().await;
    let k = key(0, 50.0);

    db.upsert_slot(&k, &kind("mod09"), "/a/MOD09.v1.hdf").await.unwrap();
    db.upsert_slot(&k, &kind("mod09"), "/b/MOD09.v2.hdf").await.unwrap();

    let row = db.get_row(&k).await.unwrap().unwrap();
    assert_eq!(row.slot("mod09"), Some("/b/MOD09.v2.hdf"));
}

#[tokio::test]
async fn test_distinct_keys_get_distinct_rows() {
    let env = TestEnv::new();
    let db = env.open().await;

    db.upsert_slot(&key(0, 50.0), &kind("mod03"), "/a").await.unwrap();
    db.upsert_slot(&key(5, 50.0), &kind("mod03"), "/b").await.unwrap();
    db.upsert_slot(&key(0, 51.0), &kind("mod03"), "/c").await.unwrap();

    assert_eq!(db.row_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_signed_zero_bounds_match_one_row() {
    let env = TestEnv::new();
    let db = env.open().await;
    let positive = SceneKey::new(
        ts(1, 0, 0),
        ts(1, 0, 5),
        Footprint::new(10.0, 0.0, 20.0, 5.0),
        None,
    );
    let negative = SceneKey::new(
        ts(1, 0, 0),
        ts(1, 0, 5),
        Footprint::new(10.0, -0.0, 20.0, 5.0),
        None,
    );

    let first = db
        .upsert_slot(&positive, &kind("mod03"), "/a/MOD03.hdf")
        .await
        .unwrap();
    let second = db
        .upsert_slot(&negative, &kind("mod021km"), "/b/MOD021KM.hdf")
        .await
        .unwrap();

    assert!(matches!(first, UpsertOutcome::Inserted(_)));
    assert_eq!(second, UpsertOutcome::Updated(first.row_id()));
    assert_eq!(db.row_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_tile_is_stored_but_not_matched() {
    let env = TestEnv::new();
    let db = env.open().await;
    let fp = Footprint::new(40.0, 30.0, 20.0, 10.0);
    let tiled = SceneKey::new(ts(1, 0, 0), ts(1, 0, 5), fp, Some("h18v04".to_string()));
    let untiled = SceneKey::new(ts(1, 0, 0), ts(1, 0, 5), fp, None);

    db.upsert_slot(&tiled, &kind("mod13q1"), "/t/a.hdf").await.unwrap();
    let outcome = db.upsert_slot(&untiled, &kind("mod09"), "/t/b.hdf").await.unwrap();

    assert!(matches!(outcome, UpsertOutcome::Updated(_)));
    let row = db.get_row(&untiled).await.unwrap().unwrap();
    assert_eq!(row.key.tile_id(), Some("h18v04"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upserts_of_new_key_produce_one_row() {
    let env = TestEnv::new();
    let db = env.open().await;
    let kinds = ["mod03", "mod021km", "mod02hkm", "mod02qkm", "mod04", "mod05"];
    for name in kinds {
        db.ensure_column(&kind(name)).await.unwrap();
    }

    let k = key(10, 60.0);
    let mut handles = Vec::new();
    for name in kinds {
        let db = db.clone();
        let k = k.clone();
        handles.push(tokio::spawn(async move {
            db.upsert_slot(&k, &kind(name), &format!("/scene/{}.hdf", name))
                .await
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if let UpsertOutcome::Inserted(_) = handle.await.unwrap().unwrap() {
            inserted += 1;
        }
    }

    assert_eq!(inserted, 1);
    assert_eq!(db.row_count().await.unwrap(), 1);
    let row = db.get_row(&k).await.unwrap().unwrap();
    assert_eq!(row.slots.len(), kinds.len());
}

// ============================================================================
// Housekeeping
// ============================================================================

#[tokio::test]
async fn test_remove_degenerate_footprints() {
    let env = TestEnv::new();
    let db = env.open().await;
    let polar = key(0, 90.0);
    let normal = key(5, 89.5);

    db.upsert_slot(&polar, &kind("mod03"), "/p").await.unwrap();
    db.upsert_slot(&normal, &kind("mod03"), "/n").await.unwrap();
    assert!(db.get_row(&polar).await.unwrap().is_some());

    let removed = db.remove_degenerate_footprints().await.unwrap();

    assert_eq!(removed, 1);
    assert!(db.get_row(&polar).await.unwrap().is_none());
    assert!(db.get_row(&normal).await.unwrap().is_some());
}

#[tokio::test]
async fn test_slot_counts() {
    let env = TestEnv::new();
    let db = env.open().await;
    assert!(db.slot_counts().await.unwrap().is_empty());

    db.upsert_slot(&key(0, 50.0), &kind("mod03"), "/a").await.unwrap();
    db.upsert_slot(&key(5, 50.0), &kind("mod03"), "/b").await.unwrap();
    db.upsert_slot(&key(5, 50.0), &kind("mod021km"), "/c").await.unwrap();

    let counts = db.slot_counts().await.unwrap();
    assert_eq!(counts[&kind("mod03")], 2);
    assert_eq!(counts[&kind("mod021km")], 1);
}
