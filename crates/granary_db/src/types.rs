//! Catalog types shared by the store and the ingestion engine.
//!
//! Identifiers that end up in SQL text (table and product column names) only
//! exist as validated newtypes. Everything else is bound as a parameter.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Canonical text form of scene timestamps (microsecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Key and bookkeeping columns of the catalog table. Product kinds may not
/// shadow them.
pub const RESERVED_COLUMNS: &[&str] = &[
    "id",
    "starttime",
    "stoptime",
    "footprint",
    "tile",
    "north",
    "south",
    "east",
    "west",
];

const MAX_IDENTIFIER_LEN: usize = 63;

fn validate_identifier(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return Err(format!("'{}' must start with a lowercase letter", name)),
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "'{}' is longer than {} characters",
            name, MAX_IDENTIFIER_LEN
        ));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(format!(
            "'{}' may only contain lowercase letters, digits and '_'",
            name
        ));
    }
    Ok(())
}

// ============================================================================
// Identifiers
// ============================================================================

/// Name of the catalog table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Result<Self, crate::DbError> {
        let name = name.into();
        validate_identifier(&name).map_err(crate::DbError::InvalidIdentifier)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for SQL text.
    pub(crate) fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl Default for TableName {
    fn default() -> Self {
        Self("catalog".to_string())
    }
}

impl TryFrom<String> for TableName {
    type Error = crate::DbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A product family identifier (e.g. `mod03`, `mod021km`). Each kind owns one
/// column of the catalog table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductKind(String);

impl ProductKind {
    pub fn new(name: impl Into<String>) -> Result<Self, crate::DbError> {
        let name = name.into();
        validate_identifier(&name).map_err(crate::DbError::InvalidIdentifier)?;
        if RESERVED_COLUMNS.contains(&name.as_str()) {
            return Err(crate::DbError::InvalidIdentifier(format!(
                "'{}' is a reserved catalog column",
                name
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl TryFrom<String> for ProductKind {
    type Error = crate::DbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProductKind> for String {
    fn from(value: ProductKind) -> Self {
        value.0
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Scene identity
// ============================================================================

/// Ground footprint of a scene: an axis-aligned box in geographic
/// coordinates, stored as a closed 5-point ring.
///
/// Values are taken as given, except that `-0.0` is folded to `0.0` so equal
/// bounds always render the same WKT. Longitude normalisation happens before
/// a footprint is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Footprint {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north: fold_zero(north),
            south: fold_zero(south),
            east: fold_zero(east),
            west: fold_zero(west),
        }
    }

    /// Ring as `(lon, lat)` points: NW, NE, SE, SW, NW.
    pub fn ring(&self) -> [(f64, f64); 5] {
        [
            (self.west, self.north),
            (self.east, self.north),
            (self.east, self.south),
            (self.west, self.south),
            (self.west, self.north),
        ]
    }

    /// WKT text of the ring. This string is the stored footprint and takes
    /// part in the uniqueness constraint, so its formatting must not change.
    pub fn to_wkt(&self) -> String {
        let points = self
            .ring()
            .iter()
            .map(|(lon, lat)| format!("{} {}", fold_zero(*lon), fold_zero(*lat)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("POLYGON(({}))", points)
    }

    /// Largest latitude touched by the ring.
    pub fn max_latitude(&self) -> f64 {
        self.north.max(self.south)
    }
}

/// Adding positive zero maps `-0.0` to `0.0` and leaves every other value as is.
fn fold_zero(value: f64) -> f64 {
    value + 0.0
}

/// Matching identity of a catalog row.
///
/// Equality and hashing cover `(start_time, stop_time, footprint)` in their
/// canonical text form, the same values the store compares. The tile id is
/// payload only.
#[derive(Debug, Clone, Serialize)]
pub struct SceneKey {
    start_time: NaiveDateTime,
    stop_time: NaiveDateTime,
    footprint: Footprint,
    #[serde(skip_serializing_if = "Option::is_none")]
    tile_id: Option<String>,
    #[serde(skip)]
    footprint_wkt: String,
}

impl SceneKey {
    pub fn new(
        start_time: NaiveDateTime,
        stop_time: NaiveDateTime,
        footprint: Footprint,
        tile_id: Option<String>,
    ) -> Self {
        let footprint_wkt = footprint.to_wkt();
        Self {
            start_time,
            stop_time,
            footprint,
            tile_id,
            footprint_wkt,
        }
    }

    pub fn start_time(&self) -> NaiveDateTime {
        self.start_time
    }

    pub fn stop_time(&self) -> NaiveDateTime {
        self.stop_time
    }

    pub fn footprint(&self) -> &Footprint {
        &self.footprint
    }

    pub fn tile_id(&self) -> Option<&str> {
        self.tile_id.as_deref()
    }

    pub fn start_text(&self) -> String {
        self.start_time.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn stop_text(&self) -> String {
        self.stop_time.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn footprint_wkt(&self) -> &str {
        &self.footprint_wkt
    }
}

impl PartialEq for SceneKey {
    fn eq(&self, other: &Self) -> bool {
        self.start_time == other.start_time
            && self.stop_time == other.stop_time
            && self.footprint_wkt == other.footprint_wkt
    }
}

impl Eq for SceneKey {}

impl Hash for SceneKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start_time.hash(state);
        self.stop_time.hash(state);
        self.footprint_wkt.hash(state);
    }
}

impl fmt::Display for SceneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} .. {}] {}",
            self.start_text(),
            self.stop_text(),
            self.footprint_wkt
        )
    }
}

// ============================================================================
// Rows & results
// ============================================================================

/// One persisted scene.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogRow {
    pub id: i64,
    pub key: SceneKey,
    /// Filled product slots; absent kinds are NULL in the table.
    pub slots: BTreeMap<ProductKind, String>,
}

impl CatalogRow {
    pub fn slot(&self, kind: &str) -> Option<&str> {
        self.slots
            .iter()
            .find(|(k, _)| k.as_str() == kind)
            .map(|(_, path)| path.as_str())
    }
}

/// The live set of product columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogSchema {
    pub columns: BTreeSet<ProductKind>,
}

impl CatalogSchema {
    pub fn contains(&self, kind: &ProductKind) -> bool {
        self.columns.contains(kind)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Result of a slot upsert, carrying the row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome", content = "id")]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

impl UpsertOutcome {
    pub fn row_id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => *id,
        }
    }
}

/// Result of `ensure_column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnChange {
    Added,
    Existing,
}
