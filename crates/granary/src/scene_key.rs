//! Scene metadata and canonical scene keys.
//!
//! A scene key must come out identical every time the same granule is
//! ingested, because it is the only thing that decides which catalog row a
//! file lands in.

use crate::error::ExtractionError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use granary_db::{Footprint, SceneKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const RANGE_BEGINNING_DATE: &str = "RANGEBEGINNINGDATE";
pub const RANGE_BEGINNING_TIME: &str = "RANGEBEGINNINGTIME";
pub const RANGE_ENDING_DATE: &str = "RANGEENDINGDATE";
pub const RANGE_ENDING_TIME: &str = "RANGEENDINGTIME";
pub const NORTH_BOUNDING_COORDINATE: &str = "NORTHBOUNDINGCOORDINATE";
pub const SOUTH_BOUNDING_COORDINATE: &str = "SOUTHBOUNDINGCOORDINATE";
pub const EAST_BOUNDING_COORDINATE: &str = "EASTBOUNDINGCOORDINATE";
pub const WEST_BOUNDING_COORDINATE: &str = "WESTBOUNDINGCOORDINATE";
pub const TILE_ID: &str = "TILEID";

/// Raw attribute values keyed by upper-case attribute name.
pub type AttributeMap = BTreeMap<String, String>;

/// Bounding coordinates as reported by the granule, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

/// Everything needed to place a granule in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub start_time: NaiveDateTime,
    pub stop_time: NaiveDateTime,
    pub bounds: BoundingBox,
    pub tile_id: Option<String>,
}

impl SceneMetadata {
    /// Build metadata from raw string attributes.
    ///
    /// Coordinates are always parsed to `f64` before anything looks at them.
    /// A missing or unparsable required attribute rejects the whole record.
    pub fn from_attributes(path: &Path, attrs: &AttributeMap) -> Result<Self, ExtractionError> {
        let start_time = timestamp(path, attrs, RANGE_BEGINNING_DATE, RANGE_BEGINNING_TIME)?;
        let stop_time = timestamp(path, attrs, RANGE_ENDING_DATE, RANGE_ENDING_TIME)?;
        if start_time > stop_time {
            return Err(ExtractionError::InvalidAttribute {
                path: path.to_path_buf(),
                attribute: RANGE_ENDING_DATE.to_string(),
                value: stop_time.to_string(),
                reason: format!("ends before it begins ({})", start_time),
            });
        }

        let bounds = BoundingBox {
            north: coordinate(path, attrs, NORTH_BOUNDING_COORDINATE)?,
            south: coordinate(path, attrs, SOUTH_BOUNDING_COORDINATE)?,
            east: coordinate(path, attrs, EAST_BOUNDING_COORDINATE)?,
            west: coordinate(path, attrs, WEST_BOUNDING_COORDINATE)?,
        };

        let tile_id = attrs
            .get(TILE_ID)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            start_time,
            stop_time,
            bounds,
            tile_id,
        })
    }
}

fn required<'a>(
    path: &Path,
    attrs: &'a AttributeMap,
    name: &str,
) -> Result<&'a str, ExtractionError> {
    attrs
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ExtractionError::MissingAttribute {
            path: path.to_path_buf(),
            attribute: name.to_string(),
        })
}

fn invalid(path: &Path, attribute: &str, value: &str, reason: impl ToString) -> ExtractionError {
    ExtractionError::InvalidAttribute {
        path: path.to_path_buf(),
        attribute: attribute.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn timestamp(
    path: &Path,
    attrs: &AttributeMap,
    date_attr: &str,
    time_attr: &str,
) -> Result<NaiveDateTime, ExtractionError> {
    let date_raw = required(path, attrs, date_attr)?;
    let time_raw = required(path, attrs, time_attr)?;
    let date = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d")
        .map_err(|e| invalid(path, date_attr, date_raw, e))?;
    let time = NaiveTime::parse_from_str(time_raw, "%H:%M:%S%.f")
        .map_err(|e| invalid(path, time_attr, time_raw, e))?;
    Ok(date.and_time(time))
}

fn coordinate(path: &Path, attrs: &AttributeMap, name: &str) -> Result<f64, ExtractionError> {
    let raw = required(path, attrs, name)?;
    let value: f64 = raw.parse().map_err(|e| invalid(path, name, raw, e))?;
    if !value.is_finite() {
        return Err(invalid(path, name, raw, "not a finite number"));
    }
    Ok(value)
}

// ============================================================================
// Key resolution
// ============================================================================

/// Whether the catalog carries a tile id column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Time range + footprint only.
    #[default]
    Geometry,
    /// Time range + footprint, with the tile id stored alongside.
    Tile,
}

impl FromStr for KeyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geometry" => Ok(KeyMode::Geometry),
            "tile" => Ok(KeyMode::Tile),
            other => Err(format!("unknown key mode '{}' (geometry, tile)", other)),
        }
    }
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Geometry => f.write_str("geometry"),
            KeyMode::Tile => f.write_str("tile"),
        }
    }
}

/// Longitude normalisation for footprints.
///
/// A negative east bound is shifted by +360. The west bound is never touched,
/// even when negative. Stored keys depend on this exact rule, so changing it
/// would split or merge existing rows on re-ingestion.
pub fn normalize(bounds: &BoundingBox) -> Footprint {
    let east = if bounds.east < 0.0 {
        bounds.east + 360.0
    } else {
        bounds.east
    };
    Footprint::new(bounds.north, bounds.south, east, bounds.west)
}

/// Turns scene metadata into catalog keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneKeyResolver {
    mode: KeyMode,
}

impl SceneKeyResolver {
    pub fn new(mode: KeyMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    pub fn resolve(&self, metadata: &SceneMetadata) -> SceneKey {
        let tile_id = match self.mode {
            KeyMode::Geometry => None,
            KeyMode::Tile => metadata.tile_id.clone(),
        };
        SceneKey::new(
            metadata.start_time,
            metadata.stop_time,
            normalize(&metadata.bounds),
            tile_id,
        )
    }
}
