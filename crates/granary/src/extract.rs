//! Metadata extraction.
//!
//! The builder only sees the [`MetadataExtractor`] trait. [`OdlExtractor`]
//! reads the ECS inventory metadata that MODIS granules carry as ODL text,
//! either from a `<granule>.met` sidecar or by scanning the granule itself,
//! where the CoreMetadata attribute is stored uncompressed.

use crate::error::ExtractionError;
use crate::scene_key::{AttributeMap, SceneMetadata};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads scene metadata for one granule.
///
/// Implementations may block on I/O; the builder calls them from the
/// blocking pool.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<SceneMetadata, ExtractionError>;
}

fn default_sidecar_extension() -> String {
    "met".to_string()
}

fn default_max_scan_bytes() -> u64 {
    16 * 1024 * 1024
}

/// Settings for [`OdlExtractor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Extension appended to the granule path to find its sidecar
    #[serde(default = "default_sidecar_extension")]
    pub sidecar_extension: String,

    /// How much of a granule to scan when there is no sidecar
    #[serde(default = "default_max_scan_bytes")]
    pub max_scan_bytes: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            sidecar_extension: default_sidecar_extension(),
            max_scan_bytes: default_max_scan_bytes(),
        }
    }
}

/// Extracts metadata from ODL inventory text.
#[derive(Debug, Clone, Default)]
pub struct OdlExtractor {
    config: ExtractorConfig,
}

impl OdlExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    fn sidecar_path(&self, path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".");
        name.push(&self.config.sidecar_extension);
        PathBuf::from(name)
    }

    fn read_text(&self, path: &Path) -> Result<String, ExtractionError> {
        let sidecar = self.sidecar_path(path);
        if sidecar.is_file() {
            debug!(path = %sidecar.display(), "Reading metadata sidecar");
            return std::fs::read_to_string(&sidecar)
                .map_err(|e| ExtractionError::unreadable(&sidecar, e));
        }

        let file = File::open(path).map_err(|e| ExtractionError::unreadable(path, e))?;
        let mut bytes = Vec::new();
        file.take(self.config.max_scan_bytes)
            .read_to_end(&mut bytes)
            .map_err(|e| ExtractionError::unreadable(path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl MetadataExtractor for OdlExtractor {
    fn extract(&self, path: &Path) -> Result<SceneMetadata, ExtractionError> {
        let text = self.read_text(path)?;
        let attrs = parse_odl(&text);
        if attrs.is_empty() {
            return Err(ExtractionError::unreadable(path, "no ODL metadata found"));
        }
        SceneMetadata::from_attributes(path, &attrs)
    }
}

/// Collect `OBJECT = NAME ... VALUE = v ... END_OBJECT = NAME` values.
///
/// Names are upper-cased and surrounding quotes are stripped from values.
/// The first value seen for a name is kept. Everything else in the text,
/// including binary noise around an embedded block, is ignored.
pub fn parse_odl(text: &str) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    let mut objects: Vec<String> = Vec::new();

    for line in text.lines() {
        let Some((lhs, rhs)) = line.split_once('=') else {
            continue;
        };
        let keyword = lhs.trim().to_ascii_uppercase();
        let value = rhs.trim();

        match keyword.as_str() {
            "OBJECT" => objects.push(value.to_ascii_uppercase()),
            "END_OBJECT" => {
                let name = value.to_ascii_uppercase();
                // Tolerate unbalanced blocks by unwinding to the named object
                if let Some(pos) = objects.iter().rposition(|o| *o == name) {
                    objects.truncate(pos);
                }
            }
            "VALUE" => {
                if let Some(object) = objects.last() {
                    attrs
                        .entry(object.clone())
                        .or_insert_with(|| unquote(value).to_string());
                }
            }
            _ => {}
        }
    }

    attrs
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene_key::{NORTH_BOUNDING_COORDINATE, RANGE_BEGINNING_DATE, TILE_ID};
    use std::io::Write;
    use tempfile::TempDir;

    const CORE_METADATA: &str = r#"
GROUP                  = INVENTORYMETADATA
  GROUPTYPE            = MASTERGROUP

  GROUP                  = RANGEDATETIME

    OBJECT                 = RANGEBEGINNINGDATE
      NUM_VAL              = 1
      VALUE                = "2020-01-01"
    END_OBJECT             = RANGEBEGINNINGDATE

    OBJECT                 = RANGEBEGINNINGTIME
      NUM_VAL              = 1
      VALUE                = "00:00:00.000000"
    END_OBJECT             = RANGEBEGINNINGTIME

    OBJECT                 = RANGEENDINGDATE
      NUM_VAL              = 1
      VALUE                = "2020-01-01"
    END_OBJECT             = RANGEENDINGDATE

    OBJECT                 = RANGEENDINGTIME
      NUM_VAL              = 1
      VALUE                = "00:05:00.000000"
    END_OBJECT             = RANGEENDINGTIME

  END_GROUP              = RANGEDATETIME

  GROUP                  = SPATIALDOMAINCONTAINER
    GROUP                  = HORIZONTALSPATIALDOMAINCONTAINER
      GROUP                  = BOUNDINGRECTANGLE

        OBJECT                 = NORTHBOUNDINGCOORDINATE
          NUM_VAL              = 1
          VALUE                = 62.1
        END_OBJECT             = NORTHBOUNDINGCOORDINATE

        OBJECT                 = SOUTHBOUNDINGCOORDINATE
          NUM_VAL              = 1
          VALUE                = 40.5
        END_OBJECT             = SOUTHBOUNDINGCOORDINATE

        OBJECT                 = EASTBOUNDINGCOORDINATE
          NUM_VAL              = 1
          VALUE                = -165.25
        END_OBJECT             = EASTBOUNDINGCOORDINATE

        OBJECT                 = WESTBOUNDINGCOORDINATE
          NUM_VAL              = 1
          VALUE                = 168.0
        END_OBJECT             = WESTBOUNDINGCOORDINATE

      END_GROUP              = BOUNDINGRECTANGLE
    END_GROUP              = HORIZONTALSPATIALDOMAINCONTAINER
  END_GROUP              = SPATIALDOMAINCONTAINER

END_GROUP              = INVENTORYMETADATA
END
"#;

    #[test]
    fn test_parse_odl_objects() {
        let attrs = parse_odl(CORE_METADATA);
        assert_eq!(attrs.get(RANGE_BEGINNING_DATE).map(String::as_str), Some("2020-01-01"));
        assert_eq!(attrs.get(NORTH_BOUNDING_COORDINATE).map(String::as_str), Some("62.1"));
        assert!(!attrs.contains_key("NUM_VAL"));
        assert!(!attrs.contains_key("INVENTORYMETADATA"));
        assert_eq!(attrs.len(), 8);
    }

    #[test]
    fn test_parse_odl_keeps_first_value_and_ignores_noise() {
        let text = concat!(
            "\u{1}\u{2}garbage=\n",
            "OBJECT = TILEID\nVALUE = 51018004\nVALUE = 99\nEND_OBJECT = TILEID\n",
            "VALUE = orphan\n",
        );
        let attrs = parse_odl(text);
        assert_eq!(attrs.get(TILE_ID).map(String::as_str), Some("51018004"));
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn test_extract_prefers_sidecar() {
        let tmp = TempDir::new().unwrap();
        let granule = tmp.path().join("MOD03.A2020001.0000.hdf");
        std::fs::write(&granule, b"\x0e\x03\x13\x01binary").unwrap();
        std::fs::write(tmp.path().join("MOD03.A2020001.0000.hdf.met"), CORE_METADATA).unwrap();

        let meta = OdlExtractor::default().extract(&granule).unwrap();
        assert_eq!(meta.bounds.east, -165.25);
        assert_eq!(meta.bounds.west, 168.0);
        assert_eq!(meta.start_time.to_string(), "2020-01-01 00:00:00");
    }

    #[test]
    fn test_extract_scans_embedded_metadata() {
        let tmp = TempDir::new().unwrap();
        let granule = tmp.path().join("MOD03.A2020001.0005.hdf");
        let mut file = File::create(&granule).unwrap();
        file.write_all(&[0x0e, 0x03, 0x13, 0x01, 0xff, 0x00]).unwrap();
        file.write_all(CORE_METADATA.as_bytes()).unwrap();
        file.write_all(&[0x00, 0xfe]).unwrap();
        drop(file);

        let meta = OdlExtractor::default().extract(&granule).unwrap();
        assert_eq!(meta.bounds.north, 62.1);
    }

    #[test]
    fn test_extract_errors() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.hdf");
        assert!(matches!(
            OdlExtractor::default().extract(&missing),
            Err(ExtractionError::Unreadable { .. })
        ));

        let partial = tmp.path().join("partial.hdf");
        let truncated: String = CORE_METADATA
            .lines()
            .take_while(|l| !l.contains("SPATIALDOMAINCONTAINER"))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&partial, truncated).unwrap();
        assert!(matches!(
            OdlExtractor::default().extract(&partial),
            Err(ExtractionError::MissingAttribute { .. })
        ));
    }
}
