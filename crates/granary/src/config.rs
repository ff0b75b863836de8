//! Configuration for Granary

use crate::builder::{default_concurrency, BuilderOptions, LayoutMode};
use crate::classify::{default_rules, Classifier, RuleConfig, RuleRole};
use crate::error::{ClassifierError, ConfigError};
use crate::extract::ExtractorConfig;
use crate::scene_key::KeyMode;
use granary_db::{ProductKind, TableName};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A directory tree to ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub layout: LayoutMode,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranaryConfig {
    /// Path to the SQLite catalog
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Catalog table name
    #[serde(default)]
    pub table: TableName,

    #[serde(default)]
    pub key_mode: KeyMode,

    /// Layout used for `--root` ingestion when none is given
    #[serde(default)]
    pub layout: LayoutMode,

    /// Scene groups processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Kinds that must appear exactly once per directory-keyed scene
    #[serde(default)]
    pub required_kinds: Vec<ProductKind>,

    /// Allow-list of product kinds; empty accepts every kind a rule produces
    #[serde(default)]
    pub known_products: Vec<ProductKind>,

    /// Remove degenerate footprints after each ingest
    #[serde(default = "default_housekeeping")]
    pub housekeeping: bool,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Classification rules, highest priority first
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_database_path() -> PathBuf {
    granary_logging::granary_home()
        .map(|home| home.join("catalog.sqlite3"))
        .unwrap_or_else(|_| PathBuf::from("catalog.sqlite3"))
}

fn default_housekeeping() -> bool {
    true
}

/// Default config file location: `<granary home>/config.toml`.
pub fn default_config_path() -> PathBuf {
    granary_logging::granary_home()
        .map(|home| home.join("config.toml"))
        .unwrap_or_else(|_| PathBuf::from("granary.toml"))
}

impl Default for GranaryConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            table: TableName::default(),
            key_mode: KeyMode::default(),
            layout: LayoutMode::default(),
            concurrency: default_concurrency(),
            required_kinds: Vec::new(),
            known_products: Vec::new(),
            housekeeping: default_housekeeping(),
            extractor: ExtractorConfig::default(),
            rules: default_rules(),
            sources: Vec::new(),
        }
    }
}

impl GranaryConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: GranaryConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if !self.rules.iter().any(|r| r.role == RuleRole::Anchor) {
            return Err(ConfigError::Invalid(
                "at least one rule must have role = \"anchor\"".into(),
            ));
        }
        Ok(())
    }

    pub fn classifier(&self) -> Result<Classifier, ClassifierError> {
        Classifier::new(&self.rules, &self.known_products)
    }

    pub fn builder_options(&self, layout: LayoutMode) -> BuilderOptions {
        BuilderOptions {
            layout,
            key_mode: self.key_mode,
            concurrency: self.concurrency,
            required_kinds: self.required_kinds.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = GranaryConfig::default();
        assert!(config.database_path.ends_with("catalog.sqlite3"));
        assert_eq!(config.table.as_str(), "catalog");
        assert_eq!(config.key_mode, KeyMode::Geometry);
        assert!(config.concurrency > 0);
        assert!(config.housekeeping);
        assert_eq!(config.rules.len(), default_rules().len());
        config.validate().unwrap();
        config.classifier().unwrap();
    }

    #[test]
    fn test_config_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("conf").join("granary.toml");

        let config = GranaryConfig {
            database_path: tmp.path().join("catalog.sqlite3"),
            key_mode: KeyMode::Tile,
            concurrency: 3,
            required_kinds: vec![ProductKind::new("mod021km").unwrap()],
            sources: vec![SourceConfig {
                path: PathBuf::from("/data/modis"),
                layout: LayoutMode::FlatLegacy,
            }],
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = GranaryConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml_str = r#"
            table = "granules"
            layout = "per_granule"

            [[rules]]
            kind = "mod$family"
            pattern = '^M[OY]D(?P<family>[^.]*)\.A.{7}\.(?P<token>[^.]*)\..*\.hdf$'
            role = "anchor"
        "#;
        let config: GranaryConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.table.as_str(), "granules");
        assert_eq!(config.layout, LayoutMode::PerGranule);
        assert_eq!(config.rules.len(), 1);
        assert!(config.housekeeping);
        assert!(config.sources.is_empty());

        let classifier = config.classifier().unwrap();
        let class = classifier
            .classify("MOD13Q1.A2020001.h18v04.061.2020020000000.hdf")
            .unwrap();
        assert_eq!(class.kind.as_str(), "mod13q1");
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(toml::from_str::<GranaryConfig>("table = \"Bad Name\"").is_err());

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("granary.toml");
        std::fs::write(&path, "concurrency = 0\n").unwrap();
        assert!(matches!(
            GranaryConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "[[rules]]\nkind = \"mod09\"\npattern = \"^MOD09\"\n").unwrap();
        assert!(matches!(
            GranaryConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
