//! Granary: a spatiotemporal catalog of satellite product granules.
//!
//! Files discovered on disk are classified into product kinds, grouped into
//! scenes, keyed by acquisition time range and ground footprint, and merged
//! into one catalog row per scene with one column per product kind.
//!
//! # Usage
//!
//! ```rust,ignore
//! use granary::{CatalogBuilder, GranaryConfig, LayoutMode, OdlExtractor};
//! use std::sync::Arc;
//!
//! let config = GranaryConfig::default();
//! let db = granary_db::CatalogDb::open(&config.database_path, config.table.clone()).await?;
//! let builder = CatalogBuilder::new(
//!     db,
//!     Arc::new(config.classifier()?),
//!     Arc::new(OdlExtractor::new(config.extractor.clone())),
//!     config.builder_options(LayoutMode::FlatLegacy),
//! );
//! let report = builder.ingest(paths).await?;
//! ```

pub mod builder;
pub mod classify;
pub mod config;
pub mod discover;
pub mod error;
pub mod extract;
pub mod scene_key;

pub use builder::{
    BuilderOptions, CancellationToken, CatalogBuilder, Conflict, FailureKind, GroupFailure,
    IngestReport, LayoutMode,
};
pub use classify::{Classification, Classifier, RuleConfig, RuleRole};
pub use config::{GranaryConfig, SourceConfig};
pub use discover::{DirectoryIndex, FileEnumerator, WalkdirEnumerator};
pub use error::{BuildError, ClassifierError, ConfigError, ExtractionError};
pub use extract::{ExtractorConfig, MetadataExtractor, OdlExtractor};
pub use scene_key::{BoundingBox, KeyMode, SceneKeyResolver, SceneMetadata};

pub use granary_db::{CatalogDb, CatalogRow, Footprint, ProductKind, SceneKey, TableName};
