//! CLI commands for Granary

pub mod classify;
pub mod error;
pub mod housekeep;
pub mod ingest;
pub mod init_config;
pub mod output;
pub mod stats;

use error::HelpfulError;
use granary::config::default_config_path;
use granary::{CatalogDb, GranaryConfig};
use std::path::{Path, PathBuf};

/// Load the configuration named on the command line, or the default one.
///
/// An explicit path must exist; the default path falls back to built-in
/// defaults when absent.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(PathBuf, GranaryConfig)> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    let config = if explicit.is_some() {
        if !path.exists() {
            return Err(HelpfulError::new(format!("Config not found: {}", path.display()))
                .with_suggestion(format!("TRY: granary init-config {}", path.display()))
                .into());
        }
        GranaryConfig::load(&path)
    } else {
        GranaryConfig::load_or_default(&path)
    }
    .map_err(|e| HelpfulError::invalid_config(&path, e))?;

    Ok((path, config))
}

/// Open the configured catalog, which must already exist.
pub async fn open_catalog(config: &GranaryConfig) -> anyhow::Result<CatalogDb> {
    if !config.database_path.exists() {
        return Err(HelpfulError::catalog_not_found(&config.database_path).into());
    }
    Ok(CatalogDb::open_existing(&config.database_path, config.table.clone()).await?)
}

pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}
