//! Init-config command - write the default configuration

use crate::cli::error::HelpfulError;
use granary::config::default_config_path;
use granary::GranaryConfig;
use std::path::PathBuf;

#[derive(Debug)]
pub struct InitConfigArgs {
    pub path: Option<PathBuf>,
    pub force: bool,
}

pub fn run(args: InitConfigArgs) -> anyhow::Result<()> {
    let path = args.path.unwrap_or_else(default_config_path);
    if path.exists() && !args.force {
        return Err(HelpfulError::config_exists(&path).into());
    }

    GranaryConfig::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
