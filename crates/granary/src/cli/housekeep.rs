//! Housekeep command - drop scenes with degenerate footprints

use crate::cli::output::print_json;
use granary_db::POLE_LATITUDE;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug)]
pub struct HousekeepArgs {
    pub config: Option<PathBuf>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct HousekeepOutput {
    removed: u64,
    remaining: i64,
}

pub fn run(args: HousekeepArgs) -> anyhow::Result<()> {
    let (_, config) = super::load_config(args.config.as_deref())?;

    let rt = super::runtime()?;
    let output = rt.block_on(async {
        let db = super::open_catalog(&config).await?;
        let removed = db.remove_degenerate_footprints().await?;
        let remaining = db.row_count().await?;
        db.close().await;
        Ok::<_, anyhow::Error>(HousekeepOutput { removed, remaining })
    })?;

    if args.json {
        return print_json(&output);
    }
    println!(
        "Removed {} scene(s) reaching latitude {}; {} remain.",
        output.removed, POLE_LATITUDE, output.remaining
    );
    Ok(())
}
