//! Stats command - catalog size and slot fill counts

use crate::cli::output::{print_json, print_table};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug)]
pub struct StatsArgs {
    pub config: Option<PathBuf>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    database: PathBuf,
    table: String,
    scenes: i64,
    slots: BTreeMap<String, i64>,
}

pub fn run(args: StatsArgs) -> anyhow::Result<()> {
    let (_, config) = super::load_config(args.config.as_deref())?;

    let rt = super::runtime()?;
    let output = rt.block_on(async {
        let db = super::open_catalog(&config).await?;
        let scenes = db.row_count().await?;
        let slots = db
            .slot_counts()
            .await?
            .into_iter()
            .map(|(kind, n)| (kind.to_string(), n))
            .collect();
        db.close().await;
        Ok::<_, anyhow::Error>(StatsOutput {
            database: config.database_path.clone(),
            table: config.table.to_string(),
            scenes,
            slots,
        })
    })?;

    if args.json {
        return print_json(&output);
    }

    println!(
        "{} scene(s) in {} ({})",
        output.scenes,
        output.table,
        output.database.display()
    );
    let rows = output
        .slots
        .iter()
        .map(|(kind, n)| {
            let pct = if output.scenes > 0 {
                format!("{:.1}%", *n as f64 * 100.0 / output.scenes as f64)
            } else {
                "-".to_string()
            };
            vec![kind.clone(), n.to_string(), pct]
        })
        .collect();
    print_table(&["Product", "Filled", "Coverage"], rows);
    Ok(())
}
