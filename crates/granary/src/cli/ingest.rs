//! Ingest command - merge discovered granules into the catalog

use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table};
use anyhow::Context;
use granary::{
    CatalogBuilder, CatalogDb, FailureKind, IngestReport, LayoutMode, OdlExtractor,
    SourceConfig, WalkdirEnumerator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct IngestArgs {
    pub config: Option<PathBuf>,
    pub root: Option<PathBuf>,
    pub layout: Option<LayoutMode>,
    pub concurrency: Option<usize>,
    pub no_housekeeping: bool,
    pub json: bool,
}

pub fn run(args: IngestArgs) -> anyhow::Result<()> {
    let (config_path, mut config) = super::load_config(args.config.as_deref())?;
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency.max(1);
    }

    let sources = match &args.root {
        Some(root) => {
            if !root.is_dir() {
                return Err(HelpfulError::root_not_found(root).into());
            }
            vec![SourceConfig {
                path: root.clone(),
                layout: args.layout.unwrap_or(config.layout),
            }]
        }
        None if config.sources.is_empty() => {
            return Err(HelpfulError::no_sources(&config_path).into());
        }
        None => config.sources.clone(),
    };

    let classifier = Arc::new(
        config
            .classifier()
            .map_err(|e| HelpfulError::invalid_config(&config_path, e))?,
    );
    let extractor = Arc::new(OdlExtractor::new(config.extractor.clone()));
    let enumerator = Arc::new(WalkdirEnumerator::new());

    let rt = super::runtime()?;
    let report = rt.block_on(async {
        let db = CatalogDb::open(&config.database_path, config.table.clone())
            .await
            .with_context(|| format!("Failed to open {}", config.database_path.display()))?;

        let builder = CatalogBuilder::new(
            db.clone(),
            classifier,
            extractor,
            config.builder_options(config.layout),
        );

        let token = builder.cancellation_token();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing scenes in flight");
                token.cancel();
            }
        });

        info!(sources = sources.len(), "Ingesting");
        let result = builder.ingest_sources(&sources, enumerator).await;
        watcher.abort();
        let mut report = result.context("Ingest aborted")?;

        if config.housekeeping && !args.no_housekeeping {
            let removed = db.remove_degenerate_footprints().await?;
            report.housekeeping_removed = Some(removed);
        }

        db.close().await;
        Ok::<_, anyhow::Error>(report)
    })?;

    if args.json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &IngestReport) {
    let mut rows = vec![
        vec!["Scene groups".to_string(), report.groups.to_string()],
        vec!["Inserted".to_string(), report.inserted.to_string()],
        vec!["Updated".to_string(), report.updated.to_string()],
        vec!["Skipped".to_string(), report.skipped.to_string()],
        vec!["Failed".to_string(), report.failed.to_string()],
        vec!["Slots written".to_string(), report.slots_written.to_string()],
        vec!["Sources failed".to_string(), report.sources_failed.to_string()],
        vec!["Conflicts".to_string(), report.conflicts.len().to_string()],
    ];
    if let Some(removed) = report.housekeeping_removed {
        rows.push(vec!["Degenerate rows removed".to_string(), removed.to_string()]);
    }
    print_table(&["", "Count"], rows);

    if !report.conflicts.is_empty() {
        println!();
        let rows = report
            .conflicts
            .iter()
            .map(|c| {
                vec![
                    c.group.clone(),
                    c.kind.to_string(),
                    c.candidates.len().to_string(),
                    c.winner
                        .as_ref()
                        .map(|w| w.display().to_string())
                        .unwrap_or_else(|| "(skipped)".to_string()),
                ]
            })
            .collect();
        print_table(&["Group", "Kind", "Candidates", "Winner"], rows);
    }

    if !report.failures.is_empty() {
        println!();
        let rows = report
            .failures
            .iter()
            .map(|f| {
                vec![
                    f.group.clone(),
                    failure_stage(f.kind).to_string(),
                    f.message.clone(),
                ]
            })
            .collect();
        print_table(&["Group", "Stage", "Error"], rows);
    }

    if report.cancelled {
        println!("\nIngestion was interrupted; re-run to pick up the remaining scenes.");
    }
}

fn failure_stage(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Extraction => "extraction",
        FailureKind::Store => "store",
        FailureKind::Source => "source",
    }
}
