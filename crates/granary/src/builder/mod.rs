//! Catalog builder.
//!
//! Drives one ingestion batch: classify and group the discovered files,
//! extract the anchor metadata of every group on the blocking pool, resolve
//! the scene key and write each slot to the store.
//!
//! Problems with a single group are recorded in the [`IngestReport`] and
//! the batch carries on. Only losing the store altogether aborts a batch.

mod grouping;
mod report;

pub use grouping::{plan_groups, GroupPlan, SceneGroup};
pub use report::{compare_file_names, Conflict, FailureKind, GroupFailure, IngestReport};

use crate::classify::Classifier;
use crate::config::SourceConfig;
use crate::discover::{DirectoryIndex, FileEnumerator};
use crate::error::{BuildError, Result};
use crate::extract::MetadataExtractor;
use crate::scene_key::{KeyMode, SceneKeyResolver};
use granary_db::{CatalogDb, DbError, ProductKind, UpsertOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How the archive arranges the files of one scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// One shared directory; time tokens in file names tell scenes apart and
    /// auxiliary products sit in `<dir>/<token>/`.
    FlatLegacy,
    /// One directory per scene.
    #[default]
    DirectoryKeyed,
    /// Every file carries its own metadata and is its own scene anchor.
    PerGranule,
}

impl FromStr for LayoutMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "flat_legacy" | "flat" => Ok(LayoutMode::FlatLegacy),
            "directory_keyed" | "directory" => Ok(LayoutMode::DirectoryKeyed),
            "per_granule" | "granule" => Ok(LayoutMode::PerGranule),
            other => Err(format!(
                "unknown layout '{}' (flat-legacy, directory-keyed, per-granule)",
                other
            )),
        }
    }
}

impl fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutMode::FlatLegacy => f.write_str("flat-legacy"),
            LayoutMode::DirectoryKeyed => f.write_str("directory-keyed"),
            LayoutMode::PerGranule => f.write_str("per-granule"),
        }
    }
}

/// Default worker count: one per available core.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone)]
pub struct BuilderOptions {
    pub layout: LayoutMode,
    pub key_mode: KeyMode,
    /// Scene groups processed at once
    pub concurrency: usize,
    /// Kinds that must appear exactly once per directory-keyed scene
    pub required_kinds: Vec<ProductKind>,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            layout: LayoutMode::default(),
            key_mode: KeyMode::default(),
            concurrency: default_concurrency(),
            required_kinds: Vec::new(),
        }
    }
}

/// Token for stopping a batch.
///
/// Once cancelled, no further groups are scheduled; groups already running
/// finish normally. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// What happened to one scene group.
enum GroupOutcome {
    Stored { row: UpsertOutcome, slots: usize },
    Skipped(GroupFailure),
    Failed(GroupFailure),
    Fatal(DbError),
}

/// Shared state handed to every group task.
struct GroupContext {
    db: CatalogDb,
    extractor: Arc<dyn MetadataExtractor>,
    resolver: SceneKeyResolver,
}

/// Builds and maintains the scene catalog.
pub struct CatalogBuilder {
    db: CatalogDb,
    classifier: Arc<Classifier>,
    extractor: Arc<dyn MetadataExtractor>,
    options: BuilderOptions,
    cancel: CancellationToken,
}

impl CatalogBuilder {
    pub fn new(
        db: CatalogDb,
        classifier: Arc<Classifier>,
        extractor: Arc<dyn MetadataExtractor>,
        options: BuilderOptions,
    ) -> Self {
        Self {
            db,
            classifier,
            extractor,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Handle for stopping a running batch from elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    pub fn db(&self) -> &CatalogDb {
        &self.db
    }

    /// Ingest a batch of discovered file paths.
    pub async fn ingest<I, P>(&self, paths: I) -> Result<IngestReport>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let index = DirectoryIndex::from_paths(paths);
        self.ingest_index(&index).await
    }

    /// Enumerate `root` and ingest everything found under it.
    pub async fn ingest_root(
        &self,
        root: &Path,
        enumerator: Arc<dyn FileEnumerator>,
    ) -> Result<IngestReport> {
        self.ingest_root_as(root, self.options.layout, enumerator).await
    }

    /// Ingest several source roots in turn, each with its own layout.
    ///
    /// A root that cannot be enumerated is recorded in the report and the
    /// next one is tried. Only losing the store stops the run.
    pub async fn ingest_sources(
        &self,
        sources: &[SourceConfig],
        enumerator: Arc<dyn FileEnumerator>,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for source in sources {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            info!(source = %source.path.display(), layout = %source.layout, "Ingesting source");
            match self
                .ingest_root_as(&source.path, source.layout, Arc::clone(&enumerator))
                .await
            {
                Ok(source_report) => {
                    let cancelled = source_report.cancelled;
                    report.merge(source_report);
                    if cancelled {
                        break;
                    }
                }
                Err(BuildError::StoreUnavailable(e)) => {
                    return Err(BuildError::StoreUnavailable(e));
                }
                Err(e) => {
                    warn!(
                        source = %source.path.display(),
                        error = %e,
                        "Source failed, moving on"
                    );
                    report.record_source_failure(&source.path, e.to_string());
                }
            }
        }
        Ok(report)
    }

    async fn ingest_root_as(
        &self,
        root: &Path,
        layout: LayoutMode,
        enumerator: Arc<dyn FileEnumerator>,
    ) -> Result<IngestReport> {
        let owned_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || enumerator.enumerate(&owned_root))
            .await
            .map_err(|e| BuildError::Enumeration {
                root: root.to_path_buf(),
                reason: e.to_string(),
            })??;

        info!(root = %root.display(), files = files.len(), "Discovered files");
        let index = DirectoryIndex::from_paths(files);
        self.ingest_index_as(&index, layout).await
    }

    /// Ingest the files of an index.
    pub async fn ingest_index(&self, index: &DirectoryIndex) -> Result<IngestReport> {
        self.ingest_index_as(index, self.options.layout).await
    }

    async fn ingest_index_as(
        &self,
        index: &DirectoryIndex,
        layout: LayoutMode,
    ) -> Result<IngestReport> {
        let plan = plan_groups(index, &self.classifier, layout, &self.options.required_kinds);

        info!(
            layout = %layout,
            files = index.file_count(),
            groups = plan.groups.len(),
            "Starting ingestion"
        );

        let mut report = IngestReport {
            groups: plan.groups.len() + plan.abandoned,
            skipped: plan.abandoned,
            conflicts: plan.conflicts,
            ..Default::default()
        };

        let ctx = Arc::new(GroupContext {
            db: self.db.clone(),
            extractor: Arc::clone(&self.extractor),
            resolver: SceneKeyResolver::new(self.options.key_mode),
        });
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut fatal: Option<DbError> = None;

        for group in plan.groups {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = absorb(&mut report, joined) {
                    fatal = Some(e);
                }
            }
            if fatal.is_some() {
                break;
            }
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move {
                let outcome = process_group(&ctx, &group).await;
                drop(permit);
                (group.label, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = absorb(&mut report, joined) {
                fatal.get_or_insert(e);
            }
        }

        if report.cancelled {
            warn!("Ingestion cancelled, remaining groups were not scheduled");
        }

        if let Some(e) = fatal {
            error!(error = %e, "Lost connection to the catalog store, aborting batch");
            return Err(BuildError::StoreUnavailable(e));
        }

        info!(
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            conflicts = report.conflicts.len(),
            "Ingestion finished"
        );
        Ok(report)
    }

    /// Drop catalog rows whose footprint reaches the pole.
    pub async fn housekeep(&self) -> Result<u64> {
        self.db.remove_degenerate_footprints().await.map_err(|e| {
            if e.is_connection_loss() {
                BuildError::StoreUnavailable(e)
            } else {
                BuildError::Store(e)
            }
        })
    }
}

/// Fold one finished group into the report; returns the error on a fatal
/// outcome.
fn absorb(
    report: &mut IngestReport,
    joined: std::result::Result<(String, GroupOutcome), tokio::task::JoinError>,
) -> std::result::Result<(), DbError> {
    let (label, outcome) = match joined {
        Ok(done) => done,
        Err(e) => {
            error!(error = %e, "Scene group task failed");
            report.failed += 1;
            report.failures.push(GroupFailure {
                group: String::new(),
                path: None,
                kind: FailureKind::Store,
                message: e.to_string(),
            });
            return Ok(());
        }
    };

    match outcome {
        GroupOutcome::Stored { row, slots } => {
            match row {
                UpsertOutcome::Inserted(_) => report.inserted += 1,
                UpsertOutcome::Updated(_) => report.updated += 1,
            }
            report.slots_written += slots;
        }
        GroupOutcome::Skipped(failure) => {
            report.skipped += 1;
            report.failures.push(failure);
        }
        GroupOutcome::Failed(failure) => {
            report.failed += 1;
            report.failures.push(failure);
        }
        GroupOutcome::Fatal(e) => {
            debug!(group = %label, "Group hit a connection loss");
            report.failed += 1;
            return Err(e);
        }
    }
    Ok(())
}

async fn process_group(ctx: &GroupContext, group: &SceneGroup) -> GroupOutcome {
    let extractor = Arc::clone(&ctx.extractor);
    let anchor = group.anchor.clone();
    let extracted = tokio::task::spawn_blocking(move || extractor.extract(&anchor)).await;

    let metadata = match extracted {
        Ok(Ok(metadata)) => metadata,
        Ok(Err(e)) => {
            warn!(group = %group.label, error = %e, "Metadata extraction failed, skipping scene");
            return GroupOutcome::Skipped(GroupFailure {
                group: group.label.clone(),
                path: Some(group.anchor.clone()),
                kind: FailureKind::Extraction,
                message: e.to_string(),
            });
        }
        Err(e) => {
            warn!(group = %group.label, error = %e, "Metadata extraction panicked, skipping scene");
            return GroupOutcome::Skipped(GroupFailure {
                group: group.label.clone(),
                path: Some(group.anchor.clone()),
                kind: FailureKind::Extraction,
                message: e.to_string(),
            });
        }
    };

    let key = ctx.resolver.resolve(&metadata);
    debug!(group = %group.label, key = %key, slots = group.slots.len(), "Resolved scene");

    let store_failure = |path: Option<&PathBuf>, e: DbError| {
        if e.is_connection_loss() {
            return GroupOutcome::Fatal(e);
        }
        error!(group = %group.label, error = %e, "Failed to store scene");
        GroupOutcome::Failed(GroupFailure {
            group: group.label.clone(),
            path: path.cloned(),
            kind: FailureKind::Store,
            message: e.to_string(),
        })
    };

    for kind in group.slots.keys() {
        if let Err(e) = ctx.db.ensure_column(kind).await {
            return store_failure(None, e);
        }
    }

    let mut row = None;
    let mut written = 0;
    for (kind, path) in group.write_order() {
        let value = path.to_string_lossy();
        match ctx.db.upsert_slot(&key, kind, &value).await {
            Ok(outcome) => {
                row.get_or_insert(outcome);
                written += 1;
            }
            Err(e) => return store_failure(Some(path), e),
        }
    }

    match row {
        Some(row) => GroupOutcome::Stored {
            row,
            slots: written,
        },
        None => GroupOutcome::Failed(GroupFailure {
            group: group.label.clone(),
            path: None,
            kind: FailureKind::Store,
            message: "scene group has no slots".to_string(),
        }),
    }
}
