//! Batch ingestion report.

use granary_db::ProductKind;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Several files competed for one slot of one scene group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    /// Group label (directory, plus time token in flat layouts)
    pub group: String,
    pub kind: ProductKind,
    /// Competing files, sorted by file name
    pub candidates: Vec<PathBuf>,
    /// File stored in the slot; `None` when the whole group was abandoned
    pub winner: Option<PathBuf>,
    /// The group's shape was invalid and nothing was stored for it
    pub structural: bool,
}

impl Conflict {
    /// Resolve by keeping the file with the greatest name (see
    /// [`compare_file_names`]).
    pub(crate) fn resolved(
        group: &str,
        kind: &ProductKind,
        mut candidates: Vec<PathBuf>,
    ) -> Self {
        sort_by_file_name(&mut candidates);
        Self {
            group: group.to_string(),
            kind: kind.clone(),
            winner: candidates.last().cloned(),
            candidates,
            structural: false,
        }
    }

    pub(crate) fn structural(
        group: &str,
        kind: &ProductKind,
        mut candidates: Vec<PathBuf>,
    ) -> Self {
        sort_by_file_name(&mut candidates);
        Self {
            group: group.to_string(),
            kind: kind.clone(),
            candidates,
            winner: None,
            structural: true,
        }
    }
}

/// Sort by bare file name, then full path.
pub(crate) fn sort_by_file_name(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| {
        compare_file_names(&file_name(a), &file_name(b)).then_with(|| a.cmp(b))
    });
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Order file names character by character, except that runs of ASCII
/// digits compare by numeric value, so `A_10.hdf` sorts after `A_2.hdf`.
///
/// For names whose numeric fields have fixed width, as in MODIS file names,
/// this is the same as byte order.
pub fn compare_file_names(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let a_end = digit_run_end(a, i);
            let b_end = digit_run_end(b, j);
            let ord = compare_digit_runs(&a[i..a_end], &b[j..b_end]);
            if ord != Ordering::Equal {
                return ord;
            }
            i = a_end;
            j = b_end;
        } else {
            let ord = a[i].cmp(&b[j]);
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
            j += 1;
        }
    }

    (a.len() - i)
        .cmp(&(b.len() - j))
        // Equal numerically but spelled differently ("07" vs "7")
        .then_with(|| a.cmp(b))
}

fn digit_run_end(s: &[u8], start: usize) -> usize {
    s[start..]
        .iter()
        .position(|c| !c.is_ascii_digit())
        .map_or(s.len(), |len| start + len)
}

fn compare_digit_runs(a: &[u8], b: &[u8]) -> Ordering {
    let strip = |run: &[u8]| -> usize { run.iter().take_while(|&&c| c == b'0').count() };
    let a = &a[strip(a)..];
    let b = &b[strip(b)..];
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Anchor metadata was missing or unreadable; group skipped
    Extraction,
    /// A store statement failed; group counted as failed
    Store,
    /// A whole source root could not be read; nothing ingested from it
    Source,
}

/// A scene group, or a whole source root, that could not be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupFailure {
    pub group: String,
    pub path: Option<PathBuf>,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one ingestion batch.
///
/// `inserted` and `updated` count scene rows, decided by the anchor slot of
/// each group: a group whose anchor created the row counts as inserted, a
/// group that landed on an existing row counts as updated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Scene groups planned from the input
    pub groups: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Groups abandoned for extraction failures or structural conflicts
    pub skipped: usize,
    /// Groups abandoned because a store statement failed
    pub failed: usize,
    /// Individual slot writes
    pub slots_written: usize,
    /// Source roots that could not be enumerated
    pub sources_failed: usize,
    pub conflicts: Vec<Conflict>,
    pub failures: Vec<GroupFailure>,
    /// Scheduling stopped before every group ran
    pub cancelled: bool,
    /// Rows removed by the post-ingest housekeeping pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub housekeeping_removed: Option<u64>,
}

impl IngestReport {
    /// Note a source root that was given up on.
    pub(crate) fn record_source_failure(&mut self, root: &Path, message: String) {
        self.sources_failed += 1;
        self.failures.push(GroupFailure {
            group: root.display().to_string(),
            path: Some(root.to_path_buf()),
            kind: FailureKind::Source,
            message,
        });
    }

    /// Fold another batch into this one.
    pub fn merge(&mut self, other: IngestReport) {
        self.groups += other.groups;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.slots_written += other.slots_written;
        self.sources_failed += other.sources_failed;
        self.conflicts.extend(other.conflicts);
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
        if let Some(removed) = other.housekeeping_removed {
            *self.housekeeping_removed.get_or_insert(0) += removed;
        }
    }

    /// Conflicts that were resolved by tie-break (the group was stored).
    pub fn resolved_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.structural)
    }
}
