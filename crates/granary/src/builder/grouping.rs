//! Scene grouping.
//!
//! Turns a directory index into scene groups: sets of files, one per product
//! slot, that belong to the same acquisition. Only this step depends on the
//! layout of the archive; extraction and storage are layout-agnostic.

use super::report::Conflict;
use super::LayoutMode;
use crate::classify::{Classification, Classifier, RuleRole};
use crate::discover::DirectoryIndex;
use granary_db::ProductKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Files that make up one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneGroup {
    /// Human-readable identity used in logs and reports
    pub label: String,
    /// Kind of the anchor file
    pub anchor_kind: ProductKind,
    /// File whose metadata defines the scene
    pub anchor: PathBuf,
    /// One file per product kind, anchor included
    pub slots: BTreeMap<ProductKind, PathBuf>,
}

impl SceneGroup {
    /// Slots in write order: anchor first, then by kind.
    pub fn write_order(&self) -> impl Iterator<Item = (&ProductKind, &PathBuf)> {
        let anchor = self.slots.get_key_value(&self.anchor_kind);
        anchor.into_iter().chain(
            self.slots
                .iter()
                .filter(move |(kind, _)| **kind != self.anchor_kind),
        )
    }
}

/// Result of the grouping step.
#[derive(Debug, Default)]
pub struct GroupPlan {
    pub groups: Vec<SceneGroup>,
    pub conflicts: Vec<Conflict>,
    /// Groups abandoned because of structural conflicts
    pub abandoned: usize,
}

struct Classified<'a> {
    path: PathBuf,
    name: &'a str,
    class: Classification,
}

fn classify_dir<'a>(
    classifier: &Classifier,
    index: &'a DirectoryIndex,
    dir: &Path,
) -> Vec<Classified<'a>> {
    index
        .listing(dir)
        .iter()
        .filter_map(|name| {
            classifier.classify(name).map(|class| Classified {
                path: dir.join(name),
                name: name.as_str(),
                class,
            })
        })
        .collect()
}

/// Group the indexed files according to `layout`.
pub fn plan_groups(
    index: &DirectoryIndex,
    classifier: &Classifier,
    layout: LayoutMode,
    required_kinds: &[ProductKind],
) -> GroupPlan {
    let mut plan = GroupPlan::default();
    for dir in index.directories() {
        match layout {
            LayoutMode::FlatLegacy => plan_flat(index, classifier, dir, &mut plan),
            LayoutMode::DirectoryKeyed => {
                plan_directory(index, classifier, dir, required_kinds, &mut plan)
            }
            LayoutMode::PerGranule => plan_per_granule(index, classifier, dir, &mut plan),
        }
    }

    debug!(
        layout = %layout,
        groups = plan.groups.len(),
        conflicts = plan.conflicts.len(),
        abandoned = plan.abandoned,
        "Planned scene groups"
    );
    plan
}

/// Pick one file per kind, recording a conflict where several compete.
fn choose_slots(
    label: &str,
    candidates: BTreeMap<ProductKind, Vec<PathBuf>>,
    conflicts: &mut Vec<Conflict>,
) -> BTreeMap<ProductKind, PathBuf> {
    let mut slots = BTreeMap::new();
    for (kind, mut paths) in candidates {
        let winner = if paths.len() > 1 {
            let conflict = Conflict::resolved(label, &kind, paths);
            warn!(
                group = label,
                kind = %kind,
                candidates = conflict.candidates.len(),
                winner = ?conflict.winner,
                "Several files for one slot, keeping the greatest name"
            );
            let winner = conflict.winner.clone();
            conflicts.push(conflict);
            winner
        } else {
            paths.pop()
        };
        if let Some(path) = winner {
            slots.insert(kind, path);
        }
    }
    slots
}

// ============================================================================
// Flat legacy layout
// ============================================================================

/// Anchors and companions share a directory and are told apart by the time
/// token in their names; auxiliary products live in `<dir>/<token>/`.
fn plan_flat(index: &DirectoryIndex, classifier: &Classifier, dir: &Path, plan: &mut GroupPlan) {
    let files = classify_dir(classifier, index, dir);

    let mut by_token: BTreeMap<&str, Vec<&Classified>> = BTreeMap::new();
    for file in &files {
        if let Some(token) = file.class.token.as_deref() {
            by_token.entry(token).or_default().push(file);
        }
    }

    for (token, members) in by_token {
        let Some(anchor_kind) = members
            .iter()
            .filter(|f| f.class.role == RuleRole::Anchor)
            .map(|f| f.class.kind.clone())
            .min()
        else {
            debug!(dir = %dir.display(), token, "Companions without an anchor, ignoring");
            continue;
        };

        let label = format!("{}#{}", dir.display(), token);
        let mut candidates: BTreeMap<ProductKind, Vec<PathBuf>> = BTreeMap::new();
        for file in &members {
            candidates
                .entry(file.class.kind.clone())
                .or_default()
                .push(file.path.clone());
        }

        let aux_dir = dir.join(token);
        for file in classify_dir(classifier, index, &aux_dir) {
            if file.class.role != RuleRole::Auxiliary {
                debug!(file = file.name, "Ignoring non-auxiliary product in token directory");
                continue;
            }
            candidates
                .entry(file.class.kind.clone())
                .or_default()
                .push(file.path);
        }

        let slots = choose_slots(&label, candidates, &mut plan.conflicts);
        if let Some(anchor) = slots.get(&anchor_kind).cloned() {
            plan.groups.push(SceneGroup {
                label,
                anchor_kind,
                anchor,
                slots,
            });
        }
    }
}

// ============================================================================
// Directory-keyed layout
// ============================================================================

/// Each directory is one acquisition and must hold exactly one anchor (and
/// exactly one of every required kind).
fn plan_directory(
    index: &DirectoryIndex,
    classifier: &Classifier,
    dir: &Path,
    required_kinds: &[ProductKind],
    plan: &mut GroupPlan,
) {
    let files = classify_dir(classifier, index, dir);
    if files.is_empty() {
        return;
    }

    let label = dir.display().to_string();
    let mut candidates: BTreeMap<ProductKind, Vec<PathBuf>> = BTreeMap::new();
    for file in &files {
        candidates
            .entry(file.class.kind.clone())
            .or_default()
            .push(file.path.clone());
    }

    let anchors: Vec<&Classified> = files
        .iter()
        .filter(|f| f.class.role == RuleRole::Anchor)
        .collect();

    let mut structural = Vec::new();
    let anchor_invalid = anchors.len() != 1;
    if anchor_invalid {
        let kind = anchors
            .iter()
            .map(|f| f.class.kind.clone())
            .min()
            .or_else(|| classifier.anchor_kind().cloned());
        match kind {
            Some(kind) => structural.push(Conflict::structural(
                &label,
                &kind,
                anchors.iter().map(|f| f.path.clone()).collect(),
            )),
            None => warn!(group = %label, "No anchor file, skipping directory"),
        }
    }
    for kind in required_kinds {
        let found = candidates.get(kind).map(Vec::len).unwrap_or(0);
        if found != 1 && !structural.iter().any(|c| &c.kind == kind) {
            structural.push(Conflict::structural(
                &label,
                kind,
                candidates.get(kind).cloned().unwrap_or_default(),
            ));
        }
    }

    if anchor_invalid || !structural.is_empty() {
        for conflict in &structural {
            warn!(
                group = %label,
                kind = %conflict.kind,
                found = conflict.candidates.len(),
                "Expected exactly one file, skipping directory"
            );
        }
        plan.conflicts.extend(structural);
        plan.abandoned += 1;
        return;
    }

    let anchor_kind = anchors[0].class.kind.clone();
    let anchor = anchors[0].path.clone();
    let mut slots = choose_slots(&label, candidates, &mut plan.conflicts);
    slots.insert(anchor_kind.clone(), anchor.clone());
    plan.groups.push(SceneGroup {
        label,
        anchor_kind,
        anchor,
        slots,
    });
}

// ============================================================================
// Per-granule layout
// ============================================================================

/// Every classified file is its own scene anchor.
fn plan_per_granule(
    index: &DirectoryIndex,
    classifier: &Classifier,
    dir: &Path,
    plan: &mut GroupPlan,
) {
    let mut files = classify_dir(classifier, index, dir);
    files.sort_by(|a, b| a.name.cmp(b.name));
    for file in files {
        plan.groups.push(SceneGroup {
            label: file.path.display().to_string(),
            anchor_kind: file.class.kind.clone(),
            anchor: file.path.clone(),
            slots: BTreeMap::from([(file.class.kind, file.path)]),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classifier, RuleConfig};

    fn classifier() -> Classifier {
        Classifier::with_default_rules().unwrap()
    }

    fn kind(name: &str) -> ProductKind {
        ProductKind::new(name).unwrap()
    }

    #[test]
    fn test_flat_groups_by_token() {
        let index = DirectoryIndex::from_paths([
            "/d/MOD03.A2020001.0000.hdf",
            "/d/MOD021KM.A2020001.0000.hdf",
            "/d/MOD03.A2020001.0005.hdf",
            "/d/MOD02HKM.A2020001.0005.hdf",
            "/d/MOD02QKM.A2020001.0010.hdf",
            "/d/0000/MOD04_L2.A2020001.0000.hdf",
            "/d/0000/MOD35_L2.A2020001.0000.hdf",
            "/d/README",
        ]);
        let plan = plan_groups(&index, &classifier(), LayoutMode::FlatLegacy, &[]);

        assert_eq!(plan.groups.len(), 2);
        assert!(plan.conflicts.is_empty());

        let first = &plan.groups[0];
        assert_eq!(first.label, "/d#0000");
        assert_eq!(first.anchor, PathBuf::from("/d/MOD03.A2020001.0000.hdf"));
        let kinds: Vec<&str> = first.slots.keys().map(|k| k.as_str()).collect();
        assert_eq!(kinds, vec!["mod021km", "mod03", "mod04", "mod35"]);

        let second = &plan.groups[1];
        assert_eq!(second.slots.len(), 2);
        assert!(second.slots.contains_key(&kind("mod02hkm")));
    }

    #[test]
    fn test_flat_companion_conflict_is_resolved() {
        let names = [
            "/d/MOD03.A2020001.0000.hdf",
            "/d/MOD021KM.A2020001.0000.005.hdf",
            "/d/MOD021KM.A2020001.0000.061.hdf",
        ];
        let forward = plan_groups(
            &DirectoryIndex::from_paths(names),
            &classifier(),
            LayoutMode::FlatLegacy,
            &[],
        );
        let backward = plan_groups(
            &DirectoryIndex::from_paths(names.iter().rev()),
            &classifier(),
            LayoutMode::FlatLegacy,
            &[],
        );

        for plan in [&forward, &backward] {
            assert_eq!(plan.groups.len(), 1);
            assert_eq!(plan.conflicts.len(), 1);
            assert_eq!(
                plan.groups[0].slots[&kind("mod021km")],
                PathBuf::from("/d/MOD021KM.A2020001.0000.061.hdf")
            );
        }
        assert_eq!(forward.conflicts, backward.conflicts);
    }

    #[test]
    fn test_directory_keyed_requires_one_anchor() {
        let index = DirectoryIndex::from_paths([
            "/d/a/MOD03.A2020001.0000.hdf",
            "/d/a/MOD021KM.A2020001.0000.hdf",
            "/d/b/MOD03.A2020001.0005.hdf",
            "/d/b/MOD03.A2020001.0010.hdf",
            "/d/c/MOD04_L2.A2020001.0015.hdf",
        ]);
        let plan = plan_groups(&index, &classifier(), LayoutMode::DirectoryKeyed, &[]);

        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].label, "/d/a");
        assert_eq!(plan.abandoned, 2);
        assert_eq!(plan.conflicts.len(), 2);
        assert!(plan.conflicts.iter().all(|c| c.structural && c.winner.is_none()));
        assert_eq!(plan.conflicts[0].candidates.len(), 2);
        assert!(plan.conflicts[1].candidates.is_empty());
        assert!(plan.conflicts.iter().all(|c| c.kind == kind("mod03")));
    }

    #[test]
    fn test_directory_without_anchor_reports_each_problem() {
        let index = DirectoryIndex::from_paths([
            "/d/a/MOD04_L2.A2020001.0000.hdf",
            "/d/a/MOD021KM.A2020001.0000.005.hdf",
            "/d/a/MOD021KM.A2020001.0000.061.hdf",
        ]);
        let plan = plan_groups(
            &index,
            &classifier(),
            LayoutMode::DirectoryKeyed,
            &[kind("mod04"), kind("mod021km")],
        );

        assert!(plan.groups.is_empty());
        assert_eq!(plan.abandoned, 1);
        let reported: Vec<(&str, usize)> = plan
            .conflicts
            .iter()
            .map(|c| (c.kind.as_str(), c.candidates.len()))
            .collect();
        assert_eq!(reported, vec![("mod03", 0), ("mod021km", 2)]);
    }

    #[test]
    fn test_directory_without_named_anchor_kind_is_skipped() {
        let rules = vec![
            RuleConfig::new(
                "mod$family",
                r"^MOD(?P<family>03)\.A(?P<token>\d{7}\.\d{4})",
                RuleRole::Anchor,
            ),
            RuleConfig::new("mod09", r"^MOD09\.", RuleRole::Auxiliary),
        ];
        let classifier = Classifier::new(&rules, &[]).unwrap();
        assert!(classifier.anchor_kind().is_none());

        let index = DirectoryIndex::from_paths(["/d/a/MOD09.A2020001.0000.hdf"]);
        let plan = plan_groups(&index, &classifier, LayoutMode::DirectoryKeyed, &[]);

        assert!(plan.groups.is_empty());
        assert!(plan.conflicts.is_empty());
        assert_eq!(plan.abandoned, 1);
    }

    #[test]
    fn test_directory_keyed_required_kinds() {
        let index = DirectoryIndex::from_paths([
            "/d/a/MOD03.A2020001.0000.hdf",
            "/d/a/MOD09.A2020001.0000.hdf",
            "/d/b/MOD03.A2020001.0005.hdf",
            "/d/b/MOD021KM.A2020001.0005.hdf",
        ]);
        let plan = plan_groups(
            &index,
            &classifier(),
            LayoutMode::DirectoryKeyed,
            &[kind("mod021km")],
        );

        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].label, "/d/b");
        assert_eq!(plan.abandoned, 1);
        assert_eq!(plan.conflicts[0].kind, kind("mod021km"));
    }

    #[test]
    fn test_directory_keyed_tie_break_for_other_kinds() {
        let index = DirectoryIndex::from_paths([
            "/d/a/MOD03.A2020001.0000.hdf",
            "/d/a/MOD09.A2020001.0000.A_2.hdf",
            "/d/a/MOD09.A2020001.0000.A_10.hdf",
        ]);
        let plan = plan_groups(&index, &classifier(), LayoutMode::DirectoryKeyed, &[]);

        assert_eq!(plan.groups.len(), 1);
        assert_eq!(
            plan.groups[0].slots[&kind("mod09")],
            PathBuf::from("/d/a/MOD09.A2020001.0000.A_10.hdf")
        );
        assert_eq!(plan.conflicts.len(), 1);
        assert!(!plan.conflicts[0].structural);
    }

    #[test]
    fn test_per_granule_groups_every_file() {
        let rules = vec![RuleConfig::new(
            "mod$family",
            r"^M[OY]D(?P<family>[^.]*)\..*\.hdf$",
            RuleRole::Auxiliary,
        )];
        let classifier = Classifier::new(&rules, &[]).unwrap();
        let index = DirectoryIndex::from_paths([
            "/t/MOD13Q1.A2020001.h18v04.061.hdf",
            "/t/MOD09GA.A2020001.h18v04.061.hdf",
            "/t/notes.txt",
        ]);
        let plan = plan_groups(&index, &classifier, LayoutMode::PerGranule, &[]);

        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.groups[0].anchor_kind, kind("mod09ga"));
        assert_eq!(plan.groups[1].slots.len(), 1);
    }

    #[test]
    fn test_write_order_starts_with_anchor() {
        let index = DirectoryIndex::from_paths([
            "/d/MOD03.A2020001.0000.hdf",
            "/d/MOD021KM.A2020001.0000.hdf",
            "/d/0000/MOD04_L2.A2020001.0000.hdf",
        ]);
        let plan = plan_groups(&index, &classifier(), LayoutMode::FlatLegacy, &[]);
        let order: Vec<&str> = plan.groups[0]
            .write_order()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(order, vec!["mod03", "mod021km", "mod04"]);
    }
}
