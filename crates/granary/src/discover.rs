//! File discovery.
//!
//! [`FileEnumerator`] produces candidate granule paths under a root;
//! [`DirectoryIndex`] groups them by parent directory so the builder can ask
//! for sibling listings without touching the filesystem again.

use crate::error::BuildError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Lists regular files under a root.
pub trait FileEnumerator: Send + Sync {
    fn enumerate(&self, root: &Path) -> Result<Vec<PathBuf>, BuildError>;
}

/// Recursive directory walker.
#[derive(Debug, Clone, Default)]
pub struct WalkdirEnumerator {
    /// Follow symbolic links while walking
    pub follow_links: bool,
    pub max_depth: Option<usize>,
}

impl WalkdirEnumerator {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}

impl FileEnumerator for WalkdirEnumerator {
    fn enumerate(&self, root: &Path) -> Result<Vec<PathBuf>, BuildError> {
        if !root.is_dir() {
            return Err(BuildError::Enumeration {
                root: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let mut walker = WalkDir::new(root).follow_links(self.follow_links);
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut files = Vec::new();
        let entries = walker.into_iter().filter_entry(|entry| {
            entry.depth() == 0 || !is_hidden(&entry.file_name().to_string_lossy())
        });
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        debug!(root = %root.display(), files = files.len(), "Enumerated files");
        Ok(files)
    }
}

/// Files grouped by parent directory, names sorted.
#[derive(Debug, Clone, Default)]
pub struct DirectoryIndex {
    dirs: BTreeMap<PathBuf, Vec<String>>,
}

impl DirectoryIndex {
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut dirs: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
        for path in paths {
            let path = path.as_ref();
            let Some(name) = path.file_name() else {
                continue;
            };
            let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
            dirs.entry(parent)
                .or_default()
                .push(name.to_string_lossy().into_owned());
        }
        for names in dirs.values_mut() {
            names.sort();
            names.dedup();
        }
        Self { dirs }
    }

    /// File names directly inside `dir` (empty if the directory is unknown).
    pub fn listing(&self, dir: &Path) -> &[String] {
        self.dirs.get(dir).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn directories(&self) -> impl Iterator<Item = &Path> {
        self.dirs.keys().map(PathBuf::as_path)
    }

    pub fn file_count(&self) -> usize {
        self.dirs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}
