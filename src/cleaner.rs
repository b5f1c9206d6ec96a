//! # Source Tree Cleaning
//!
//! Before freshly generated code is copied into the language repository, the
//! paths a library owns are cleared so that files the generator no longer
//! produces do not linger.
//!
//! ## Process
//!
//! 1.  **Enumerate**: every path under each of the library's source roots is
//!     collected, root included. A missing source root is logged and skipped,
//!     which is the normal case for a library generated for the first time.
//! 2.  **Select**: a path is a removal candidate when it matches at least one
//!     remove pattern and no preserve pattern. Preserve always wins, and
//!     [`GLOBAL_PRESERVE_PATTERN`] is always part of the preserve set.
//! 3.  **Delete**: files (including symlinks, which are never followed) are
//!     deleted first, then directories from the deepest to the shallowest.
//!     A directory that cannot be removed, typically because it still holds
//!     preserved children, is logged as a warning.
//!
//! Patterns are matched against repository-relative paths using `/` as the
//! separator.

use crate::defaults::GLOBAL_PRESERVE_PATTERN;
use crate::error::{Error, Result};
use log::{debug, info, warn};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use walkdir::WalkDir;

/// The paths a clean will delete, in deletion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanPlan {
    /// Files and symlinks.
    pub files: Vec<String>,
    /// Directories, deepest first.
    pub dirs: Vec<String>,
}

impl CleanPlan {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }
}

/// Cleans `root_dir` for the given source roots and patterns.
pub fn clean(
    root_dir: &Path,
    source_roots: &[String],
    remove_patterns: &[String],
    preserve_patterns: &[String],
) -> Result<()> {
    let plan = plan_clean(root_dir, source_roots, remove_patterns, preserve_patterns)?;
    if plan.is_empty() {
        debug!("Nothing to clean under {}", root_dir.display());
        return Ok(());
    }

    for file in &plan.files {
        let path = root_dir.join(file);
        fs::remove_file(&path).map_err(|e| Error::Filesystem {
            message: format!("Failed to remove '{}': {}", path.display(), e),
        })?;
    }

    for dir in &plan.dirs {
        let path = root_dir.join(dir);
        if let Err(e) = fs::remove_dir(&path) {
            warn!("Could not remove directory '{}': {}", path.display(), e);
        }
    }

    info!(
        "Cleaned {} files and {} directories under {}",
        plan.files.len(),
        plan.dirs.len(),
        root_dir.display()
    );
    Ok(())
}

/// Computes what [`clean`] would delete without touching the filesystem.
pub fn plan_clean(
    root_dir: &Path,
    source_roots: &[String],
    remove_patterns: &[String],
    preserve_patterns: &[String],
) -> Result<CleanPlan> {
    let remove = compile(remove_patterns.iter().map(String::as_str))?;
    let preserve = compile(
        preserve_patterns
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(GLOBAL_PRESERVE_PATTERN)),
    )?;

    let mut files = BTreeSet::new();
    let mut dirs = BTreeSet::new();

    for source_root in source_roots {
        let full_root = root_dir.join(source_root);
        match fs::symlink_metadata(&full_root) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Source root '{}' does not exist, skipping", source_root);
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        let mut found = 0usize;
        for entry in WalkDir::new(&full_root).follow_links(false) {
            let entry = entry.map_err(|e| Error::Filesystem {
                message: format!("Failed to walk '{}': {}", full_root.display(), e),
            })?;
            let relative = relative_path(root_dir, entry.path())?;
            if !entry.file_type().is_dir() {
                found += 1;
            }
            if !remove.iter().any(|re| re.is_match(&relative)) {
                continue;
            }
            if preserve.iter().any(|re| re.is_match(&relative)) {
                debug!("Preserving '{}'", relative);
                continue;
            }
            if entry.file_type().is_dir() {
                dirs.insert(relative);
            } else {
                files.insert(relative);
            }
        }
        if found == 0 {
            info!("Source root '{}' contains no files", source_root);
        }
    }

    let mut dirs: Vec<String> = dirs.into_iter().collect();
    dirs.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| b.cmp(a)));

    Ok(CleanPlan {
        files: files.into_iter().collect(),
        dirs,
    })
}

fn compile<'a>(patterns: impl Iterator<Item = &'a str>) -> Result<Vec<Regex>> {
    patterns
        .map(|p| Regex::new(p).map_err(Error::from))
        .collect()
}

fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

fn relative_path(root_dir: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root_dir).map_err(|_| Error::Filesystem {
        message: format!(
            "'{}' is not under '{}'",
            path.display(),
            root_dir.display()
        ),
    })?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}
