//! # Copying Files Between Repository and Container Workspaces
//!
//! Containers never operate on the language repository directly when that
//! can be avoided. These helpers move files between the tracked repository
//! and isolated output directories:
//!
//! - [`copy_library_files`] copies the source roots a library owns.
//! - [`copy_global_allowlist`] copies the cross-library files named in the
//!   static configuration, honouring read-only entries.
//! - [`copy_tree`] overlays one directory onto another.
//!
//! Symlinks are recreated as symlinks and never dereferenced. Every failure
//! is reported as [`Error::Filesystem`].

use crate::error::{Error, Result};
use crate::state::{FilePermission, LibrarianConfig, LibrarianState};
use log::{debug, info};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use walkdir::WalkDir;

/// Copies every file under the library's source roots from `src_root` to `dest_root`.
///
/// A source root with no counterpart under `src_root` copies nothing.
pub fn copy_library_files(
    state: &LibrarianState,
    dest_root: &Path,
    library_id: &str,
    src_root: &Path,
) -> Result<()> {
    let library = state
        .find_library(library_id)
        .ok_or_else(|| Error::LibraryNotFound {
            id: library_id.to_string(),
        })?;

    for source_root in &library.source_roots {
        let src = src_root.join(source_root);
        if !exists_no_follow(&src)? {
            debug!("No files under '{}' for {}", src.display(), library_id);
            continue;
        }
        let copied = copy_tree(&src, &dest_root.join(source_root))?;
        info!(
            "Copied {} files of {} from '{}'",
            copied,
            library_id,
            src.display()
        );
    }
    Ok(())
}

/// Copies the global allowlist from `src` to `dst`.
///
/// Read-only entries are copied only when `include_read_only` is set, which
/// is the case when populating a container workspace but never when pulling
/// results back. Missing entries are skipped.
pub fn copy_global_allowlist(
    config: &LibrarianConfig,
    dst: &Path,
    src: &Path,
    include_read_only: bool,
) -> Result<()> {
    for global in &config.global_files_allowlist {
        if global.permissions == FilePermission::ReadOnly && !include_read_only {
            debug!("Skipping read-only global file '{}'", global.path);
            continue;
        }
        let from = src.join(&global.path);
        if !exists_no_follow(&from)? {
            debug!("Global file '{}' not present, skipping", from.display());
            continue;
        }
        copy_entry(&from, &dst.join(&global.path))?;
    }
    Ok(())
}

/// Overlays `src` onto `dst`, overwriting existing files. Returns the number
/// of files and symlinks copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| Error::Filesystem {
            message: format!("Failed to walk '{}': {}", src.display(), e),
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Filesystem {
                message: e.to_string(),
            })?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| fs_error("create directory", &target, e))?;
        } else {
            copy_entry(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Replaces `dst` with a fresh copy of `src`.
pub fn copy_fresh(src: &Path, dst: &Path) -> Result<()> {
    if exists_no_follow(dst)? {
        fs::remove_dir_all(dst).map_err(|e| fs_error("remove", dst, e))?;
    }
    fs::create_dir_all(dst).map_err(|e| fs_error("create directory", dst, e))?;
    if exists_no_follow(src)? {
        copy_tree(src, dst)?;
    }
    Ok(())
}

/// Copies one file or symlink, creating parent directories as needed.
fn copy_entry(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| fs_error("create directory", parent, e))?;
    }
    let metadata = fs::symlink_metadata(src).map_err(|e| fs_error("stat", src, e))?;
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(src).map_err(|e| fs_error("read link", src, e))?;
        if exists_no_follow(dst)? {
            fs::remove_file(dst).map_err(|e| fs_error("remove", dst, e))?;
        }
        make_symlink(&target, dst)
    } else {
        if fs::symlink_metadata(dst).is_ok_and(|m| m.file_type().is_symlink()) {
            fs::remove_file(dst).map_err(|e| fs_error("remove", dst, e))?;
        }
        fs::copy(src, dst).map_err(|e| fs_error("copy", src, e))?;
        Ok(())
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| fs_error("symlink", link, e))
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_file(target, link).map_err(|e| fs_error("symlink", link, e))
}

fn exists_no_follow(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(fs_error("stat", path, e)),
    }
}

fn fs_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Filesystem {
        message: format!("Failed to {} '{}': {}", action, path.display(), e),
    }
}
