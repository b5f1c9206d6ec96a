//! Default values for librarian configuration.
//!
//! This module provides centralized default values used across commands,
//! ensuring consistency and avoiding duplication.

use std::path::PathBuf;
use std::time::Duration;

/// Repository-relative directory holding librarian's persisted documents.
pub const LIBRARIAN_DIR: &str = ".librarian";

/// Repository-relative path of the state document.
pub const STATE_FILE: &str = ".librarian/state.yaml";

/// Repository-relative path of the static configuration document.
pub const CONFIG_FILE: &str = ".librarian/config.yaml";

/// Repository-relative path of the generator-input directory.
pub const GENERATOR_INPUT_DIR: &str = ".librarian/generator-input";

/// Preserve pattern applied to every clean, whatever the library declares.
pub const GLOBAL_PRESERVE_PATTERN: &str = r"^\.librarian/generator-input(/.*)?$";

/// Base URL used when synthesizing `Source-Link` trailers.
pub const SOURCE_LINK_BASE: &str = "https://github.com/googleapis/googleapis/commit/";

/// Label that must be present on a release PR until librarian merges it.
pub const DO_NOT_MERGE_LABEL: &str = "do not merge";

/// Label a human applies to stop librarian from merging.
pub const MANUAL_BLOCK_LABEL: &str = "merge-blocked-manually";

/// Label librarian applies when it finds a blocking condition.
pub const LIBRARIAN_BLOCK_LABEL: &str = "merge-blocked-by-librarian";

/// Sleep between merge-gate and sync-wait polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Key written to the environment file after a successful merge.
pub const MERGE_COMMIT_ENV_KEY: &str = "MERGE_COMMIT_SHA";

/// Name of the release metadata file inside an artifact root.
pub const RELEASE_METADATA_FILE: &str = "release.json";

/// Returns the default work root for a single invocation.
///
/// Uses the platform-appropriate cache directory with a timestamped
/// subdirectory so that invocations never share scratch space:
/// - Linux: `~/.cache/librarian/<timestamp>`
/// - macOS: `~/Library/Caches/librarian/<timestamp>`
///
/// Falls back to the system temporary directory if the platform cache
/// directory cannot be determined.
pub fn default_work_root() -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("librarian")
        .join(stamp)
}

/// Tag name used for a library release.
pub fn release_tag(library_id: &str, version: &str) -> String {
    format!("{}-v{}", library_id, version)
}
