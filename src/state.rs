//! # Persisted State and Configuration Documents
//!
//! Every language repository managed by librarian carries two YAML documents
//! under `.librarian/`:
//!
//! - **`state.yaml`** ([`LibrarianState`]): the container image used for all
//!   language operations and the ordered list of tracked libraries. This is
//!   rewritten by librarian on every generation and release.
//! - **`config.yaml`** ([`LibrarianConfig`]): static, human-maintained policy
//!   such as the global file allowlist, the commit cap for generated pull
//!   requests and per-library overrides. Librarian never writes it.
//!
//! Loading validates the documents so that later stages can rely on unique
//! library IDs and well-formed repository-relative paths. Any failure to read,
//! parse or validate is reported as [`Error::State`], which is batch-fatal.

use crate::defaults::{CONFIG_FILE, LIBRARIAN_DIR, STATE_FILE};
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path};

/// The persisted state of one language repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarianState {
    /// Container image reference (`registry/name:tag`).
    pub image: String,
    /// Tracked libraries, in declaration order.
    #[serde(default)]
    pub libraries: Vec<LibraryState>,
}

/// The persisted state of a single library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryState {
    /// Stable identifier, e.g. `google-cloud-secretmanager-v1`.
    pub id: String,
    /// Current released (or to-be-released) version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Version before the most recent release-init.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub previous_version: String,
    /// APIs generated into this library.
    #[serde(default)]
    pub apis: Vec<Api>,
    /// Repository-relative paths owned by this library.
    #[serde(default)]
    pub source_roots: Vec<String>,
    /// Regexes selecting paths to delete before copying new output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_regex: Vec<String>,
    /// Regexes of paths protected from deletion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preserve_regex: Vec<String>,
    /// Hash of the last API source commit incorporated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_generated_commit: String,
    /// Set when a release has been queued for this library.
    #[serde(default)]
    pub release_triggered: bool,
    /// Conventional-commit records accumulated since the last release.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<Change>,
}

/// One API in a library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Api {
    /// Path of the API relative to the API source root, e.g. `google/cloud/secretmanager/v1`.
    pub path: String,
    /// Service config file name within the API directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_config: String,
    #[serde(default)]
    pub status: ApiStatus,
}

/// Onboarding status of an API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    #[default]
    Existing,
    New,
}

/// A conventional-commit record stored against a library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Commit type, e.g. `feat` or `fix`.
    #[serde(rename = "type")]
    pub kind: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    pub commit_hash: String,
    #[serde(default)]
    pub breaking: bool,
}

/// The static configuration of one language repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarianConfig {
    /// Repository-root files shared by all libraries.
    #[serde(default)]
    pub global_files_allowlist: Vec<GlobalFile>,
    /// Maximum commits in one generated pull request; zero means unlimited.
    #[serde(default)]
    pub max_pull_request_commits: usize,
    /// Language of the repository, used when onboarding new APIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Approvals required before a release PR is merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_approvals: Option<u32>,
    /// Per-library overrides.
    #[serde(default)]
    pub libraries: Vec<LibraryConfig>,
}

/// A file in the global allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalFile {
    pub path: String,
    pub permissions: FilePermission,
}

/// Whether a global file may be changed by a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilePermission {
    ReadOnly,
    ReadWrite,
}

/// Per-library overrides in the static configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub id: String,
    /// Version the next release should be at least at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_version: Option<String>,
    /// Excludes the library from automated generation.
    #[serde(default)]
    pub generate_blocked: bool,
    /// Excludes the library from automated releases.
    #[serde(default)]
    pub release_blocked: bool,
}

impl LibrarianState {
    /// Finds a library by ID.
    pub fn find_library(&self, id: &str) -> Option<&LibraryState> {
        self.libraries.iter().find(|l| l.id == id)
    }

    /// Finds a library by ID for mutation.
    pub fn find_library_mut(&mut self, id: &str) -> Option<&mut LibraryState> {
        self.libraries.iter_mut().find(|l| l.id == id)
    }

    /// Finds the library that contains the given API path.
    pub fn find_library_by_api_path(&self, api_path: &str) -> Option<&LibraryState> {
        self.libraries
            .iter()
            .find(|l| l.apis.iter().any(|a| a.path == api_path))
    }

    /// Checks the invariants later stages rely on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Error::State {
            path: STATE_FILE.to_string(),
            message,
        };

        if self.image.trim().is_empty() {
            return Err(invalid("image must not be empty".to_string()));
        }

        let id_pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$")?;
        let mut seen = HashSet::new();
        for library in &self.libraries {
            if !id_pattern.is_match(&library.id) {
                return Err(invalid(format!("invalid library id '{}'", library.id)));
            }
            if !seen.insert(library.id.as_str()) {
                return Err(invalid(format!("duplicate library id '{}'", library.id)));
            }
            for api in &library.apis {
                if !is_clean_relative_path(&api.path) {
                    return Err(invalid(format!(
                        "library '{}' has invalid api path '{}'",
                        library.id, api.path
                    )));
                }
            }
            for root in &library.source_roots {
                if !is_clean_relative_path(root) {
                    return Err(invalid(format!(
                        "library '{}' has invalid source root '{}'",
                        library.id, root
                    )));
                }
            }
        }
        Ok(())
    }
}

impl LibraryState {
    /// API paths of this library.
    pub fn api_paths(&self) -> Vec<String> {
        self.apis.iter().map(|a| a.path.clone()).collect()
    }

    /// Removal patterns, defaulting to "each source root and everything under it".
    pub fn remove_patterns(&self) -> Vec<String> {
        if !self.remove_regex.is_empty() {
            return self.remove_regex.clone();
        }
        self.source_roots
            .iter()
            .map(|root| default_remove_pattern(root))
            .collect()
    }
}

/// Default removal pattern for a source root: `^<root>(/.*)?$`.
pub fn default_remove_pattern(source_root: &str) -> String {
    format!("^{}(/.*)?$", regex::escape(source_root.trim_end_matches('/')))
}

impl LibrarianConfig {
    /// Finds the overrides for a library.
    pub fn library_config(&self, id: &str) -> Option<&LibraryConfig> {
        self.libraries.iter().find(|l| l.id == id)
    }

    pub fn is_generate_blocked(&self, id: &str) -> bool {
        self.library_config(id).is_some_and(|c| c.generate_blocked)
    }

    pub fn is_release_blocked(&self, id: &str) -> bool {
        self.library_config(id).is_some_and(|c| c.release_blocked)
    }

    /// The configured next-version override for a library.
    pub fn next_version(&self, id: &str) -> Option<&str> {
        self.library_config(id)
            .and_then(|c| c.next_version.as_deref())
    }
}

fn is_clean_relative_path(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Parses a state document.
pub fn parse_state(yaml: &str) -> Result<LibrarianState> {
    let state: LibrarianState = serde_yaml::from_str(yaml).map_err(|e| Error::State {
        path: STATE_FILE.to_string(),
        message: e.to_string(),
    })?;
    state.validate()?;
    Ok(state)
}

/// Loads and validates the state document of the repository at `repo_dir`.
pub fn load_state(repo_dir: &Path) -> Result<LibrarianState> {
    let path = repo_dir.join(STATE_FILE);
    let content = fs::read_to_string(&path).map_err(|e| Error::State {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_state(&content)
}

/// Writes the state document of the repository at `repo_dir`.
pub fn save_state(repo_dir: &Path, state: &LibrarianState) -> Result<()> {
    let path = repo_dir.join(STATE_FILE);
    let content = serde_yaml::to_string(state).map_err(|e| Error::State {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    fs::create_dir_all(repo_dir.join(LIBRARIAN_DIR))?;
    fs::write(&path, content).map_err(|e| Error::State {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Loads the static configuration document, or the default when absent.
pub fn load_config(repo_dir: &Path) -> Result<LibrarianConfig> {
    let path = repo_dir.join(CONFIG_FILE);
    if !path.exists() {
        log::debug!("No {} found, using default configuration", CONFIG_FILE);
        return Ok(LibrarianConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    let config: LibrarianConfig = serde_yaml::from_str(&content).map_err(|e| Error::State {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    for global in &config.global_files_allowlist {
        if !is_clean_relative_path(&global.path) {
            return Err(Error::State {
                path: path.display().to_string(),
                message: format!("invalid global file path '{}'", global.path),
            });
        }
    }
    Ok(config)
}
