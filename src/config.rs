//! # Run Configuration
//!
//! A single [`Config`] value is built from the parsed command-line arguments
//! of each command and then passed by reference to everything that needs it.
//! It is never mutated after construction; there is no ambient flag state.
//!
//! Not every field is meaningful for every command. Commands check what they
//! need up front with the `require_*` helpers, so a missing flag or token is
//! reported before any side effect happens.

use crate::defaults::{default_work_root, POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::state::LibrarianState;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Immutable configuration for one librarian invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local path or remote URL of the language repository.
    pub repo: Option<String>,
    /// Local path or remote URL of the API definition repository.
    pub api_source: Option<String>,
    /// Scratch directory for clones, container output and state dirs.
    pub work_root: PathBuf,
    /// Image override; the state document's image is used otherwise.
    pub image: Option<String>,
    /// Restricts the command to one library.
    pub library: Option<String>,
    /// API path, for commands scoped to one API.
    pub api: Option<String>,
    /// Explicit version for a release.
    pub library_version: Option<String>,
    /// Whether to push the branch and open a pull request.
    pub push: bool,
    /// Whether to run the build step after generation.
    pub build: bool,
    /// Base branch of the language repository.
    pub branch: String,
    /// Language of the repository; falls back to the static configuration.
    pub language: Option<String>,
    /// GitHub token with write access.
    pub github_token: Option<String>,
    /// Optional bearer token for the post-merge sync check.
    pub sync_auth_token: Option<String>,
    /// URL prefix polled after merging until the merge commit is synced.
    pub sync_url_prefix: Option<String>,
    /// File to which `KEY=value` results are appended.
    pub env_file: Option<PathBuf>,
    /// Release ID shared by the commits of one release.
    pub release_id: Option<String>,
    /// URL of a release pull request.
    pub release_pr_url: Option<String>,
    /// Directory holding release artifacts.
    pub artifact_root: Option<PathBuf>,
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// Approvals a release pull request needs; falls back to the static
    /// configuration.
    pub required_approvals: Option<u32>,
    /// Check runs that never hold up a merge.
    pub exempt_checks: Vec<String>,
    /// `uid:gid` to run containers as.
    pub container_user: Option<String>,
    /// `host:local` mapping for running inside a container whose docker
    /// daemon sees a different filesystem.
    pub host_mount: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo: None,
            api_source: None,
            work_root: default_work_root(),
            image: None,
            library: None,
            api: None,
            library_version: None,
            push: false,
            build: false,
            branch: "main".to_string(),
            language: None,
            github_token: None,
            sync_auth_token: None,
            sync_url_prefix: None,
            env_file: None,
            release_id: None,
            release_pr_url: None,
            artifact_root: None,
            poll_interval: POLL_INTERVAL,
            required_approvals: None,
            exempt_checks: Vec::new(),
            container_user: None,
            host_mount: None,
        }
    }
}

impl Config {
    /// The image to run: the override if given, otherwise the state's image.
    pub fn image_for(&self, state: &LibrarianState) -> String {
        self.image.clone().unwrap_or_else(|| state.image.clone())
    }

    pub fn require_repo(&self) -> Result<&str> {
        require(self.repo.as_deref(), "--repo")
    }

    pub fn require_api_source(&self) -> Result<&str> {
        require(self.api_source.as_deref(), "--api-source")
    }

    pub fn require_api(&self) -> Result<&str> {
        require(self.api.as_deref(), "--api")
    }

    pub fn require_release_id(&self) -> Result<&str> {
        require(self.release_id.as_deref(), "--release-id")
    }

    pub fn require_release_pr_url(&self) -> Result<&str> {
        require(self.release_pr_url.as_deref(), "--pr")
    }

    pub fn require_artifact_root(&self) -> Result<&Path> {
        self.artifact_root.as_deref().ok_or_else(|| Error::Config {
            message: "--artifact-root is required".to_string(),
        })
    }

    /// The GitHub token; required whenever an API call will be made.
    pub fn require_github_token(&self) -> Result<&str> {
        match self.github_token.as_deref() {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(Error::Config {
                message: "a GitHub token is required (set LIBRARIAN_GITHUB_TOKEN)".to_string(),
            }),
        }
    }

    /// Translates a local path into the path the docker daemon sees.
    pub fn host_path(&self, local: &Path) -> PathBuf {
        let Some(mapping) = self.host_mount.as_deref() else {
            return local.to_path_buf();
        };
        let Some((host, local_prefix)) = mapping.split_once(':') else {
            return local.to_path_buf();
        };
        match local.strip_prefix(local_prefix) {
            Ok(rest) => Path::new(host).join(rest),
            Err(_) => local.to_path_buf(),
        }
    }
}

fn require<'a>(value: Option<&'a str>, flag: &str) -> Result<&'a str> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Config {
            message: format!("{} is required", flag),
        }),
    }
}
