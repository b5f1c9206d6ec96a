//! # Error Handling
//!
//! This module defines the centralized error type for `librarian`. It uses
//! the `thiserror` library to create a single `Error` enum covering every
//! anticipated failure mode, with contextual fields that aid diagnosis.
//!
//! ## Severity
//!
//! Failures fall into three tiers, and the orchestration code relies on
//! [`Error::is_batch_fatal`] to tell them apart:
//!
//! - **Per-library recoverable**: a container step failed for one library.
//!   The batch records a sanitized line, undoes that library's changes and
//!   moves on.
//! - **Batch-fatal**: filesystem copy failures after a successful container
//!   step, build-induced tree drift, and state (de)serialization failures.
//!   The batch aborts immediately.
//! - **Command-fatal**: raised before any per-library work starts (missing
//!   tokens, dirty repository, malformed URLs) or after it ends with nothing
//!   but failures.

use thiserror::Error;

/// Main error type for librarian operations
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value was missing or invalid.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The state document or the static configuration document is invalid.
    #[error("State document error in {path}: {message}")]
    State { path: String, message: String },

    /// A git command exited unsuccessfully.
    #[error("Git command failed in {dir}: git {command} - {stderr}")]
    GitCommand {
        command: String,
        dir: String,
        stderr: String,
    },

    /// The repository had uncommitted changes when it was required to be clean.
    #[error("Repository at {dir} is not clean: {details}")]
    DirtyRepository { dir: String, details: String },

    /// A GitHub API call failed.
    #[error("GitHub operation error: {operation} - {message}")]
    GitHub { operation: String, message: String },

    /// A container step returned a failure.
    #[error("Container step '{command}' failed for {target}: {message}")]
    Container {
        command: String,
        target: String,
        message: String,
    },

    /// A filesystem operation failed outside of a container step.
    #[error("Filesystem operation error: {message}")]
    Filesystem { message: String },

    /// The build step left the working tree modified.
    #[error("Build of {library} modified the working tree: {details}")]
    TreeDrift { library: String, details: String },

    /// Every library attempted in a batch failed.
    #[error("All {count} attempted libraries failed; see the log for details")]
    AllFailed { count: usize },

    /// A version could not be determined or was rejected.
    #[error("Version error for {library}: {message}")]
    Version { library: String, message: String },

    /// The library has no releasable changes.
    #[error("Library {library} has no releasable changes; specify an explicit version")]
    NothingToRelease { library: String },

    /// Release metadata was invalid or inconsistent.
    #[error("Release error: {message}")]
    Release { message: String },

    /// Merging a release pull request was blocked.
    #[error("Merge blocked for pull request #{number}: {reason}")]
    MergeBlocked { number: u64, reason: String },

    /// Merging a release pull request was abandoned.
    #[error("Merge aborted for pull request #{number}: {reason}")]
    MergeAborted { number: u64, reason: String },

    /// A URL did not have the expected shape.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The post-merge sync check failed.
    #[error("Sync check error for {url}: {message}")]
    SyncCheck { url: String, message: String },

    /// A library ID was not present in the state document.
    #[error("Library not found in state: {id}")]
    LibraryNotFound { id: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML error, wrapped from `serde_yaml::Error`.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A semantic versioning parsing error, wrapped from `semver::Error`.
    #[error("Semver parsing error: {0}")]
    Semver(#[from] semver::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// An HTTP client error, wrapped from `reqwest::Error`.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Returns true when the error must abort the whole batch rather than
    /// being recorded against a single library.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Error::Filesystem { .. }
                | Error::TreeDrift { .. }
                | Error::State { .. }
                | Error::Io(_)
                | Error::Yaml(_)
                | Error::Json(_)
                | Error::GitCommand { .. }
        )
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
