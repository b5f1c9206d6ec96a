//! # Librarian
//!
//! This library orchestrates generation and release of client libraries in a
//! language repository that tracks many libraries. It is designed to be
//! used by the `librarian` command-line tool.
//!
//! ## Core Concepts
//!
//! - **State (`state`)**: the `.librarian/state.yaml` document listing every
//!   library, its APIs, source roots, version and last generated API commit,
//!   plus the static `.librarian/config.yaml`.
//! - **Containers (`container`)**: language-specific work (generate, clean,
//!   build, release, package, publish) runs in a container image behind the
//!   [`container::ContainerDriver`] trait.
//! - **Collaborators (`git`, `github`)**: the language repository and the
//!   GitHub API, behind the [`git::Repository`] and
//!   [`github::GitHubClient`] traits.
//! - **Pipeline (`pipeline`, `batch`)**: regenerating one library is a small
//!   state machine with explicit compensation; a batch runs it for every
//!   library and collects the outcomes into one pull request.
//! - **Releases (`release`, `merge_gate`, `sync_wait`)**: version
//!   calculation, release commits, gated merging and publishing.
//!
//! ## Execution Flow
//!
//! A typical `generate` run:
//!
//! 1.  Open or clone the language and API repositories; the language
//!     repository must be clean.
//! 2.  Load and validate the state document.
//! 3.  For each library: generate into a scratch directory, clean the
//!     library's files in the repository, copy the output in, commit, build.
//! 4.  Trim the batch to the commit cap.
//! 5.  Push a branch and open a pull request describing successes and
//!     failures.

pub mod batch;
pub mod cleaner;
pub mod config;
pub mod configure;
pub mod container;
pub mod conventional;
pub mod defaults;
pub mod error;
pub mod git;
pub mod github;
pub mod merge_gate;
pub mod output;
pub mod pipeline;
pub mod pull_request;
pub mod release;
pub mod service_config;
pub mod state;
pub mod sync;
pub mod sync_wait;

#[cfg(test)]
mod cleaner_proptest;
