//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the `librarian`
//! command-line tool. Each subcommand is defined in its own file.
//!
//! ## Structure
//!
//! Each command module typically contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args`, builds an immutable
//!   [`Config`], and calls into the `librarian` library.
//!
//! Arguments shared by every command that works on a language repository
//! live in [`RepoArgs`].

pub mod completions;
pub mod configure;
pub mod create_release_artifacts;
pub mod generate;
pub mod merge_release_pr;
pub mod publish_release_artifacts;
pub mod release_init;
pub mod tag_and_release;

use anyhow::Result;
use clap::Args;
use librarian::batch::Publication;
use librarian::config::Config;
use librarian::error::Error;
use librarian::git::{GitRepository, Repository};
use librarian::github::GhCliClient;
use log::info;
use std::path::PathBuf;

/// Arguments for commands that operate on a language repository.
#[derive(Args, Debug, Clone)]
pub struct RepoArgs {
    /// Language repository: a local path or a URL to clone
    #[arg(long, env = "LIBRARIAN_REPO")]
    pub repo: Option<String>,

    /// Scratch directory for clones, container mounts and artifacts
    #[arg(long, value_name = "DIR")]
    pub work_root: Option<PathBuf>,

    /// Container image; overrides the image in the state document
    #[arg(long)]
    pub image: Option<String>,

    /// Push a branch and open a pull request instead of only logging it
    #[arg(long)]
    pub push: bool,

    /// Base branch for pull requests
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// GitHub token for pushes and API calls
    #[arg(long, env = "LIBRARIAN_GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Run containers as this `uid:gid`
    #[arg(long, value_name = "UID:GID")]
    pub container_user: Option<String>,

    /// `host:local` path mapping when the docker daemon sees another filesystem
    #[arg(long, value_name = "HOST:LOCAL")]
    pub host_mount: Option<String>,
}

impl RepoArgs {
    /// Configuration with these arguments applied over the defaults.
    pub fn config(&self) -> Config {
        let defaults = Config::default();
        Config {
            repo: self.repo.clone(),
            work_root: self.work_root.clone().unwrap_or(defaults.work_root.clone()),
            image: self.image.clone(),
            push: self.push,
            branch: self.branch.clone(),
            github_token: self.github_token.clone().filter(|t| !t.is_empty()),
            container_user: self.container_user.clone(),
            host_mount: self.host_mount.clone(),
            ..defaults
        }
    }
}

/// Opens or clones the language repository, which must have no
/// uncommitted changes.
pub(crate) fn open_language_repo(config: &Config) -> Result<GitRepository> {
    std::fs::create_dir_all(&config.work_root)?;
    let repo = GitRepository::open_or_clone(config.require_repo()?, &config.work_root)?
        .with_push_token(config.github_token.clone());
    let status = repo.status()?;
    if !status.trim().is_empty() {
        return Err(Error::DirtyRepository {
            dir: repo.dir().display().to_string(),
            details: status.trim().to_string(),
        }
        .into());
    }
    Ok(repo)
}

/// A GitHub client when the command will push; `None` otherwise.
pub(crate) fn github_client(config: &Config) -> Result<Option<GhCliClient>> {
    if !config.push {
        return Ok(None);
    }
    Ok(Some(GhCliClient::new(config.require_github_token()?)))
}

pub(crate) fn report(publication: &Publication) {
    match publication {
        Publication::Nothing => info!("Nothing to publish"),
        Publication::Logged(_) => info!("Pull request not created; rerun with --push"),
        Publication::Created(created) => {
            info!("Pull request #{}: {}", created.number, created.html_url)
        }
    }
}
