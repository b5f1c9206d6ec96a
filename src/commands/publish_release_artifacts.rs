//! # Publish-Release-Artifacts Command Implementation
//!
//! Publishes the packages listed in `release.json` and creates a GitHub
//! release, tagged `<library>-v<version>`, for each one.

use anyhow::Result;
use clap::Args;
use librarian::config::Config;
use librarian::container::DockerDriver;
use librarian::git::Repository;
use librarian::github::{GhCliClient, GitHubRepo};
use librarian::release::ReleaseRunner;
use librarian::state::{load_config, load_state};
use log::info;
use std::path::PathBuf;

use super::{open_language_repo, RepoArgs};

/// Publish packaged release artifacts
#[derive(Args, Debug)]
pub struct PublishReleaseArtifactsArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// Directory written by create-release-artifacts
    #[arg(long, value_name = "DIR")]
    pub artifact_root: PathBuf,
}

/// Execute the `publish-release-artifacts` command.
pub fn execute(args: PublishReleaseArtifactsArgs) -> Result<()> {
    let config = Config {
        artifact_root: Some(args.artifact_root.clone()),
        ..args.repo.config()
    };
    let github = GhCliClient::new(config.require_github_token()?);
    let repo = open_language_repo(&config)?;
    let gh_repo = GitHubRepo::from_remote_url(&repo.remote_url("origin")?)?;
    let state = load_state(repo.dir())?;
    let lconfig = load_config(repo.dir())?;
    let driver = DockerDriver::new(config.image_for(&state), &config);
    let runner = ReleaseRunner::new(&config, &lconfig, &repo, &driver);

    let metadata = runner.publish_artifacts(&github, &gh_repo, config.require_artifact_root()?)?;
    info!(
        "Published {} libraries for release {}",
        metadata.releases.len(),
        metadata.release_id
    );
    Ok(())
}
