//! # Create-Release-Artifacts Command Implementation
//!
//! Runs after the release pull request is merged: for every library
//! carrying the release ID in its commit trailers, builds, tests and
//! packages it into the artifact root and records `release.json`.

use anyhow::Result;
use clap::Args;
use librarian::config::Config;
use librarian::container::DockerDriver;
use librarian::git::Repository;
use librarian::release::ReleaseRunner;
use librarian::state::{load_config, load_state};
use log::info;
use std::path::PathBuf;

use super::{open_language_repo, RepoArgs};

/// Build, test and package the libraries of a release
#[derive(Args, Debug)]
pub struct CreateReleaseArtifactsArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// Release ID from the release commits' trailers
    #[arg(long)]
    pub release_id: String,

    /// Directory receiving one package directory per library and release.json
    #[arg(long, value_name = "DIR")]
    pub artifact_root: PathBuf,
}

/// Execute the `create-release-artifacts` command.
pub fn execute(args: CreateReleaseArtifactsArgs) -> Result<()> {
    let config = Config {
        release_id: Some(args.release_id.clone()),
        artifact_root: Some(args.artifact_root.clone()),
        ..args.repo.config()
    };
    let repo = open_language_repo(&config)?;
    let state = load_state(repo.dir())?;
    let lconfig = load_config(repo.dir())?;
    let driver = DockerDriver::new(config.image_for(&state), &config);
    let runner = ReleaseRunner::new(&config, &lconfig, &repo, &driver);

    let releases = runner.create_artifacts(
        &state,
        config.require_release_id()?,
        config.require_artifact_root()?,
    )?;
    for release in &releases {
        info!("Packaged {} {}", release.library_id, release.version);
    }
    Ok(())
}
