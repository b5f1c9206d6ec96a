//! # Configure Command Implementation
//!
//! Onboards one API as a new library: the container derives its state,
//! librarian generates it and opens a pull request with the single
//! `feat: Configure new library` commit.

use anyhow::{Context, Result};
use clap::Args;
use librarian::batch::publish;
use librarian::config::Config;
use librarian::configure::configure_api;
use librarian::container::DockerDriver;
use librarian::git::{GitRepository, Repository};
use librarian::github::GitHubClient;
use librarian::state::{load_config, load_state};

use super::{github_client, open_language_repo, report, RepoArgs};

/// Onboard a new API as a library
#[derive(Args, Debug)]
pub struct ConfigureArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// API definitions repository: a local path or a URL to clone
    #[arg(long, env = "LIBRARIAN_API_SOURCE")]
    pub api_source: String,

    /// Path of the API to onboard, e.g. google/cloud/secretmanager/v1
    #[arg(long)]
    pub api: String,

    /// Repository language; defaults to the one in .librarian/config.yaml
    #[arg(long)]
    pub language: Option<String>,

    /// Build the new library after committing it
    #[arg(long)]
    pub build: bool,
}

/// Execute the `configure` command.
pub fn execute(args: ConfigureArgs) -> Result<()> {
    let config = Config {
        api_source: Some(args.api_source.clone()),
        api: Some(args.api.clone()),
        language: args.language.clone(),
        build: args.build,
        ..args.repo.config()
    };

    let repo = open_language_repo(&config)?;
    let api_repo = GitRepository::open_or_clone(config.require_api_source()?, &config.work_root)
        .context("opening the API repository")?;
    let mut state = load_state(repo.dir())?;
    let lconfig = load_config(repo.dir())?;
    let driver = DockerDriver::new(config.image_for(&state), &config);

    let result = configure_api(
        &config,
        &lconfig,
        &repo,
        &api_repo,
        &driver,
        &mut state,
        config.require_api()?,
    )?;

    let github = github_client(&config)?;
    let publication = publish(
        &config,
        &repo,
        github.as_ref().map(|g| g as &dyn GitHubClient),
        &result,
        "configure",
    )?;
    report(&publication);
    Ok(())
}
