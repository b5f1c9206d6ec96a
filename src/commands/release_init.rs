//! # Release-Init Command Implementation
//!
//! Prepares a release: computes the next version of every library with
//! releasable changes, lets the container update version files and
//! changelogs, and opens a release pull request labelled
//! `do not merge` that carries the release notes.

use anyhow::Result;
use clap::Args;
use librarian::batch::{open_pull_request, timestamp, PullRequestDraft};
use librarian::config::Config;
use librarian::container::DockerDriver;
use librarian::defaults::DO_NOT_MERGE_LABEL;
use librarian::error::Error;
use librarian::git::Repository;
use librarian::github::GitHubClient;
use librarian::pull_request::{
    pull_request_title, render_generation_body, render_release_body, PullRequestContent,
};
use librarian::release::ReleaseRunner;
use librarian::state::{load_config, load_state};
use log::info;

use super::{github_client, open_language_repo, report, RepoArgs};

/// Prepare a release pull request
#[derive(Args, Debug)]
pub struct ReleaseInitArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// Only release this library
    #[arg(long)]
    pub library: Option<String>,

    /// Explicit version for `--library`; must be greater than the current one
    #[arg(long, requires = "library")]
    pub library_version: Option<String>,

    /// Release ID recorded in commits and the pull request; generated when absent
    #[arg(long)]
    pub release_id: Option<String>,
}

/// Execute the `release-init` command.
pub fn execute(args: ReleaseInitArgs) -> Result<()> {
    let config = Config {
        library: args.library.clone(),
        library_version: args.library_version.clone(),
        release_id: args.release_id.clone(),
        ..args.repo.config()
    };
    let release_id = config
        .release_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!("Release ID {}", release_id);

    let repo = open_language_repo(&config)?;
    let mut state = load_state(repo.dir())?;
    let lconfig = load_config(repo.dir())?;
    let driver = DockerDriver::new(config.image_for(&state), &config);
    let runner = ReleaseRunner::new(&config, &lconfig, &repo, &driver);

    let result = runner.release_init(&mut state, &release_id)?;
    if result.notes.is_empty() {
        if result.content.errors.is_empty() {
            info!("No library has releasable changes");
            return Ok(());
        }
        return Err(Error::AllFailed {
            count: result.content.errors.len(),
        }
        .into());
    }

    let mut body = render_release_body(&release_id, &result.notes);
    if !result.content.errors.is_empty() {
        let errors = PullRequestContent {
            successes: Vec::new(),
            errors: result.content.errors.clone(),
        };
        body.push('\n');
        body.push_str(&render_generation_body(&errors, &[]));
    }
    let draft = PullRequestDraft {
        title: pull_request_title("release", &timestamp()),
        body,
        labels: vec![DO_NOT_MERGE_LABEL.to_string()],
    };

    let github = github_client(&config)?;
    let publication = open_pull_request(
        &config,
        &repo,
        github.as_ref().map(|g| g as &dyn GitHubClient),
        draft,
    )?;
    report(&publication);
    Ok(())
}
