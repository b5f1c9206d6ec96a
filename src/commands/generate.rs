//! # Generate Command Implementation
//!
//! Regenerates every library with new API commits and opens one pull
//! request describing the results. With `--api` naming an API that no
//! library tracks (or with no `--repo` at all), runs a raw generation into
//! the work root instead.

use anyhow::{Context, Result};
use clap::Args;
use librarian::batch::{publish, run_batch};
use librarian::container::DockerDriver;
use librarian::error::Error;
use librarian::git::{GitRepository, Repository};
use librarian::github::GitHubClient;
use librarian::pipeline::Pipeline;
use librarian::state::{load_config, load_state, LibrarianConfig};
use log::info;

use super::{github_client, open_language_repo, report, RepoArgs};

/// Regenerate libraries from new API commits
#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// API definitions repository: a local path or a URL to clone
    #[arg(long, env = "LIBRARIAN_API_SOURCE")]
    pub api_source: String,

    /// Only regenerate the library containing this API path
    #[arg(long)]
    pub api: Option<String>,

    /// Only regenerate this library
    #[arg(long)]
    pub library: Option<String>,

    /// Build each library after committing it
    #[arg(long)]
    pub build: bool,
}

/// Execute the `generate` command.
pub fn execute(args: GenerateArgs) -> Result<()> {
    let config = librarian::config::Config {
        api_source: Some(args.api_source.clone()),
        api: args.api.clone(),
        library: args.library.clone(),
        build: args.build,
        ..args.repo.config()
    };

    std::fs::create_dir_all(&config.work_root)?;
    let api_repo = GitRepository::open_or_clone(config.require_api_source()?, &config.work_root)
        .context("opening the API repository")?;

    if config.repo.is_none() {
        let api = config.require_api()?;
        let image = config.image.clone().ok_or_else(|| Error::Config {
            message: "--image is required without --repo".to_string(),
        })?;
        let driver = DockerDriver::new(image, &config);
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&config, &lconfig, &api_repo, &api_repo, &driver);
        let output = pipeline.generate_raw(api)?;
        info!("Raw generation output is in {}", output.display());
        return Ok(());
    }

    let repo = open_language_repo(&config)?;
    let mut state = load_state(repo.dir())?;
    let lconfig = load_config(repo.dir())?;
    let driver = DockerDriver::new(config.image_for(&state), &config);
    let pipeline = Pipeline::new(&config, &lconfig, &repo, &api_repo, &driver);

    if let Some(library) = &config.library {
        if state.find_library(library).is_none() {
            return Err(Error::LibraryNotFound {
                id: library.clone(),
            }
            .into());
        }
    } else if let Some(api) = &config.api {
        if state.find_library_by_api_path(api).is_none() {
            info!("{} is not tracked by any library; generating raw", api);
            let output = pipeline.generate_raw(api)?;
            info!("Raw generation output is in {}", output.display());
            return Ok(());
        }
    }

    let result = run_batch(&pipeline, &repo, &mut state, lconfig.max_pull_request_commits)?;
    let github = github_client(&config)?;
    let publication = publish(
        &config,
        &repo,
        github.as_ref().map(|g| g as &dyn GitHubClient),
        &result,
        "generate",
    )?;
    report(&publication);
    Ok(())
}
