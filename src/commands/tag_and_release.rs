//! # Tag-And-Release Command Implementation
//!
//! For a merged release pull request, creates one tag and GitHub release
//! per library block in the pull request body, at the merge commit.

use anyhow::Result;
use clap::Args;
use librarian::config::Config;
use librarian::github::GhCliClient;
use librarian::release::tag_and_release;
use log::info;

/// Tag and release a merged release pull request
#[derive(Args, Debug)]
pub struct TagAndReleaseArgs {
    /// URL of the merged release pull request
    #[arg(long, value_name = "URL")]
    pub pr: String,

    /// GitHub token for API calls
    #[arg(long, env = "LIBRARIAN_GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
}

impl TagAndReleaseArgs {
    /// Builds the run configuration for this command.
    pub fn config(&self) -> Config {
        Config {
            github_token: self.github_token.clone().filter(|t| !t.is_empty()),
            release_pr_url: Some(self.pr.clone()),
            ..Config::default()
        }
    }
}

/// Execute the `tag-and-release` command.
pub fn execute(args: TagAndReleaseArgs) -> Result<()> {
    let config = args.config();
    let github = GhCliClient::new(config.require_github_token()?);
    let tags = tag_and_release(&github, config.require_release_pr_url()?)?;
    info!("Created {} releases: {}", tags.len(), tags.join(", "));
    Ok(())
}
