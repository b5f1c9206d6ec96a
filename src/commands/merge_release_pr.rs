//! # Merge-Release-PR Command Implementation
//!
//! Polls a release pull request until every merge condition holds, merges
//! it, writes the merge commit SHA to the environment file, and optionally
//! waits until the merge commit has been mirrored.

use anyhow::Result;
use clap::Args;
use librarian::config::Config;
use librarian::defaults::{MERGE_COMMIT_ENV_KEY, POLL_INTERVAL};
use librarian::github::{GhCliClient, GitHubClient, PullRequestRef};
use librarian::merge_gate::{configured_approvals, GateSettings, MergeGate};
use librarian::output;
use librarian::sync_wait::SyncWaiter;
use std::path::PathBuf;
use std::time::Duration;

/// Merge a release pull request once it is ready
#[derive(Args, Debug)]
pub struct MergeReleasePrArgs {
    /// URL of the release pull request
    #[arg(long, value_name = "URL")]
    pub pr: String,

    /// GitHub token for API calls
    #[arg(long, env = "LIBRARIAN_GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Seconds between polls
    #[arg(long, value_name = "SECONDS", default_value_t = POLL_INTERVAL.as_secs())]
    pub poll_interval: u64,

    /// Approvals required from repository members; defaults to the base
    /// branch's .librarian/config.yaml, then 1
    #[arg(long)]
    pub required_approvals: Option<u32>,

    /// Check run that never holds up the merge (repeatable)
    #[arg(long = "exempt-check", value_name = "NAME")]
    pub exempt_checks: Vec<String>,

    /// File to append `MERGE_COMMIT_SHA=<sha>` to
    #[arg(long, env = "LIBRARIAN_ENV_FILE")]
    pub env_file: Option<PathBuf>,

    /// After merging, poll `<prefix><sha>` until it returns 200
    #[arg(long, value_name = "URL")]
    pub sync_url_prefix: Option<String>,

    /// Bearer token for the sync check
    #[arg(long, env = "LIBRARIAN_SYNC_AUTH_TOKEN", hide_env_values = true)]
    pub sync_auth_token: Option<String>,
}

impl MergeReleasePrArgs {
    /// Builds the run configuration for this command.
    pub fn config(&self) -> Config {
        Config {
            github_token: self.github_token.clone().filter(|t| !t.is_empty()),
            release_pr_url: Some(self.pr.clone()),
            poll_interval: Duration::from_secs(self.poll_interval),
            required_approvals: self.required_approvals,
            exempt_checks: self.exempt_checks.clone(),
            env_file: self.env_file.clone(),
            sync_url_prefix: self.sync_url_prefix.clone(),
            sync_auth_token: self.sync_auth_token.clone().filter(|t| !t.is_empty()),
            ..Config::default()
        }
    }
}

/// Execute the `merge-release-pr` command.
pub fn execute(args: MergeReleasePrArgs) -> Result<()> {
    let config = args.config();
    let github = GhCliClient::new(config.require_github_token()?);
    let pr_ref = PullRequestRef::parse(config.require_release_pr_url()?)?;

    let required_approvals = match config.required_approvals {
        Some(count) => count,
        None => {
            let pr = github.get_pull_request(&pr_ref.repo, pr_ref.number)?;
            configured_approvals(&github, &pr_ref, &pr.base_ref).unwrap_or(1)
        }
    };
    let settings = GateSettings {
        poll_interval: config.poll_interval,
        required_approvals,
        exempt_checks: config.exempt_checks.clone(),
    };
    let gate = MergeGate::new(&github, pr_ref, settings);
    let pr = gate.wait_until_ready()?;
    let sha = gate.merge(&pr)?;

    output::emit(config.env_file.as_deref(), MERGE_COMMIT_ENV_KEY, &sha)?;

    if let Some(prefix) = &config.sync_url_prefix {
        SyncWaiter::new(prefix, config.sync_auth_token.clone(), config.poll_interval)
            .wait_for(&sha)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;
    use std::env;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: MergeReleasePrArgs,
    }

    const PR: &str = "https://github.com/googleapis/google-cloud-python/pull/42";

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["librarian", "--pr", PR];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).unwrap().args.config()
    }

    #[test]
    #[serial]
    fn test_config_from_flags() {
        env::remove_var("LIBRARIAN_SYNC_AUTH_TOKEN");
        let config = parse(&[
            "--github-token",
            "ghp_x",
            "--poll-interval",
            "5",
            "--required-approvals",
            "2",
            "--exempt-check",
            "cla/google",
            "--env-file",
            "/tmp/env",
            "--sync-url-prefix",
            "https://mirror.example.com/sha/",
        ]);
        assert_eq!(config.require_github_token().unwrap(), "ghp_x");
        assert_eq!(config.require_release_pr_url().unwrap(), PR);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.required_approvals, Some(2));
        assert_eq!(config.exempt_checks, vec!["cla/google"]);
        assert_eq!(config.env_file, Some(PathBuf::from("/tmp/env")));
        assert_eq!(
            config.sync_url_prefix.as_deref(),
            Some("https://mirror.example.com/sha/")
        );
        assert_eq!(config.sync_auth_token, None);
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        env::remove_var("LIBRARIAN_GITHUB_TOKEN");
        env::remove_var("LIBRARIAN_ENV_FILE");
        let config = parse(&[]);
        assert_eq!(config.poll_interval, POLL_INTERVAL);
        assert_eq!(config.required_approvals, None);
        assert!(config.exempt_checks.is_empty());
        assert!(config.require_github_token().is_err());
    }

    #[test]
    #[serial]
    fn test_sync_token_from_environment() {
        env::set_var("LIBRARIAN_SYNC_AUTH_TOKEN", "bearer");
        let config = parse(&[]);
        env::remove_var("LIBRARIAN_SYNC_AUTH_TOKEN");
        assert_eq!(config.sync_auth_token.as_deref(), Some("bearer"));
    }
}
