//! # GitHub Access
//!
//! Defines the [`GitHubClient`] trait used for pull request, label, review,
//! check-run and release operations, and [`GhCliClient`], the production
//! implementation that shells out to `gh api`. The write token is handed to
//! `gh` through `GH_TOKEN` and never placed on the command line.

use crate::error::{Error, Result};
use crate::git::Commit;
use chrono::{DateTime, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::process::Command;
use url::Url;

/// Owner and name of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRepo {
    pub owner: String,
    pub name: String,
}

impl GitHubRepo {
    /// Parses `https://github.com/o/r(.git)` and `git@github.com:o/r(.git)` remotes.
    pub fn from_remote_url(remote: &str) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidUrl {
            url: remote.to_string(),
            message: message.to_string(),
        };
        let path = if let Some(rest) = remote.strip_prefix("git@github.com:") {
            rest.to_string()
        } else {
            let url = Url::parse(remote)?;
            if url.host_str() != Some("github.com") {
                return Err(invalid("not a github.com remote"));
            }
            url.path().trim_start_matches('/').to_string()
        };
        let mut parts = path.trim_end_matches('/').trim_end_matches(".git").split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(invalid("expected <owner>/<repo>")),
        }
    }

    fn api_path(&self, rest: &str) -> String {
        format!("repos/{}/{}/{}", self.owner, self.name, rest)
    }
}

/// A pull request identified by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    pub repo: GitHubRepo,
    pub number: u64,
}

impl PullRequestRef {
    /// Parses `https://github.com/<owner>/<repo>/pull/<number>`.
    pub fn parse(pr_url: &str) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidUrl {
            url: pr_url.to_string(),
            message: message.to_string(),
        };
        let url = Url::parse(pr_url).map_err(|e| invalid(&e.to_string()))?;
        if url.host_str() != Some("github.com") {
            return Err(invalid("not a github.com URL"));
        }
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            [owner, name, "pull", number] => {
                let number = number
                    .parse::<u64>()
                    .map_err(|_| invalid("pull request number is not numeric"))?;
                Ok(Self {
                    repo: GitHubRepo {
                        owner: owner.to_string(),
                        name: name.to_string(),
                    },
                    number,
                })
            }
            _ => Err(invalid("expected https://github.com/<owner>/<repo>/pull/<number>")),
        }
    }
}

/// Pull request state as reported by the REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
}

/// The pull request fields the orchestrator inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: PullRequestState,
    pub merged: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    /// `None` while GitHub is still computing mergeability.
    pub mergeable: Option<bool>,
    pub mergeable_state: String,
    pub head_sha: String,
    pub base_ref: String,
    pub base_sha: String,
    pub merge_commit_sha: Option<String>,
}

impl PullRequest {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// A pull request review.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub user: Option<User>,
    /// `APPROVED`, `CHANGES_REQUESTED`, `COMMENTED`, `DISMISSED`...
    pub state: String,
    /// `OWNER`, `MEMBER`, `COLLABORATOR`, `CONTRIBUTOR`...
    #[serde(default)]
    pub author_association: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub login: String,
}

/// A check run on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckRun {
    pub name: String,
    /// `queued`, `in_progress` or `completed`.
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
}

/// A pull request that was just created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedPullRequest {
    pub number: u64,
    pub html_url: String,
}

/// Operations against the GitHub API.
pub trait GitHubClient {
    fn create_pull_request(
        &self,
        repo: &GitHubRepo,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedPullRequest>;

    fn add_labels(&self, repo: &GitHubRepo, number: u64, labels: &[&str]) -> Result<()>;

    fn remove_label(&self, repo: &GitHubRepo, number: u64, label: &str) -> Result<()>;

    fn add_comment(&self, repo: &GitHubRepo, number: u64, body: &str) -> Result<()>;

    fn get_pull_request(&self, repo: &GitHubRepo, number: u64) -> Result<PullRequest>;

    fn get_reviews(&self, repo: &GitHubRepo, number: u64) -> Result<Vec<Review>>;

    fn get_check_runs(&self, repo: &GitHubRepo, sha: &str) -> Result<Vec<CheckRun>>;

    /// Commits of a pull request with their full messages, oldest first.
    fn get_pull_request_commits(&self, repo: &GitHubRepo, number: u64) -> Result<Vec<Commit>>;

    /// Hashes of commits reachable from `head` but not from `base`, oldest first.
    fn compare_commits(&self, repo: &GitHubRepo, base: &str, head: &str) -> Result<Vec<String>>;

    /// Paths changed by a single commit.
    fn get_commit_files(&self, repo: &GitHubRepo, sha: &str) -> Result<Vec<String>>;

    /// Raw file contents at a ref.
    fn get_file_contents(&self, repo: &GitHubRepo, path: &str, git_ref: &str) -> Result<String>;

    /// Rebase-merges a pull request whose head is `sha`. Returns the merge commit hash.
    fn merge_pull_request(&self, repo: &GitHubRepo, number: u64, sha: &str) -> Result<String>;

    fn create_release(
        &self,
        repo: &GitHubRepo,
        tag: &str,
        commitish: &str,
        title: &str,
        notes: &str,
    ) -> Result<()>;
}

/// Production [`GitHubClient`] implementation that shells out to `gh api`.
#[derive(Debug, Clone)]
pub struct GhCliClient {
    token: String,
}

impl GhCliClient {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }

    fn api(&self, operation: &str, args: &[String]) -> Result<String> {
        debug!("gh api {}", args.join(" "));
        let output = Command::new("gh")
            .arg("api")
            .args(args)
            .env("GH_TOKEN", &self.token)
            .output()
            .map_err(|e| Error::GitHub {
                operation: operation.to_string(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::GitHub {
                operation: operation.to_string(),
                message: stderr.trim().replace(&self.token, "***"),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn api_json<T: DeserializeOwned>(&self, operation: &str, args: &[String]) -> Result<T> {
        let output = self.api(operation, args)?;
        serde_json::from_str(&output).map_err(|e| Error::GitHub {
            operation: operation.to_string(),
            message: format!("unexpected response: {}", e),
        })
    }

    /// `gh api --paginate` prints one JSON array per page back to back.
    fn api_paginated<T: DeserializeOwned>(&self, operation: &str, path: String) -> Result<Vec<T>> {
        let output = self.api(operation, &["--paginate".to_string(), path])?;
        let mut items = Vec::new();
        for page in serde_json::Deserializer::from_str(&output).into_iter::<Vec<T>>() {
            let page = page.map_err(|e| Error::GitHub {
                operation: operation.to_string(),
                message: format!("unexpected response: {}", e),
            })?;
            items.extend(page);
        }
        Ok(items)
    }
}

fn field(name: &str, value: &str) -> [String; 2] {
    ["-f".to_string(), format!("{}={}", name, value)]
}

fn method(verb: &str) -> [String; 2] {
    ["-X".to_string(), verb.to_string()]
}

#[derive(Deserialize)]
struct WirePullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: PullRequestState,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: Vec<WireLabel>,
    #[serde(default)]
    mergeable: Option<bool>,
    #[serde(default)]
    mergeable_state: Option<String>,
    head: WireRef,
    base: WireRef,
    #[serde(default)]
    merge_commit_sha: Option<String>,
}

#[derive(Deserialize)]
struct WireLabel {
    name: String,
}

#[derive(Deserialize)]
struct WireRef {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

#[derive(Deserialize)]
struct WireCommit {
    sha: String,
    commit: WireCommitDetail,
}

#[derive(Deserialize)]
struct WireCommitDetail {
    message: String,
}

#[derive(Deserialize)]
struct WireCommitWithFiles {
    #[serde(default)]
    files: Vec<WireFile>,
}

#[derive(Deserialize)]
struct WireFile {
    filename: String,
}

#[derive(Deserialize)]
struct WireComparison {
    #[serde(default)]
    commits: Vec<WireSha>,
}

#[derive(Deserialize)]
struct WireSha {
    sha: String,
}

#[derive(Deserialize)]
struct WireCheckRuns {
    #[serde(default)]
    check_runs: Vec<CheckRun>,
}

#[derive(Deserialize)]
struct WireMerge {
    sha: String,
}

impl From<WirePullRequest> for PullRequest {
    fn from(wire: WirePullRequest) -> Self {
        Self {
            number: wire.number,
            title: wire.title,
            body: wire.body.unwrap_or_default(),
            state: wire.state,
            merged: wire.merged,
            closed_at: wire.closed_at,
            labels: wire.labels.into_iter().map(|l| l.name).collect(),
            mergeable: wire.mergeable,
            mergeable_state: wire.mergeable_state.unwrap_or_default(),
            head_sha: wire.head.sha,
            base_ref: wire.base.git_ref,
            base_sha: wire.base.sha,
            merge_commit_sha: wire.merge_commit_sha,
        }
    }
}

impl GitHubClient for GhCliClient {
    fn create_pull_request(
        &self,
        repo: &GitHubRepo,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedPullRequest> {
        let mut args = vec![repo.api_path("pulls")];
        args.extend(method("POST"));
        args.extend(field("title", title));
        args.extend(field("head", head));
        args.extend(field("base", base));
        args.extend(field("body", body));
        self.api_json("create pull request", &args)
    }

    fn add_labels(&self, repo: &GitHubRepo, number: u64, labels: &[&str]) -> Result<()> {
        let mut args = vec![repo.api_path(&format!("issues/{}/labels", number))];
        args.extend(method("POST"));
        for label in labels {
            args.extend(field("labels[]", label));
        }
        self.api("add labels", &args)?;
        Ok(())
    }

    fn remove_label(&self, repo: &GitHubRepo, number: u64, label: &str) -> Result<()> {
        let mut args = vec![repo.api_path(&format!(
            "issues/{}/labels/{}",
            number,
            label.replace(' ', "%20")
        ))];
        args.extend(method("DELETE"));
        self.api("remove label", &args)?;
        Ok(())
    }

    fn add_comment(&self, repo: &GitHubRepo, number: u64, body: &str) -> Result<()> {
        let mut args = vec![repo.api_path(&format!("issues/{}/comments", number))];
        args.extend(method("POST"));
        args.extend(field("body", body));
        self.api("add comment", &args)?;
        Ok(())
    }

    fn get_pull_request(&self, repo: &GitHubRepo, number: u64) -> Result<PullRequest> {
        let wire: WirePullRequest = self.api_json(
            "get pull request",
            &[repo.api_path(&format!("pulls/{}", number))],
        )?;
        Ok(wire.into())
    }

    fn get_reviews(&self, repo: &GitHubRepo, number: u64) -> Result<Vec<Review>> {
        self.api_paginated("get reviews", repo.api_path(&format!("pulls/{}/reviews", number)))
    }

    fn get_check_runs(&self, repo: &GitHubRepo, sha: &str) -> Result<Vec<CheckRun>> {
        let wire: WireCheckRuns = self.api_json(
            "get check runs",
            &[repo.api_path(&format!("commits/{}/check-runs?per_page=100", sha))],
        )?;
        Ok(wire.check_runs)
    }

    fn get_pull_request_commits(&self, repo: &GitHubRepo, number: u64) -> Result<Vec<Commit>> {
        let wire: Vec<WireCommit> = self.api_paginated(
            "get pull request commits",
            repo.api_path(&format!("pulls/{}/commits", number)),
        )?;
        Ok(wire
            .into_iter()
            .map(|c| Commit {
                hash: c.sha,
                message: c.commit.message,
            })
            .collect())
    }

    fn compare_commits(&self, repo: &GitHubRepo, base: &str, head: &str) -> Result<Vec<String>> {
        let wire: WireComparison = self.api_json(
            "compare commits",
            &[repo.api_path(&format!("compare/{}...{}", base, head))],
        )?;
        Ok(wire.commits.into_iter().map(|c| c.sha).collect())
    }

    fn get_commit_files(&self, repo: &GitHubRepo, sha: &str) -> Result<Vec<String>> {
        let wire: WireCommitWithFiles =
            self.api_json("get commit", &[repo.api_path(&format!("commits/{}", sha))])?;
        Ok(wire.files.into_iter().map(|f| f.filename).collect())
    }

    fn get_file_contents(&self, repo: &GitHubRepo, path: &str, git_ref: &str) -> Result<String> {
        self.api(
            "get file contents",
            &[
                "-H".to_string(),
                "Accept: application/vnd.github.raw+json".to_string(),
                repo.api_path(&format!("contents/{}?ref={}", path, git_ref)),
            ],
        )
    }

    fn merge_pull_request(&self, repo: &GitHubRepo, number: u64, sha: &str) -> Result<String> {
        let mut args = vec![repo.api_path(&format!("pulls/{}/merge", number))];
        args.extend(method("PUT"));
        args.extend(field("merge_method", "rebase"));
        args.extend(field("sha", sha));
        let wire: WireMerge = self.api_json("merge pull request", &args)?;
        Ok(wire.sha)
    }

    fn create_release(
        &self,
        repo: &GitHubRepo,
        tag: &str,
        commitish: &str,
        title: &str,
        notes: &str,
    ) -> Result<()> {
        let mut args = vec![repo.api_path("releases")];
        args.extend(method("POST"));
        args.extend(field("tag_name", tag));
        args.extend(field("target_commitish", commitish));
        args.extend(field("name", title));
        args.extend(field("body", notes));
        self.api("create release", &args)?;
        Ok(())
    }
}
