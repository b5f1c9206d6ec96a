//! # Merge Gate
//!
//! Before a release pull request is merged, librarian polls it until every
//! precondition holds. Each poll re-fetches the pull request and evaluates
//! the conditions below in order; the first one that does not pass decides
//! the poll's [`GateStatus`]:
//!
//! | Condition                                   | Status    |
//! |---------------------------------------------|-----------|
//! | already merged                              | Aborted   |
//! | closed for longer than one poll interval    | Aborted   |
//! | carries the manual block label              | Waiting   |
//! | lacks the `do not merge` label              | Blocked   |
//! | not mergeable                               | Blocked   |
//! | a non-exempt check is still running         | Waiting   |
//! | a non-exempt check failed                   | Blocked   |
//! | a commit lacks valid release trailers       | Blocked   |
//! | the base branch changed a released library  | Blocked   |
//! | not enough approvals, or changes requested  | Waiting   |
//!
//! `Waiting` sleeps and polls again with no upper bound. `Blocked` comments
//! on the pull request, applies the librarian block label and stops.

use crate::defaults::{
    CONFIG_FILE, DO_NOT_MERGE_LABEL, LIBRARIAN_BLOCK_LABEL, MANUAL_BLOCK_LABEL, STATE_FILE,
};
use crate::error::{Error, Result};
use crate::github::{GitHubClient, PullRequest, PullRequestRef, PullRequestState, Review};
use crate::pull_request::{release_id_from_body, releases_from_commits};
use crate::state::{parse_state, LibrarianConfig};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

/// Reviewer associations whose reviews count.
const QUALIFIED_ASSOCIATIONS: &[&str] = &["OWNER", "MEMBER", "COLLABORATOR"];

/// Check conclusions that count as passing.
const PASSING_CONCLUSIONS: &[&str] = &["success", "neutral", "skipped"];

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStatus {
    Ready,
    Waiting(String),
    Blocked(String),
    Aborted(String),
}

/// Tunables for the gate.
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub poll_interval: Duration,
    pub required_approvals: u32,
    /// Check runs that never hold up a merge.
    pub exempt_checks: Vec<String>,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            poll_interval: crate::defaults::POLL_INTERVAL,
            required_approvals: 1,
            exempt_checks: Vec::new(),
        }
    }
}

/// `required_approvals` from the static configuration at `git_ref`, if the
/// repository sets one. A missing or unreadable document yields `None`.
pub fn configured_approvals(
    github: &dyn GitHubClient,
    pr: &PullRequestRef,
    git_ref: &str,
) -> Option<u32> {
    let content = match github.get_file_contents(&pr.repo, CONFIG_FILE, git_ref) {
        Ok(content) => content,
        Err(e) => {
            debug!("No {} at {}: {}", CONFIG_FILE, git_ref, e);
            return None;
        }
    };
    match serde_yaml::from_str::<LibrarianConfig>(&content) {
        Ok(config) => config.required_approvals,
        Err(e) => {
            warn!("Ignoring unreadable {} at {}: {}", CONFIG_FILE, git_ref, e);
            None
        }
    }
}

pub struct MergeGate<'a> {
    github: &'a dyn GitHubClient,
    pr: PullRequestRef,
    settings: GateSettings,
}

impl<'a> MergeGate<'a> {
    pub fn new(github: &'a dyn GitHubClient, pr: PullRequestRef, settings: GateSettings) -> Self {
        Self {
            github,
            pr,
            settings,
        }
    }

    /// Polls until the pull request is ready, returning its latest metadata.
    pub fn wait_until_ready(&self) -> Result<PullRequest> {
        loop {
            let pr = self
                .github
                .get_pull_request(&self.pr.repo, self.pr.number)?;
            match self.evaluate(&pr)? {
                GateStatus::Ready => {
                    info!("Pull request #{} is ready to merge", pr.number);
                    return Ok(pr);
                }
                GateStatus::Waiting(reason) => {
                    info!("Waiting on pull request #{}: {}", pr.number, reason);
                    thread::sleep(self.settings.poll_interval);
                }
                GateStatus::Blocked(reason) => {
                    warn!("Pull request #{} is blocked: {}", pr.number, reason);
                    self.report_block(&reason)?;
                    return Err(Error::MergeBlocked {
                        number: pr.number,
                        reason,
                    });
                }
                GateStatus::Aborted(reason) => {
                    return Err(Error::MergeAborted {
                        number: pr.number,
                        reason,
                    });
                }
            }
        }
    }

    /// Removes the do-not-merge label and merges with rebase. Returns the
    /// merge commit SHA.
    pub fn merge(&self, pr: &PullRequest) -> Result<String> {
        self.github
            .remove_label(&self.pr.repo, pr.number, DO_NOT_MERGE_LABEL)?;
        let sha = self
            .github
            .merge_pull_request(&self.pr.repo, pr.number, &pr.head_sha)?;
        info!("Merged pull request #{} as {}", pr.number, sha);
        Ok(sha)
    }

    fn report_block(&self, reason: &str) -> Result<()> {
        let comment = format!(
            "Librarian will not merge this pull request: {}\n\n\
             Resolve the problem, remove the `{}` label and run the merge again.",
            reason, LIBRARIAN_BLOCK_LABEL
        );
        self.github
            .add_comment(&self.pr.repo, self.pr.number, &comment)?;
        self.github
            .add_labels(&self.pr.repo, self.pr.number, &[LIBRARIAN_BLOCK_LABEL])
    }

    /// Evaluates every condition against one snapshot of the pull request.
    pub fn evaluate(&self, pr: &PullRequest) -> Result<GateStatus> {
        if pr.merged {
            return Ok(GateStatus::Aborted("already merged".to_string()));
        }
        if pr.state == PullRequestState::Closed {
            let grace = chrono::Duration::from_std(self.settings.poll_interval)
                .unwrap_or_else(|_| chrono::Duration::zero());
            let closed_long_ago = pr
                .closed_at
                .map_or(true, |closed| chrono::Utc::now() - closed >= grace);
            if closed_long_ago {
                return Ok(GateStatus::Aborted("closed without merging".to_string()));
            }
            return Ok(GateStatus::Waiting("recently closed".to_string()));
        }
        if pr.has_label(MANUAL_BLOCK_LABEL) {
            return Ok(GateStatus::Waiting(format!(
                "labelled '{}'",
                MANUAL_BLOCK_LABEL
            )));
        }
        if !pr.has_label(DO_NOT_MERGE_LABEL) {
            return Ok(GateStatus::Blocked(format!(
                "the '{}' label is missing",
                DO_NOT_MERGE_LABEL
            )));
        }
        match pr.mergeable {
            None => return Ok(GateStatus::Waiting("mergeability unknown".to_string())),
            Some(false) => {
                return Ok(GateStatus::Blocked(format!(
                    "not mergeable ({})",
                    pr.mergeable_state
                )))
            }
            Some(true) if pr.mergeable_state == "dirty" => {
                return Ok(GateStatus::Blocked("merge conflicts".to_string()))
            }
            Some(true) => {}
        }

        if let Some(status) = self.check_runs(pr)? {
            return Ok(status);
        }
        if let Some(status) = self.release_commits(pr)? {
            return Ok(status);
        }
        if let Some(status) = self.reviews()? {
            return Ok(status);
        }
        Ok(GateStatus::Ready)
    }

    fn check_runs(&self, pr: &PullRequest) -> Result<Option<GateStatus>> {
        let runs = self.github.get_check_runs(&self.pr.repo, &pr.head_sha)?;
        let relevant: Vec<_> = runs
            .iter()
            .filter(|r| !self.settings.exempt_checks.contains(&r.name))
            .collect();
        if let Some(run) = relevant.iter().find(|r| r.status != "completed") {
            return Ok(Some(GateStatus::Waiting(format!(
                "check '{}' is {}",
                run.name, run.status
            ))));
        }
        if let Some(run) = relevant.iter().find(|r| {
            !r.conclusion
                .as_deref()
                .is_some_and(|c| PASSING_CONCLUSIONS.contains(&c))
        }) {
            return Ok(Some(GateStatus::Blocked(format!(
                "check '{}' concluded {}",
                run.name,
                run.conclusion.as_deref().unwrap_or("without a result")
            ))));
        }
        Ok(None)
    }

    /// Validates release trailers and looks for base-branch changes to the
    /// released libraries since the pull request's baseline.
    fn release_commits(&self, pr: &PullRequest) -> Result<Option<GateStatus>> {
        let Some(release_id) = release_id_from_body(&pr.body) else {
            return Ok(Some(GateStatus::Blocked(
                "the description has no release ID".to_string(),
            )));
        };
        let commits = self
            .github
            .get_pull_request_commits(&self.pr.repo, self.pr.number)?;
        let releases = match releases_from_commits(&commits, &release_id) {
            Ok(releases) => releases,
            Err(e) => return Ok(Some(GateStatus::Blocked(e.to_string()))),
        };
        if releases.len() != commits.len() {
            return Ok(Some(GateStatus::Blocked(format!(
                "{} of {} commits do not belong to release {}",
                commits.len() - releases.len(),
                commits.len(),
                release_id
            ))));
        }

        let state_yaml = self
            .github
            .get_file_contents(&self.pr.repo, STATE_FILE, &pr.head_sha)?;
        let state = parse_state(&state_yaml)?;
        let intervening = self
            .github
            .compare_commits(&self.pr.repo, &pr.base_sha, &pr.base_ref)?;
        debug!("{} base commits since the baseline", intervening.len());

        for sha in &intervening {
            let files = self.github.get_commit_files(&self.pr.repo, sha)?;
            for release in &releases {
                let Some(library) = state.find_library(&release.library_id) else {
                    continue;
                };
                let touched = files.iter().any(|file| {
                    library
                        .source_roots
                        .iter()
                        .any(|root| file == root || file.starts_with(&format!("{}/", root)))
                });
                if touched {
                    return Ok(Some(GateStatus::Blocked(format!(
                        "commit {} on {} changed {} after the release was prepared",
                        sha, pr.base_ref, release.library_id
                    ))));
                }
            }
        }
        Ok(None)
    }

    fn reviews(&self) -> Result<Option<GateStatus>> {
        let reviews = self.github.get_reviews(&self.pr.repo, self.pr.number)?;
        let latest = latest_qualified_reviews(&reviews);
        if latest.values().any(|state| *state == "CHANGES_REQUESTED") {
            return Ok(Some(GateStatus::Waiting("changes requested".to_string())));
        }
        let approvals = latest.values().filter(|state| **state == "APPROVED").count() as u32;
        if approvals < self.settings.required_approvals {
            return Ok(Some(GateStatus::Waiting(format!(
                "{} of {} required approvals",
                approvals, self.settings.required_approvals
            ))));
        }
        Ok(None)
    }
}

/// Each qualified reviewer's latest decisive review state.
fn latest_qualified_reviews(reviews: &[Review]) -> HashMap<&str, &str> {
    let mut latest = HashMap::new();
    for review in reviews {
        if !QUALIFIED_ASSOCIATIONS.contains(&review.author_association.as_str()) {
            continue;
        }
        let Some(user) = &review.user else {
            continue;
        };
        // comments don't change a reviewer's decision
        if review.state == "COMMENTED" {
            continue;
        }
        latest.insert(user.login.as_str(), review.state.as_str());
    }
    latest
}
