//! # Batch Orchestration
//!
//! [`run_batch`] drives the [`Pipeline`] over every library in declaration
//! order and accumulates the outcomes into a [`PullRequestContent`]. The
//! commit cap is applied once, after the loop, because trimming relies on
//! the full ordered list of successes: the tail beyond the cap is reverted
//! from the repository and reported separately.
//!
//! [`publish`] then decides what the run produced: nothing, an error, a
//! logged description (when not pushing), or a pull request.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::git::Repository;
use crate::github::{CreatedPullRequest, GitHubClient, GitHubRepo};
use crate::pipeline::{Outcome, Pipeline, Trigger};
use crate::pull_request::{pull_request_title, render_generation_body, PullRequestContent};
use crate::state::{LibrarianState, LibraryState};
use log::info;

/// Result of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Successes within the cap, and every error.
    pub content: PullRequestContent,
    /// Successes beyond the cap; their commits have been reverted.
    pub excess: Vec<String>,
}

impl BatchResult {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.excess.is_empty()
    }
}

/// Runs the pipeline for every library in `state`.
///
/// Batch-fatal errors are returned immediately, without a result for the
/// libraries not yet processed.
pub fn run_batch(
    pipeline: &Pipeline<'_>,
    repo: &dyn Repository,
    state: &mut LibrarianState,
    max_commits: usize,
) -> Result<BatchResult> {
    let ids: Vec<String> = state.libraries.iter().map(|l| l.id.clone()).collect();
    let mut content = PullRequestContent::new();
    // libraries as they were before their commit, in commit order
    let mut committed: Vec<LibraryState> = Vec::new();

    for id in &ids {
        let previous = state.find_library(id).cloned();
        match pipeline.run(state, id, Trigger::Regenerate)? {
            Outcome::Skipped(_) => {}
            Outcome::Committed { summary, .. } => {
                content.add_success(summary);
                committed.extend(previous);
            }
            Outcome::Reverted { summary, .. } => content.add_error(summary),
        }
    }

    let excess = content.split_at_cap(max_commits);
    if !excess.is_empty() {
        info!(
            "{} commits exceed the limit of {}; reverting them",
            excess.len(),
            max_commits
        );
        repo.revert_commits(excess.len())?;
        for previous in committed.into_iter().skip(max_commits) {
            if let Some(library) = state.find_library_mut(&previous.id) {
                *library = previous;
            }
        }
    }

    Ok(BatchResult { content, excess })
}

/// A pull request about to be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// How a run's results were published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    /// There was nothing to report.
    Nothing,
    /// Pushing was not requested; the description was logged.
    Logged(PullRequestDraft),
    Created(CreatedPullRequest),
}

/// Publishes a generation batch.
pub fn publish(
    config: &Config,
    repo: &dyn Repository,
    github: Option<&dyn GitHubClient>,
    result: &BatchResult,
    action: &str,
) -> Result<Publication> {
    if result.is_empty() {
        info!("No libraries changed; nothing to report");
        return Ok(Publication::Nothing);
    }
    if result.content.successes.is_empty() && result.excess.is_empty() {
        return Err(Error::AllFailed {
            count: result.content.errors.len(),
        });
    }
    let draft = PullRequestDraft {
        title: pull_request_title(action, &timestamp()),
        body: render_generation_body(&result.content, &result.excess),
        labels: Vec::new(),
    };
    open_pull_request(config, repo, github, draft)
}

/// Pushes HEAD to a new branch and opens a pull request against the base
/// branch, or only logs the draft when pushing is disabled.
pub fn open_pull_request(
    config: &Config,
    repo: &dyn Repository,
    github: Option<&dyn GitHubClient>,
    draft: PullRequestDraft,
) -> Result<Publication> {
    if !config.push {
        info!("Push not requested; pull request would be:");
        info!("Title: {}", draft.title);
        info!("Body:\n{}", draft.body);
        return Ok(Publication::Logged(draft));
    }
    let github = github.ok_or_else(|| Error::Config {
        message: "a GitHub client is required to open a pull request".to_string(),
    })?;

    let branch = format!("librarian-{}", timestamp().to_lowercase());
    repo.create_branch(&branch)?;
    repo.push(&branch)?;

    let gh_repo = GitHubRepo::from_remote_url(&repo.remote_url("origin")?)?;
    let created =
        github.create_pull_request(&gh_repo, &branch, &config.branch, &draft.title, &draft.body)?;
    if !draft.labels.is_empty() {
        let labels: Vec<&str> = draft.labels.iter().map(String::as_str).collect();
        github.add_labels(&gh_repo, created.number, &labels)?;
    }
    info!("Created pull request {}", created.html_url);
    Ok(Publication::Created(created))
}

/// UTC timestamp used in pull request titles and branch names.
pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::FakeContainer;
    use crate::git::testing::FakeRepository;
    use crate::git::Commit;
    use crate::github::testing::FakeGitHub;
    use crate::state::{Api, LibrarianConfig, LibraryState};
    use std::fs;
    use tempfile::TempDir;

    fn library(id: &str) -> LibraryState {
        LibraryState {
            id: id.to_string(),
            apis: vec![Api {
                path: format!("google/{}/v1", id),
                ..Api::default()
            }],
            source_roots: vec![format!("packages/{}", id)],
            last_generated_commit: "old".to_string(),
            ..LibraryState::default()
        }
    }

    struct Fixture {
        _temp: TempDir,
        config: Config,
        repo: FakeRepository,
        api_repo: FakeRepository,
        state: LibrarianState,
    }

    fn fixture(ids: &[&str]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let repo_dir = temp.path().join("repo");
        fs::create_dir_all(&repo_dir).unwrap();
        let api_repo = FakeRepository::new(temp.path()).with_path_commits(vec![
            Commit {
                hash: "new".to_string(),
                message: "feat: something".to_string(),
            },
            Commit {
                hash: "old".to_string(),
                message: "feat: before".to_string(),
            },
        ]);
        Fixture {
            config: Config {
                work_root: temp.path().join("work"),
                build: true,
                ..Config::default()
            },
            repo: FakeRepository::new(&repo_dir),
            api_repo,
            state: LibrarianState {
                image: "img:1".to_string(),
                libraries: ids.iter().map(|id| library(id)).collect(),
            },
            _temp: temp,
        }
    }

    fn run(f: &mut Fixture, container: &FakeContainer, cap: usize) -> BatchResult {
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, container);
        run_batch(&pipeline, &f.repo, &mut f.state, cap).unwrap()
    }

    #[test]
    fn test_partial_failure_is_recorded() {
        let mut f = fixture(&["a", "b", "c"]);
        let container = FakeContainer::new().failing("build", "b");
        let result = run(&mut f, &container, 0);

        assert_eq!(
            result.content.successes,
            vec!["Regenerated a from 1 API commit(s)", "Regenerated c from 1 API commit(s)"]
        );
        assert_eq!(result.content.errors, vec!["Error while building b"]);
        assert_eq!(f.repo.commit_messages().len(), 2);
    }

    #[test]
    fn test_commit_cap_reverts_excess() {
        let mut f = fixture(&["a", "b", "c", "d"]);
        let result = run(&mut f, &FakeContainer::new(), 2);

        assert_eq!(result.content.successes.len(), 2);
        assert_eq!(result.excess.len(), 2);
        assert_eq!(f.repo.commit_messages().len(), 2);
        assert!(f.repo.calls().contains(&"revert 2".to_string()));
        assert_eq!(f.state.libraries[1].last_generated_commit, "new");
        assert_eq!(f.state.libraries[2].last_generated_commit, "old");
        assert_eq!(f.state.libraries[3].last_generated_commit, "old");
    }

    #[test]
    fn test_cap_property_over_all_sizes() {
        for n in 0..5 {
            for cap in 1..=n {
                let ids: Vec<String> = (0..n).map(|i| format!("lib{}", i)).collect();
                let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
                let mut f = fixture(&refs);
                let result = run(&mut f, &FakeContainer::new(), cap);
                assert_eq!(f.repo.commit_messages().len(), cap);
                assert_eq!(result.content.successes.len(), cap);
                assert_eq!(result.excess.len(), n - cap);
            }
        }
    }

    #[test]
    fn test_cap_counts_only_successes() {
        let mut f = fixture(&["a", "b", "c", "d", "e"]);
        let container = FakeContainer::new().failing("build", "b");
        let result = run(&mut f, &container, 2);

        assert_eq!(
            result.content.successes,
            vec!["Regenerated a from 1 API commit(s)", "Regenerated c from 1 API commit(s)"]
        );
        assert_eq!(
            result.excess,
            vec!["Regenerated d from 1 API commit(s)", "Regenerated e from 1 API commit(s)"]
        );
        assert_eq!(result.content.errors, vec!["Error while building b"]);
        assert_eq!(f.repo.commit_messages().len(), 2);
        let calls = f.repo.calls();
        assert!(calls.contains(&"revert 1".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("revert 2"));

        let last: Vec<&str> = f
            .state
            .libraries
            .iter()
            .map(|l| l.last_generated_commit.as_str())
            .collect();
        assert_eq!(last, vec!["new", "old", "new", "old", "old"]);
    }

    #[test]
    fn test_batch_fatal_aborts() {
        let mut f = fixture(&["a", "b"]);
        let lconfig = LibrarianConfig::default();
        let container = FakeContainer::new();
        // a regular file where the output scratch dir's parent must be
        fs::create_dir_all(&f.config.work_root).unwrap();
        fs::write(f.config.work_root.join("output"), "not a dir").unwrap();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        assert!(run_batch(&pipeline, &f.repo, &mut f.state, 0).is_err());
        assert!(container.calls().is_empty());
    }

    #[test]
    fn test_publish_nothing_to_report() {
        let f = fixture(&[]);
        let publication = publish(&f.config, &f.repo, None, &BatchResult::default(), "generate")
            .unwrap();
        assert_eq!(publication, Publication::Nothing);
    }

    #[test]
    fn test_publish_only_errors_fails() {
        let f = fixture(&[]);
        let result = BatchResult {
            content: PullRequestContent {
                successes: Vec::new(),
                errors: vec!["Error while generating a".to_string()],
            },
            excess: Vec::new(),
        };
        let err = publish(&f.config, &f.repo, None, &result, "generate").unwrap_err();
        assert!(matches!(err, Error::AllFailed { count: 1 }));
    }

    #[test]
    fn test_publish_without_push_logs() {
        let f = fixture(&[]);
        let result = BatchResult {
            content: PullRequestContent {
                successes: vec!["Regenerated a".to_string()],
                errors: Vec::new(),
            },
            excess: Vec::new(),
        };
        let publication = publish(&f.config, &f.repo, None, &result, "generate").unwrap();
        let Publication::Logged(draft) = publication else {
            panic!("expected a logged draft");
        };
        assert!(draft.title.starts_with("chore: librarian generate pull request: "));
        assert!(f.repo.calls().is_empty());
    }

    #[test]
    fn test_publish_with_push_creates_pull_request() {
        let mut f = fixture(&[]);
        f.config.push = true;
        let github = FakeGitHub::default();
        let result = BatchResult {
            content: PullRequestContent {
                successes: vec!["Regenerated a".to_string()],
                errors: vec!["Error while building b".to_string()],
            },
            excess: Vec::new(),
        };
        let publication = publish(&f.config, &f.repo, Some(&github), &result, "generate").unwrap();
        assert!(matches!(publication, Publication::Created(_)));

        let calls = f.repo.calls();
        assert!(calls[0].starts_with("branch librarian-"));
        assert!(calls[1].starts_with("push librarian-"));
        let created = github.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert!(created[0].1.contains("- Error while building b"));
        assert_eq!(created[0].3, "main");
    }
}
