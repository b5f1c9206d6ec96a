//! # Repository Access
//!
//! The orchestration code talks to git through the [`Repository`] trait so
//! that the pipeline can be exercised without real repositories. The
//! production implementation, [`GitRepository`], shells out to the system
//! `git` command, which automatically handles:
//! - SSH keys from ~/.ssh/
//! - Git credential helpers
//! - Any authentication configured in ~/.gitconfig
//!
//! A token can additionally be supplied for pushes to GitHub over HTTPS.

use crate::error::{Error, Result};
use crate::github::GitHubRepo;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A commit as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: String,
    pub message: String,
}

impl Commit {
    /// First line of the message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// Operations on a local working copy.
pub trait Repository {
    /// Root of the working tree.
    fn dir(&self) -> &Path;

    /// `git status --porcelain` output; empty when the tree is clean.
    fn status(&self) -> Result<String>;

    /// Whether the working tree has no modifications, including untracked files.
    fn is_clean(&self) -> Result<bool> {
        Ok(self.status()?.trim().is_empty())
    }

    /// Stages everything and commits it. Returns the new HEAD hash.
    fn add_all_and_commit(&self, message: &str) -> Result<String>;

    /// Creates and checks out a new branch at HEAD.
    fn create_branch(&self, name: &str) -> Result<()>;

    /// Pushes a branch to `origin`.
    fn push(&self, branch: &str) -> Result<()>;

    /// Checks out a commit, detaching HEAD.
    fn checkout(&self, revision: &str) -> Result<()>;

    /// Discards the last `count` commits and any uncommitted changes.
    fn revert_commits(&self, count: usize) -> Result<()>;

    /// Discards uncommitted changes, including untracked files.
    fn clean_working_tree(&self) -> Result<()>;

    /// Commits touching any of `paths` after `since` (exclusive), newest first.
    ///
    /// `since = None` means the whole history. An empty `paths` matches
    /// every commit.
    fn commits_for_paths(&self, paths: &[String], since: Option<&str>) -> Result<Vec<Commit>>;

    /// Whether a revision (commit, branch or tag) resolves.
    fn revision_exists(&self, revision: &str) -> Result<bool>;

    /// Hash of the current HEAD commit.
    fn head_hash(&self) -> Result<String>;

    /// URL of a remote.
    fn remote_url(&self, remote: &str) -> Result<String>;
}

/// [`Repository`] implementation backed by the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitRepository {
    dir: PathBuf,
    push_token: Option<String>,
}

impl GitRepository {
    /// Opens an existing working copy.
    pub fn open(dir: &Path) -> Result<Self> {
        let repo = Self {
            dir: dir.to_path_buf(),
            push_token: None,
        };
        repo.git(&["rev-parse", "--git-dir"])?;
        Ok(repo)
    }

    /// Opens `location` if it is a local directory, otherwise clones it into `work_root`.
    pub fn open_or_clone(location: &str, work_root: &Path) -> Result<Self> {
        let local = Path::new(location);
        if local.is_dir() {
            debug!("Opening local repository at {}", local.display());
            return Self::open(local);
        }
        let name = location
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .rsplit(['/', ':'])
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("repo");
        let target = work_root.join(name);
        clone(location, &target)?;
        Self::open(&target)
    }

    /// Uses `token` for HTTPS pushes to GitHub.
    pub fn with_push_token(mut self, token: Option<String>) -> Self {
        self.push_token = token;
        self
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        run_git(Some(&self.dir), args)
    }
}

impl Repository for GitRepository {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn status(&self) -> Result<String> {
        self.git(&["status", "--porcelain"])
    }

    fn add_all_and_commit(&self, message: &str) -> Result<String> {
        self.git(&["add", "--all"])?;
        self.git(&["commit", "--quiet", "--message", message])?;
        self.head_hash()
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        self.git(&["checkout", "--quiet", "-b", name])?;
        Ok(())
    }

    fn push(&self, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        match self.push_token.as_deref() {
            Some(token) => {
                let remote = self.remote_url("origin")?;
                let github = GitHubRepo::from_remote_url(&remote)?;
                let url = format!(
                    "https://x-access-token:{}@github.com/{}/{}.git",
                    token, github.owner, github.name
                );
                self.git(&["push", url.as_str(), refspec.as_str()])
                    .map_err(|e| redact(e, token))?;
            }
            None => {
                self.git(&["push", "origin", refspec.as_str()])?;
            }
        }
        info!("Pushed branch {}", branch);
        Ok(())
    }

    fn checkout(&self, revision: &str) -> Result<()> {
        self.git(&["checkout", "--quiet", "--detach", revision])?;
        Ok(())
    }

    fn revert_commits(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let target = format!("HEAD~{}", count);
        self.git(&["reset", "--quiet", "--hard", target.as_str()])?;
        self.git(&["clean", "-fd", "--quiet"])?;
        Ok(())
    }

    fn clean_working_tree(&self) -> Result<()> {
        self.git(&["reset", "--quiet", "--hard", "HEAD"])?;
        self.git(&["clean", "-fd", "--quiet"])?;
        Ok(())
    }

    fn commits_for_paths(&self, paths: &[String], since: Option<&str>) -> Result<Vec<Commit>> {
        let range = match since {
            Some(since) => format!("{}..HEAD", since),
            None => "HEAD".to_string(),
        };
        let mut args = vec!["log", "--format=%H%x00%B%x1e", range.as_str()];
        if !paths.is_empty() {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        let output = self.git(&args)?;
        Ok(parse_log(&output))
    }

    fn revision_exists(&self, revision: &str) -> Result<bool> {
        let spec = format!("{}^{{commit}}", revision);
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.dir)
            .args(["rev-parse", "--verify", "--quiet", spec.as_str()])
            .output()?;
        Ok(output.status.success())
    }

    fn head_hash(&self) -> Result<String> {
        Ok(self.git(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn remote_url(&self, remote: &str) -> Result<String> {
        Ok(self.git(&["remote", "get-url", remote])?.trim().to_string())
    }
}

/// Clones `url` into `target_dir`, replacing anything already there.
pub fn clone(url: &str, target_dir: &Path) -> Result<()> {
    // git won't clone into an existing non-empty directory
    if target_dir.exists() {
        fs::remove_dir_all(target_dir)?;
    }
    if let Some(parent) = target_dir.parent() {
        fs::create_dir_all(parent)?;
    }

    info!("Cloning {} into {}", url, target_dir.display());
    let target = target_dir.to_string_lossy();
    run_git(None, &["clone", "--quiet", url, target.as_ref()]).map_err(|e| match e {
        Error::GitCommand {
            command,
            dir,
            stderr,
        } if stderr.contains("Authentication failed")
            || stderr.contains("Permission denied")
            || stderr.contains("Could not read from remote repository") =>
        {
            Error::GitCommand {
                command,
                dir,
                stderr: format!(
                    "Authentication failed. Make sure you have access to the repository.\nError: {}",
                    stderr
                ),
            }
        }
        other => other,
    })?;
    Ok(())
}

fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<String> {
    let mut command = Command::new("git");
    if let Some(dir) = dir {
        command.arg("-C").arg(dir);
    }
    let dir_display = dir
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| ".".to_string());

    debug!("git {}", args.join(" "));
    let output = command.args(args).output().map_err(|e| Error::GitCommand {
        command: args.join(" "),
        dir: dir_display.clone(),
        stderr: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(Error::GitCommand {
            command: args.join(" "),
            dir: dir_display,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn redact(error: Error, secret: &str) -> Error {
    match error {
        Error::GitCommand {
            command,
            dir,
            stderr,
        } => Error::GitCommand {
            command: command.replace(secret, "***"),
            dir,
            stderr: stderr.replace(secret, "***"),
        },
        other => other,
    }
}

/// Parses `git log --format=%H%x00%B%x1e` output.
fn parse_log(output: &str) -> Vec<Commit> {
    output
        .split('\u{1e}')
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            let (hash, message) = record.split_once('\0')?;
            let hash = hash.trim();
            if hash.is_empty() {
                return None;
            }
            Some(Commit {
                hash: hash.to_string(),
                message: message.trim_end().to_string(),
            })
        })
        .collect()
}

/// In-memory [`Repository`] used by unit tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records commits and reverts without running git. Files live in a real
    /// directory so that file operations can be checked.
    pub struct FakeRepository {
        pub dir: PathBuf,
        pub commits: Mutex<Vec<Commit>>,
        pub dirty: Mutex<bool>,
        pub calls: Mutex<Vec<String>>,
        pub path_commits: Mutex<Vec<Commit>>,
        pub missing_revisions: Mutex<Vec<String>>,
        pub remote: String,
    }

    impl FakeRepository {
        pub fn new(dir: &Path) -> Self {
            Self {
                dir: dir.to_path_buf(),
                commits: Mutex::new(Vec::new()),
                dirty: Mutex::new(false),
                calls: Mutex::new(Vec::new()),
                path_commits: Mutex::new(Vec::new()),
                missing_revisions: Mutex::new(Vec::new()),
                remote: "https://github.com/googleapis/google-cloud-python.git".to_string(),
            }
        }

        /// Commits returned by `commits_for_paths`, newest first.
        pub fn with_path_commits(self, commits: Vec<Commit>) -> Self {
            *self.path_commits.lock().unwrap() = commits;
            self
        }

        pub fn set_dirty(&self, dirty: bool) {
            *self.dirty.lock().unwrap() = dirty;
        }

        pub fn commit_messages(&self) -> Vec<String> {
            self.commits
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.message.clone())
                .collect()
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Repository for FakeRepository {
        fn dir(&self) -> &Path {
            &self.dir
        }

        fn status(&self) -> Result<String> {
            if *self.dirty.lock().unwrap() {
                Ok(" M changed.txt\n".to_string())
            } else {
                Ok(String::new())
            }
        }

        fn add_all_and_commit(&self, message: &str) -> Result<String> {
            let mut commits = self.commits.lock().unwrap();
            let hash = format!("commit{}", commits.len() + 1);
            commits.push(Commit {
                hash: hash.clone(),
                message: message.to_string(),
            });
            *self.dirty.lock().unwrap() = false;
            self.record(format!("commit {}", hash));
            Ok(hash)
        }

        fn create_branch(&self, name: &str) -> Result<()> {
            self.record(format!("branch {}", name));
            Ok(())
        }

        fn push(&self, branch: &str) -> Result<()> {
            self.record(format!("push {}", branch));
            Ok(())
        }

        fn checkout(&self, revision: &str) -> Result<()> {
            self.record(format!("checkout {}", revision));
            Ok(())
        }

        fn revert_commits(&self, count: usize) -> Result<()> {
            let mut commits = self.commits.lock().unwrap();
            let keep = commits.len().saturating_sub(count);
            commits.truncate(keep);
            *self.dirty.lock().unwrap() = false;
            self.record(format!("revert {}", count));
            Ok(())
        }

        fn clean_working_tree(&self) -> Result<()> {
            *self.dirty.lock().unwrap() = false;
            self.record("clean".to_string());
            Ok(())
        }

        fn commits_for_paths(&self, paths: &[String], since: Option<&str>) -> Result<Vec<Commit>> {
            self.record(format!("log {} since {:?}", paths.join(","), since));
            let all = self.path_commits.lock().unwrap().clone();
            let commits = match since {
                Some(since) => all.into_iter().take_while(|c| c.hash != since).collect(),
                None => all,
            };
            Ok(commits)
        }

        fn revision_exists(&self, revision: &str) -> Result<bool> {
            Ok(!self
                .missing_revisions
                .lock()
                .unwrap()
                .iter()
                .any(|r| r == revision))
        }

        fn head_hash(&self) -> Result<String> {
            Ok(self
                .commits
                .lock()
                .unwrap()
                .last()
                .map(|c| c.hash.clone())
                .unwrap_or_else(|| "base".to_string()))
        }

        fn remote_url(&self, _remote: &str) -> Result<String> {
            Ok(self.remote.clone())
        }
    }
}
