//! # Per-Library Pipeline
//!
//! Regenerating one library walks a fixed sequence of stages against the
//! shared language repository:
//!
//! ```text
//! [skip checks] -> Generating -> Cleaning -> Copying -> commit -> Building -> Committed
//!        |              |            |          |                    |
//!     Skipped        Reverted     Reverted    fatal             Reverted / fatal
//! ```
//!
//! Every stage that touches the repository advances an [`Undo`] value that
//! records how to take its side effects back. A recoverable failure runs
//! exactly that compensation and ends in [`Outcome::Reverted`]; a fatal
//! failure (see [`Error::is_batch_fatal`]) compensates and is returned as
//! an error so the batch stops.
//!
//! A library reported in the generate response replaces the library's
//! source roots and clean patterns before cleaning; the change is committed
//! with the generated code and undone with it.
//!
//! Commits are created *before* the build: the state update is durable even
//! if the build fails, and the build failure is undone by reverting one
//! commit. A build that modifies the tree is treated as a broken container
//! and aborts the batch with the tree left as-is for inspection.

use crate::cleaner;
use crate::config::Config;
use crate::container::{
    apply_response, read_response, write_request, BuildRawRequest, BuildRequest, CleanRequest, ContainerDriver,
    GenerateRawRequest, GenerateRequest,
};
use crate::defaults::{GENERATOR_INPUT_DIR, SOURCE_LINK_BASE};
use crate::error::{Error, Result};
use crate::git::{Commit, Repository};
use crate::state::{save_state, LibrarianConfig, LibrarianState, LibraryState};
use crate::sync;
use log::{debug, error, info, warn};
use std::fmt;
use std::fs;
use std::path::PathBuf;

/// Trailer prefixes moved from source commit bodies to the end of the
/// generated commit message.
const HOISTED_TRAILERS: &[&str] = &["PiperOrigin-RevId:"];

const SOURCE_LINK_PREFIX: &str = "Source-Link:";

/// Why a library was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoApis,
    Blocked,
    Filtered,
    UpToDate,
}

/// Stage at which a library failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generating,
    Cleaning,
    Copying,
    Building,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Stage::Generating => "generating",
            Stage::Cleaning => "cleaning",
            Stage::Copying => "copying",
            Stage::Building => "building",
        };
        f.write_str(verb)
    }
}

/// What the pipeline is being run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Regular regeneration from new API commits.
    Regenerate,
    /// First generation of a library that was just configured.
    Configure,
}

/// Terminal state of one library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    /// Exactly one commit was created.
    Committed { commit: String, summary: String },
    /// The library's changes were undone; `summary` is safe to publish.
    Reverted { stage: Stage, summary: String },
}

/// Compensation for the side effects applied so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Undo {
    Nothing,
    DiscardChanges,
    RevertCommit,
}

/// Collaborators shared by every library in a run.
pub struct Pipeline<'a> {
    config: &'a Config,
    librarian_config: &'a LibrarianConfig,
    repo: &'a dyn Repository,
    api_repo: &'a dyn Repository,
    container: &'a dyn ContainerDriver,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        librarian_config: &'a LibrarianConfig,
        repo: &'a dyn Repository,
        api_repo: &'a dyn Repository,
        container: &'a dyn ContainerDriver,
    ) -> Self {
        Self {
            config,
            librarian_config,
            repo,
            api_repo,
            container,
        }
    }

    /// Runs the pipeline for one library, mutating `state` on success.
    ///
    /// Returns `Err` only for failures that must abort the batch.
    pub fn run(
        &self,
        state: &mut LibrarianState,
        library_id: &str,
        trigger: Trigger,
    ) -> Result<Outcome> {
        let original = state
            .find_library(library_id)
            .cloned()
            .ok_or_else(|| Error::LibraryNotFound {
                id: library_id.to_string(),
            })?;

        let commits = match self.source_commits(&original, trigger)? {
            Ok(commits) => commits,
            Err(reason) => {
                info!("Skipping {}: {:?}", library_id, reason);
                return Ok(Outcome::Skipped(reason));
            }
        };

        let mut undo = Undo::Nothing;
        let mut library = original.clone();

        let output_dir = self.scratch_dir("output", library_id)?;
        match self.generate(&library, &output_dir) {
            Ok(Some(response)) => apply_response(&mut library, response),
            Ok(None) => {}
            Err(e) => return self.fail(state, &original, Stage::Generating, undo, e),
        }

        undo = Undo::DiscardChanges;
        if let Err(e) = self.clean(&library) {
            return self.fail(state, &original, Stage::Cleaning, undo, e);
        }

        if let Err(e) = sync::copy_tree(&output_dir, self.repo.dir()) {
            return self.fail(state, &original, Stage::Copying, undo, e);
        }

        if let Some(entry) = state.find_library_mut(library_id) {
            *entry = library.clone();
            if let Some(newest) = commits.first() {
                entry.last_generated_commit = newest.hash.clone();
            }
        }
        let message = commit_message(trigger, &original, &commits);
        let commit = match save_state(self.repo.dir(), state)
            .and_then(|_| self.repo.add_all_and_commit(&message))
        {
            Ok(commit) => commit,
            Err(e) => {
                restore_library(state, &original);
                self.compensate(undo)?;
                return Err(e);
            }
        };
        undo = Undo::RevertCommit;
        info!("Committed {} for {}", commit, library_id);

        if self.config.build {
            let built = self.build(&library);
            if !self.repo.is_clean()? {
                let details = self.repo.status()?;
                return Err(Error::TreeDrift {
                    library: library_id.to_string(),
                    details: details.trim().to_string(),
                });
            }
            if let Err(e) = built {
                return self.fail(state, &original, Stage::Building, undo, e);
            }
        }

        Ok(Outcome::Committed {
            commit,
            summary: success_summary(trigger, &original, &commits),
        })
    }

    /// Source commits to incorporate, or the reason to skip.
    fn source_commits(
        &self,
        library: &LibraryState,
        trigger: Trigger,
    ) -> Result<std::result::Result<Vec<Commit>, SkipReason>> {
        let api_paths = library.api_paths();
        if trigger == Trigger::Regenerate {
            if api_paths.is_empty() {
                return Ok(Err(SkipReason::NoApis));
            }
            if self.librarian_config.is_generate_blocked(&library.id) {
                return Ok(Err(SkipReason::Blocked));
            }
            if !self.matches_filter(library) {
                return Ok(Err(SkipReason::Filtered));
            }
        }

        let since = Some(library.last_generated_commit.as_str()).filter(|s| !s.is_empty());
        let mut commits = self.api_repo.commits_for_paths(&api_paths, since)?;
        if trigger == Trigger::Regenerate && commits.is_empty() {
            return Ok(Err(SkipReason::UpToDate));
        }
        if since.is_none() {
            // A library's first generation only credits the newest commit.
            commits.truncate(1);
        }
        debug!("{} source commits for {}", commits.len(), library.id);
        Ok(Ok(commits))
    }

    fn matches_filter(&self, library: &LibraryState) -> bool {
        if let Some(id) = &self.config.library {
            if id != &library.id {
                return false;
            }
        }
        if let Some(api) = &self.config.api {
            if !library.apis.iter().any(|a| &a.path == api) {
                return false;
            }
        }
        true
    }

    fn scratch_dir(&self, kind: &str, name: &str) -> Result<PathBuf> {
        let dir = self.config.work_root.join(kind).join(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn state_dir(&self, library_id: &str, command: &str) -> PathBuf {
        self.config
            .work_root
            .join("librarian")
            .join(library_id)
            .join(command)
    }

    /// Runs the generate step and returns the library the container
    /// reported, if any.
    fn generate(
        &self,
        library: &LibraryState,
        output_dir: &std::path::Path,
    ) -> Result<Option<LibraryState>> {
        // A fresh copy per library: earlier containers may have modified theirs.
        let generator_input = self.config.work_root.join("generator-input").join(&library.id);
        sync::copy_fresh(&self.repo.dir().join(GENERATOR_INPUT_DIR), &generator_input)?;

        let state_dir = self.state_dir(&library.id, "generate");
        write_request(&state_dir, "generate", library)?;
        self.container.generate_library(&GenerateRequest {
            library_id: library.id.clone(),
            api_root: self.api_repo.dir().to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            generator_input,
            state_dir: state_dir.clone(),
        })?;
        Ok(read_response(&state_dir, "generate")?.and_then(|r| r.library))
    }

    fn clean(&self, library: &LibraryState) -> Result<()> {
        cleaner::clean(
            self.repo.dir(),
            &library.source_roots,
            &library.remove_patterns(),
            &library.preserve_regex,
        )?;
        let state_dir = self.state_dir(&library.id, "clean");
        write_request(&state_dir, "clean", library)?;
        self.container.clean(&CleanRequest {
            library_id: library.id.clone(),
            repo_dir: self.repo.dir().to_path_buf(),
            state_dir,
        })
    }

    fn build(&self, library: &LibraryState) -> Result<()> {
        let state_dir = self.state_dir(&library.id, "build");
        write_request(&state_dir, "build", library)?;
        self.container.build_library(&BuildRequest {
            library_id: library.id.clone(),
            repo_dir: self.repo.dir().to_path_buf(),
            state_dir,
        })
    }

    fn compensate(&self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Nothing => Ok(()),
            Undo::DiscardChanges => {
                debug!("Discarding uncommitted changes");
                self.repo.clean_working_tree()
            }
            Undo::RevertCommit => {
                debug!("Reverting the last commit");
                self.repo.revert_commits(1)
            }
        }
    }

    /// Undoes the library's changes and classifies the failure.
    fn fail(
        &self,
        state: &mut LibrarianState,
        library: &LibraryState,
        stage: Stage,
        undo: Undo,
        err: Error,
    ) -> Result<Outcome> {
        error!("Error while {} {}: {}", stage, library.id, err);
        if undo == Undo::RevertCommit {
            restore_library(state, library);
        }
        self.compensate(undo)?;
        if err.is_batch_fatal() {
            return Err(err);
        }
        warn!("Reverted changes for {}", library.id);
        Ok(Outcome::Reverted {
            stage,
            summary: format!("Error while {} {}", stage, library.id),
        })
    }

    /// Generates an API that no library owns into a scratch output directory.
    ///
    /// Nothing in the language repository is touched.
    pub fn generate_raw(&self, api_path: &str) -> Result<PathBuf> {
        let output_dir = self.scratch_dir("output", &api_path.replace('/', "-"))?;
        self.container.generate_raw(&GenerateRawRequest {
            api_path: api_path.to_string(),
            api_root: self.api_repo.dir().to_path_buf(),
            output_dir: output_dir.clone(),
        })?;
        if self.config.build {
            self.container.build_raw(&BuildRawRequest {
                api_path: api_path.to_string(),
                output_dir: output_dir.clone(),
            })?;
        }
        info!("Generated {} into {}", api_path, output_dir.display());
        Ok(output_dir)
    }
}

fn restore_library(state: &mut LibrarianState, library: &LibraryState) {
    if let Some(entry) = state.find_library_mut(&library.id) {
        *entry = library.clone();
    }
}

fn success_summary(trigger: Trigger, library: &LibraryState, commits: &[Commit]) -> String {
    match trigger {
        Trigger::Configure => format!("Configured new library {}", library.id),
        Trigger::Regenerate if library.last_generated_commit.is_empty() => {
            format!("Initial generation for {}", library.id)
        }
        Trigger::Regenerate => format!(
            "Regenerated {} from {} API commit(s)",
            library.id,
            commits.len()
        ),
    }
}

/// Builds the message of the single commit a library contributes.
///
/// `commits` is newest first. Regular regenerations concatenate the
/// source messages oldest first, with trailer lines moved after the body
/// and one `Source-Link` per source commit.
pub fn commit_message(trigger: Trigger, library: &LibraryState, commits: &[Commit]) -> String {
    let mut bodies = Vec::new();
    let mut trailers = Vec::new();
    for commit in commits.iter().rev() {
        let mut body = Vec::new();
        for line in commit.message.lines() {
            if line.starts_with(SOURCE_LINK_PREFIX) {
                // replaced by the synthesized links below
                continue;
            }
            if HOISTED_TRAILERS.iter().any(|p| line.starts_with(p)) {
                trailers.push(line.trim().to_string());
            } else {
                body.push(line);
            }
        }
        bodies.push(body.join("\n").trim().to_string());
    }
    for commit in commits.iter().rev() {
        trailers.push(format!("{} {}{}", SOURCE_LINK_PREFIX, SOURCE_LINK_BASE, commit.hash));
    }

    let mut message = match trigger {
        Trigger::Configure => format!("feat: Configure new library {}", library.id),
        Trigger::Regenerate if library.last_generated_commit.is_empty() => {
            format!("feat: Initial generation for {}", library.id)
        }
        Trigger::Regenerate => bodies
            .into_iter()
            .filter(|b| !b.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
    };
    if !trailers.is_empty() {
        message.push_str("\n\n");
        message.push_str(&trailers.join("\n"));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::FakeContainer;
    use crate::git::testing::FakeRepository;
    use crate::state::{load_state, Api, LibraryConfig};
    use tempfile::TempDir;

    fn commit(hash: &str, message: &str) -> Commit {
        Commit {
            hash: hash.to_string(),
            message: message.to_string(),
        }
    }

    fn library(id: &str, last: &str) -> LibraryState {
        LibraryState {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            apis: vec![Api {
                path: format!("google/cloud/{}/v1", id),
                ..Api::default()
            }],
            source_roots: vec![format!("packages/{}", id)],
            last_generated_commit: last.to_string(),
            ..LibraryState::default()
        }
    }

    fn state(libraries: Vec<LibraryState>) -> LibrarianState {
        LibrarianState {
            image: "gcr.io/gen:1".to_string(),
            libraries,
        }
    }

    struct Fixture {
        _temp: TempDir,
        config: Config,
        repo: FakeRepository,
        api_repo: FakeRepository,
    }

    fn fixture(path_commits: Vec<Commit>) -> Fixture {
        let temp = TempDir::new().unwrap();
        let repo_dir = temp.path().join("repo");
        let api_dir = temp.path().join("apis");
        fs::create_dir_all(&repo_dir).unwrap();
        fs::create_dir_all(&api_dir).unwrap();
        let config = Config {
            work_root: temp.path().join("work"),
            build: true,
            ..Config::default()
        };
        Fixture {
            config,
            repo: FakeRepository::new(&repo_dir),
            api_repo: FakeRepository::new(&api_dir).with_path_commits(path_commits),
            _temp: temp,
        }
    }

    #[test]
    fn test_initial_generation() {
        let f = fixture(vec![
            commit("c2", "feat: add rotation"),
            commit("c1", "feat: add secrets"),
        ]);
        let container = FakeContainer::new().generating("packages/foo/lib.py", "generated");
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        let mut state = state(vec![library("foo", "")]);

        let outcome = pipeline.run(&mut state, "foo", Trigger::Regenerate).unwrap();

        assert!(matches!(outcome, Outcome::Committed { .. }));
        let messages = f.repo.commit_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("feat: Initial generation for foo"));
        assert!(messages[0].contains(&format!("Source-Link: {}c2", SOURCE_LINK_BASE)));
        assert!(!messages[0].contains("c1"));
        assert_eq!(state.libraries[0].last_generated_commit, "c2");
        assert_eq!(
            load_state(f.repo.dir()).unwrap().libraries[0].last_generated_commit,
            "c2"
        );
        assert_eq!(
            fs::read_to_string(f.repo.dir().join("packages/foo/lib.py")).unwrap(),
            "generated"
        );
        assert_eq!(container.calls(), vec!["generate foo", "clean foo", "build foo"]);
    }

    #[test]
    fn test_generate_response_updates_library_layout() {
        let f = fixture(vec![commit("c2", "feat: new")]);
        fs::create_dir_all(f.repo.dir().join("packages/foo")).unwrap();
        fs::write(f.repo.dir().join("packages/foo/keep.py"), "handwritten").unwrap();
        fs::write(f.repo.dir().join("packages/foo/old.py"), "stale").unwrap();
        let reported = LibraryState {
            id: "foo".to_string(),
            version: "9.9.9".to_string(),
            source_roots: vec!["packages/foo".to_string(), "docs/foo".to_string()],
            preserve_regex: vec![r"^packages/foo/keep\.py$".to_string()],
            ..LibraryState::default()
        };
        let container = FakeContainer::new()
            .generating("packages/foo/lib.py", "generated")
            .responding_to_generate(reported);
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        let mut state = state(vec![library("foo", "c1")]);

        let outcome = pipeline.run(&mut state, "foo", Trigger::Regenerate).unwrap();

        assert!(matches!(outcome, Outcome::Committed { .. }));
        let foo = &state.libraries[0];
        assert_eq!(foo.source_roots, vec!["packages/foo", "docs/foo"]);
        assert_eq!(foo.preserve_regex, vec![r"^packages/foo/keep\.py$"]);
        assert_eq!(foo.version, "1.0.0");
        assert_eq!(foo.last_generated_commit, "c2");
        assert_eq!(&load_state(f.repo.dir()).unwrap().libraries[0], foo);
        assert!(f.repo.dir().join("packages/foo/keep.py").exists());
        assert!(!f.repo.dir().join("packages/foo/old.py").exists());
    }

    #[test]
    fn test_build_failure_restores_reported_layout() {
        let f = fixture(vec![commit("c2", "feat: new")]);
        let reported = LibraryState {
            id: "foo".to_string(),
            source_roots: vec!["packages/foo".to_string(), "docs/foo".to_string()],
            ..LibraryState::default()
        };
        let container = FakeContainer::new()
            .responding_to_generate(reported)
            .failing("build", "foo");
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        let mut state = state(vec![library("foo", "c1")]);

        let outcome = pipeline.run(&mut state, "foo", Trigger::Regenerate).unwrap();

        assert!(matches!(outcome, Outcome::Reverted { stage: Stage::Building, .. }));
        assert_eq!(state.libraries[0], library("foo", "c1"));
    }

    #[test]
    fn test_up_to_date_library_is_skipped() {
        let f = fixture(vec![commit("c1", "feat: old")]);
        let container = FakeContainer::new();
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        let mut state = state(vec![library("foo", "c1")]);

        let outcome = pipeline.run(&mut state, "foo", Trigger::Regenerate).unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::UpToDate));
        assert!(container.calls().is_empty());
    }

    #[test]
    fn test_skip_conditions() {
        let f = fixture(vec![commit("c1", "feat: new")]);
        let container = FakeContainer::new();
        let lconfig = LibrarianConfig {
            libraries: vec![LibraryConfig {
                id: "blocked".to_string(),
                generate_blocked: true,
                ..LibraryConfig::default()
            }],
            ..LibrarianConfig::default()
        };
        let filtered = Config {
            library: Some("other".to_string()),
            ..f.config.clone()
        };
        let mut no_apis = library("bare", "");
        no_apis.apis.clear();
        let mut state = state(vec![no_apis, library("blocked", ""), library("foo", "")]);

        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        assert_eq!(
            pipeline.run(&mut state, "bare", Trigger::Regenerate).unwrap(),
            Outcome::Skipped(SkipReason::NoApis)
        );
        assert_eq!(
            pipeline.run(&mut state, "blocked", Trigger::Regenerate).unwrap(),
            Outcome::Skipped(SkipReason::Blocked)
        );
        let pipeline = Pipeline::new(&filtered, &lconfig, &f.repo, &f.api_repo, &container);
        assert_eq!(
            pipeline.run(&mut state, "foo", Trigger::Regenerate).unwrap(),
            Outcome::Skipped(SkipReason::Filtered)
        );
        assert!(f.repo.commit_messages().is_empty());
    }

    #[test]
    fn test_generate_failure_leaves_repo_untouched() {
        let f = fixture(vec![commit("c2", "feat: new")]);
        let container = FakeContainer::new().failing("generate", "foo");
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        let mut state = state(vec![library("foo", "c1")]);

        let outcome = pipeline.run(&mut state, "foo", Trigger::Regenerate).unwrap();
        assert_eq!(
            outcome,
            Outcome::Reverted {
                stage: Stage::Generating,
                summary: "Error while generating foo".to_string(),
            }
        );
        assert!(f.repo.calls().is_empty());
        assert_eq!(state.libraries[0].last_generated_commit, "c1");
    }

    #[test]
    fn test_clean_failure_discards_changes() {
        let f = fixture(vec![commit("c2", "feat: new")]);
        let container = FakeContainer::new().failing("clean", "foo");
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        let mut state = state(vec![library("foo", "c1")]);

        let outcome = pipeline.run(&mut state, "foo", Trigger::Regenerate).unwrap();
        assert!(matches!(outcome, Outcome::Reverted { stage: Stage::Cleaning, .. }));
        assert_eq!(f.repo.calls(), vec!["clean"]);
        assert!(f.repo.commit_messages().is_empty());
    }

    #[test]
    fn test_copy_failure_is_fatal_and_discards_changes() {
        let f = fixture(vec![commit("c2", "feat: new")]);
        // a preserved file keeps packages/foo/sub a directory in the repo
        fs::create_dir_all(f.repo.dir().join("packages/foo/sub")).unwrap();
        fs::write(f.repo.dir().join("packages/foo/sub/keep.py"), "handwritten").unwrap();
        let container = FakeContainer::new().generating("packages/foo/sub", "not a directory");
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        let mut foo = library("foo", "c1");
        foo.preserve_regex = vec![r"^packages/foo/sub/keep\.py$".to_string()];
        let mut state = state(vec![foo]);

        let err = pipeline
            .run(&mut state, "foo", Trigger::Regenerate)
            .unwrap_err();

        assert!(matches!(err, Error::Filesystem { .. }));
        assert!(err.is_batch_fatal());
        assert_eq!(f.repo.calls(), vec!["clean"]);
        assert!(f.repo.commit_messages().is_empty());
        assert_eq!(state.libraries[0].last_generated_commit, "c1");
        assert_eq!(container.calls(), vec!["generate foo", "clean foo"]);
    }

    #[test]
    fn test_build_failure_reverts_commit_and_state() {
        let f = fixture(vec![commit("c2", "feat: new")]);
        let container = FakeContainer::new().failing("build", "foo");
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        let mut state = state(vec![library("foo", "c1")]);

        let outcome = pipeline.run(&mut state, "foo", Trigger::Regenerate).unwrap();
        assert_eq!(
            outcome,
            Outcome::Reverted {
                stage: Stage::Building,
                summary: "Error while building foo".to_string(),
            }
        );
        assert!(f.repo.commit_messages().is_empty());
        assert!(f.repo.calls().contains(&"revert 1".to_string()));
        assert_eq!(state.libraries[0].last_generated_commit, "c1");
    }

    #[test]
    fn test_build_tree_drift_is_fatal() {
        let f = fixture(vec![commit("c2", "feat: new")]);
        let repo = std::sync::Arc::new(f.repo);
        let drifting = repo.clone();
        let container = FakeContainer::new().with_hook(move |command, _| {
            if command == "build" {
                drifting.set_dirty(true);
            }
        });
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, repo.as_ref(), &f.api_repo, &container);
        let mut state = state(vec![library("foo", "c1")]);

        let err = pipeline
            .run(&mut state, "foo", Trigger::Regenerate)
            .unwrap_err();
        assert!(matches!(err, Error::TreeDrift { .. }));
        assert_eq!(repo.commit_messages().len(), 1);
    }

    #[test]
    fn test_without_build_flag_build_is_not_run() {
        let mut f = fixture(vec![commit("c2", "feat: new")]);
        f.config.build = false;
        let container = FakeContainer::new().failing("build", "foo");
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);
        let mut state = state(vec![library("foo", "c1")]);

        let outcome = pipeline.run(&mut state, "foo", Trigger::Regenerate).unwrap();
        assert!(matches!(outcome, Outcome::Committed { .. }));
        assert_eq!(container.calls(), vec!["generate foo", "clean foo"]);
    }

    #[test]
    fn test_commit_message_orders_bodies_and_trailers() {
        let lib = library("foo", "c0");
        let commits = vec![
            commit("c2", "fix: second\n\nDetails two.\n\nPiperOrigin-RevId: 2"),
            commit("c1", "feat: first\n\nPiperOrigin-RevId: 1"),
        ];
        let message = commit_message(Trigger::Regenerate, &lib, &commits);
        assert_eq!(
            message,
            format!(
                "feat: first\n\nfix: second\n\nDetails two.\n\n\
                 PiperOrigin-RevId: 1\nPiperOrigin-RevId: 2\n\
                 Source-Link: {base}c1\nSource-Link: {base}c2",
                base = SOURCE_LINK_BASE
            )
        );
    }

    #[test]
    fn test_configure_commit_title() {
        let lib = library("foo", "");
        let message = commit_message(Trigger::Configure, &lib, &[commit("c9", "feat: api")]);
        assert!(message.starts_with("feat: Configure new library foo\n\nSource-Link: "));
    }

    #[test]
    fn test_generate_raw_writes_only_output() {
        let f = fixture(Vec::new());
        let container = FakeContainer::new().generating("raw.txt", "raw");
        let lconfig = LibrarianConfig::default();
        let pipeline = Pipeline::new(&f.config, &lconfig, &f.repo, &f.api_repo, &container);

        let output = pipeline.generate_raw("google/cloud/new/v1").unwrap();
        assert!(output.join("raw.txt").exists());
        assert_eq!(
            container.calls(),
            vec![
                "generate-raw google/cloud/new/v1",
                "build-raw google/cloud/new/v1"
            ]
        );
        assert!(f.repo.calls().is_empty());
    }
}
