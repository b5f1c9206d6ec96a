//! Shared test utilities for integration and E2E tests.
//!
//! Integration tests drive the library against real git repositories in
//! temporary directories and a [`ScriptedContainer`] standing in for the
//! language container.
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//! ```

use librarian::container::{
    BuildRawRequest, BuildRequest, CleanRequest, ConfigureRequest, ContainerDriver,
    GenerateRawRequest, GenerateRequest, IntegrationTestRequest, PackageRequest, PublishRequest,
    ReleaseInitRequest,
};
use librarian::error::{Error, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    #[allow(unused_imports)]
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{commit_count, git, init_repo, write_and_commit, ScriptedContainer};
}

/// Runs git in `dir` and returns trimmed stdout, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Creates an empty repository with a local identity.
pub fn init_repo(dir: &Path) {
    fs::create_dir_all(dir).expect("Failed to create repository directory");
    git(dir, &["init", "--quiet", "--initial-branch=main"]);
    git(dir, &["config", "user.name", "Librarian Test"]);
    git(dir, &["config", "user.email", "librarian@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

/// Writes `files` and commits them with `message`. Returns the commit hash.
pub fn write_and_commit(dir: &Path, files: &[(&str, &str)], message: &str) -> String {
    for (path, content) in files {
        let path = dir.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&path, content).expect("Failed to write file");
    }
    git(dir, &["add", "--all"]);
    git(dir, &["commit", "--quiet", "--message", message]);
    git(dir, &["rev-parse", "HEAD"])
}

pub fn commit_count(dir: &Path) -> usize {
    git(dir, &["rev-list", "--count", "HEAD"])
        .parse()
        .expect("Failed to parse commit count")
}

/// A container that writes fixed files and fails on request.
#[derive(Default)]
#[allow(dead_code)]
pub struct ScriptedContainer {
    /// Files written into every generate output directory.
    pub generated: Vec<(String, String)>,
    /// `(command, target)` pairs that fail.
    pub failures: Vec<(String, String)>,
    /// A file the build writes into the repository, modifying the tree.
    pub build_drift: Option<String>,
    calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedContainer {
    pub fn generating(files: &[(&str, &str)]) -> Self {
        Self {
            generated: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing(mut self, command: &str, target: &str) -> Self {
        self.failures.push((command.to_string(), target.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, command: &str, target: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", command, target));
        if self
            .failures
            .iter()
            .any(|(c, t)| c == command && t == target)
        {
            return Err(Error::Container {
                command: command.to_string(),
                target: target.to_string(),
                message: "exit status 1".to_string(),
            });
        }
        Ok(())
    }

    fn write_generated(&self, output_dir: &Path) -> Result<()> {
        for (path, content) in &self.generated {
            let path = output_dir.join(path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        Ok(())
    }
}

impl ContainerDriver for ScriptedContainer {
    fn configure(&self, request: &ConfigureRequest) -> Result<()> {
        self.record("configure", &request.library_id)
    }

    fn generate_library(&self, request: &GenerateRequest) -> Result<()> {
        self.record("generate", &request.library_id)?;
        self.write_generated(&request.output_dir)
    }

    fn generate_raw(&self, request: &GenerateRawRequest) -> Result<()> {
        self.record("generate-raw", &request.api_path)?;
        self.write_generated(&request.output_dir)
    }

    fn clean(&self, request: &CleanRequest) -> Result<()> {
        self.record("clean", &request.library_id)
    }

    fn build_library(&self, request: &BuildRequest) -> Result<()> {
        if let Some(path) = &self.build_drift {
            fs::write(request.repo_dir.join(path), "built")?;
        }
        self.record("build", &request.library_id)
    }

    fn build_raw(&self, request: &BuildRawRequest) -> Result<()> {
        self.record("build-raw", &request.api_path)
    }

    fn release_init(&self, request: &ReleaseInitRequest) -> Result<()> {
        self.record("release-init", &request.library_id)
    }

    fn integration_test_library(&self, request: &IntegrationTestRequest) -> Result<()> {
        self.record("integration-test", &request.library_id)
    }

    fn package_library(&self, request: &PackageRequest) -> Result<()> {
        self.record("package", &request.library_id)?;
        fs::write(request.output_dir.join("package.tar.gz"), "package")?;
        Ok(())
    }

    fn publish_library(&self, request: &PublishRequest) -> Result<()> {
        self.record("publish", &request.library_id)
    }
}
