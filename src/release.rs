//! # Releases
//!
//! The release flow has four steps, each run by its own command:
//!
//! 1. [`ReleaseRunner::release_init`] decides each library's next version
//!    from the conventional commits since its last release tag, lets the
//!    container update version files in an isolated copy, and commits one
//!    release commit per library.
//! 2. [`ReleaseRunner::create_artifacts`] builds, tests and packages every
//!    library of a release and records them in `release.json`.
//! 3. [`ReleaseRunner::publish_artifacts`] publishes the packages and
//!    creates one GitHub release per library.
//! 4. [`tag_and_release`] is the alternative to 2 and 3 for repositories
//!    whose packages are published elsewhere: it tags a merged release pull
//!    request from its description.

use crate::config::Config;
use crate::container::{
    write_request, BuildRequest, ContainerDriver, IntegrationTestRequest, PackageRequest,
    PublishRequest, ReleaseInitRequest,
};
use crate::conventional::{max_bump, parse_message, Bump, ConventionalCommit};
use crate::defaults::{release_tag, RELEASE_METADATA_FILE};
use crate::error::{Error, Result};
use crate::git::Repository;
use crate::github::{GitHubClient, GitHubRepo, PullRequestRef};
use crate::pull_request::{
    parse_release_body, release_commit_message, releases_from_commits, LibraryRelease,
    PullRequestContent, ReleaseNote,
};
use crate::state::{save_state, Change, LibrarianConfig, LibrarianState, LibraryState};
use crate::sync;
use log::{error, info, warn};
use semver::{Prerelease, Version};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Determines the next version of a library.
///
/// In order of precedence: an explicit override (which must be greater
/// than `current`), the bump required by `commits`, and the configured
/// next version when it is higher than the computed one. Returns `None`
/// when there is nothing to release.
pub fn determine_next_version(
    commits: &[ConventionalCommit],
    current: &str,
    library_id: &str,
    explicit: Option<&str>,
    configured: Option<&str>,
) -> Result<Option<String>> {
    let current = parse_version(library_id, if current.is_empty() { "0.0.0" } else { current })?;

    if let Some(explicit) = explicit {
        let explicit = parse_version(library_id, explicit)?;
        if explicit <= current {
            return Err(Error::Version {
                library: library_id.to_string(),
                message: format!(
                    "requested version {} must be greater than the current version {}",
                    explicit, current
                ),
            });
        }
        return Ok(Some(explicit.to_string()));
    }

    let computed = match max_bump(commits) {
        Bump::None => None,
        bump => Some(bump_version(&current, bump)),
    };

    let configured = match configured {
        Some(configured) => {
            let configured = parse_version(library_id, configured)?;
            if configured > current {
                Some(configured)
            } else {
                warn!(
                    "Ignoring configured version {} for {}: not greater than {}",
                    configured, library_id, current
                );
                None
            }
        }
        None => None,
    };

    let next = match (computed, configured) {
        (Some(computed), Some(configured)) => Some(computed.max(configured)),
        (computed, configured) => computed.or(configured),
    };
    Ok(next.map(|v| v.to_string()))
}

fn parse_version(library_id: &str, version: &str) -> Result<Version> {
    Version::parse(version.trim_start_matches('v')).map_err(|e| Error::Version {
        library: library_id.to_string(),
        message: format!("invalid version '{}': {}", version, e),
    })
}

/// Applies a bump. Prereleases advance their trailing counter, and while
/// the major version is zero a breaking change only bumps the minor.
pub fn bump_version(current: &Version, bump: Bump) -> Version {
    let mut next = current.clone();
    if !current.pre.is_empty() {
        next.pre = bump_prerelease(&current.pre);
        return next;
    }
    next.build = semver::BuildMetadata::EMPTY;
    match bump {
        Bump::None => {}
        Bump::Major if current.major == 0 => {
            next.minor += 1;
            next.patch = 0;
        }
        Bump::Major => {
            next.major += 1;
            next.minor = 0;
            next.patch = 0;
        }
        Bump::Minor => {
            next.minor += 1;
            next.patch = 0;
        }
        Bump::Patch => next.patch += 1,
    }
    next
}

fn bump_prerelease(pre: &Prerelease) -> Prerelease {
    let mut parts: Vec<String> = pre.as_str().split('.').map(str::to_string).collect();
    match parts.last().and_then(|p| p.parse::<u64>().ok()) {
        Some(n) => {
            if let Some(last) = parts.last_mut() {
                *last = (n + 1).to_string();
            }
        }
        None => parts.push("1".to_string()),
    }
    // every part came from a valid prerelease or is numeric
    Prerelease::new(&parts.join(".")).unwrap_or_else(|_| pre.clone())
}

/// Markdown release notes for a set of changes.
pub fn format_release_notes(changes: &[Change]) -> String {
    let sections: [(&str, fn(&Change) -> bool); 4] = [
        ("Breaking Changes", |c| c.breaking),
        ("Features", |c| !c.breaking && c.kind == "feat"),
        ("Bug Fixes", |c| !c.breaking && c.kind == "fix"),
        ("Performance Improvements", |c| !c.breaking && c.kind == "perf"),
    ];
    let mut notes = Vec::new();
    for (heading, include) in sections.iter() {
        let lines: Vec<String> = changes
            .iter()
            .filter(|c| include(c))
            .map(|c| {
                let short = c.commit_hash.get(..7).unwrap_or(c.commit_hash.as_str());
                format!("* {} ({})", c.subject, short)
            })
            .collect();
        if !lines.is_empty() {
            notes.push(format!("### {}\n\n{}", heading, lines.join("\n")));
        }
    }
    notes.join("\n\n")
}

/// Contents of `release.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    pub release_id: String,
    pub releases: Vec<LibraryRelease>,
}

pub fn read_release_metadata(artifact_root: &Path) -> Result<ReleaseMetadata> {
    let path = artifact_root.join(RELEASE_METADATA_FILE);
    let content = fs::read_to_string(&path).map_err(|e| Error::Release {
        message: format!("cannot read '{}': {}", path.display(), e),
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn write_release_metadata(artifact_root: &Path, metadata: &ReleaseMetadata) -> Result<()> {
    fs::create_dir_all(artifact_root)?;
    let content = serde_json::to_string_pretty(metadata)?;
    fs::write(artifact_root.join(RELEASE_METADATA_FILE), content)?;
    Ok(())
}

/// Result of release-init.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseInitResult {
    pub notes: Vec<ReleaseNote>,
    pub content: PullRequestContent,
}

/// Runs the release commands against the language repository.
pub struct ReleaseRunner<'a> {
    config: &'a Config,
    librarian_config: &'a LibrarianConfig,
    repo: &'a dyn Repository,
    container: &'a dyn ContainerDriver,
}

impl<'a> ReleaseRunner<'a> {
    pub fn new(
        config: &'a Config,
        librarian_config: &'a LibrarianConfig,
        repo: &'a dyn Repository,
        container: &'a dyn ContainerDriver,
    ) -> Self {
        Self {
            config,
            librarian_config,
            repo,
            container,
        }
    }

    /// Prepares a release of every releasable library, or only of
    /// `config.library`. Creates one commit per released library.
    pub fn release_init(
        &self,
        state: &mut LibrarianState,
        release_id: &str,
    ) -> Result<ReleaseInitResult> {
        let named = self.config.library.as_deref();
        let ids: Vec<String> = match named {
            Some(id) => {
                state.find_library(id).ok_or_else(|| Error::LibraryNotFound {
                    id: id.to_string(),
                })?;
                vec![id.to_string()]
            }
            None => state.libraries.iter().map(|l| l.id.clone()).collect(),
        };

        let mut result = ReleaseInitResult::default();
        for id in &ids {
            let Some(library) = state.find_library(id).cloned() else {
                continue;
            };
            if self.librarian_config.is_release_blocked(id) {
                if named.is_some() {
                    return Err(Error::Release {
                        message: format!("releases of {} are blocked by configuration", id),
                    });
                }
                info!("Skipping {}: releases are blocked", id);
                continue;
            }
            if library.source_roots.is_empty() {
                info!("Skipping {}: no source roots", id);
                continue;
            }

            let Some(updated) = self.next_release(&library, named.is_some())? else {
                info!("Skipping {}: nothing to release", id);
                continue;
            };

            if let Some(entry) = state.find_library_mut(id) {
                *entry = updated.clone();
            }
            match self.prepare_library(state, &updated) {
                Ok(()) => {}
                Err(e) if !e.is_batch_fatal() => {
                    error!("Error while preparing the release of {}: {}", id, e);
                    if let Some(entry) = state.find_library_mut(id) {
                        *entry = library.clone();
                    }
                    self.repo.clean_working_tree()?;
                    result
                        .content
                        .add_error(format!("Error while preparing the release of {}", id));
                    continue;
                }
                Err(e) => return Err(e),
            }

            let notes = format_release_notes(&updated.changes);
            save_state(self.repo.dir(), state)?;
            let message = release_commit_message(release_id, id, &updated.version, &notes);
            let commit = self.repo.add_all_and_commit(&message)?;
            info!("Committed release {} of {} as {}", updated.version, id, commit);

            result
                .content
                .add_success(format!("Release {} {}", id, updated.version));
            result.notes.push(ReleaseNote {
                library_id: id.clone(),
                version: updated.version.clone(),
                notes,
            });
        }
        Ok(result)
    }

    /// The library with its release fields filled in, or `None`.
    fn next_release(&self, library: &LibraryState, named: bool) -> Result<Option<LibraryState>> {
        let tag = release_tag(&library.id, &library.version);
        let since = if !library.version.is_empty() && self.repo.revision_exists(&tag)? {
            Some(tag)
        } else {
            None
        };
        let commits = self
            .repo
            .commits_for_paths(&library.source_roots, since.as_deref())?;
        let conventional: Vec<ConventionalCommit> = commits
            .iter()
            .flat_map(|c| parse_message(&c.message, &c.hash))
            .collect();

        let explicit = if named {
            self.config.library_version.as_deref()
        } else {
            None
        };
        let next = determine_next_version(
            &conventional,
            &library.version,
            &library.id,
            explicit,
            self.librarian_config.next_version(&library.id),
        )?;
        let Some(next) = next else {
            if named {
                return Err(Error::NothingToRelease {
                    library: library.id.clone(),
                });
            }
            return Ok(None);
        };

        let mut updated = library.clone();
        updated.previous_version = library.version.clone();
        updated.version = next;
        updated.changes = conventional.iter().map(ConventionalCommit::to_change).collect();
        updated.release_triggered = true;
        Ok(Some(updated))
    }

    /// Runs the container's release-init in an isolated copy of the
    /// library and brings the results back.
    fn prepare_library(&self, state: &LibrarianState, library: &LibraryState) -> Result<()> {
        let output_dir = self.config.work_root.join("release-init").join(&library.id);
        if output_dir.exists() {
            fs::remove_dir_all(&output_dir)?;
        }
        fs::create_dir_all(&output_dir)?;
        sync::copy_library_files(state, &output_dir, &library.id, self.repo.dir())?;
        sync::copy_global_allowlist(self.librarian_config, &output_dir, self.repo.dir(), true)?;

        let state_dir = self
            .config
            .work_root
            .join("librarian")
            .join(&library.id)
            .join("release-init");
        write_request(&state_dir, "release-init", library)?;
        self.container.release_init(&ReleaseInitRequest {
            library_id: library.id.clone(),
            repo_dir: self.repo.dir().to_path_buf(),
            output_dir: output_dir.clone(),
            state_dir,
        })?;

        sync::copy_library_files(state, self.repo.dir(), &library.id, &output_dir)?;
        sync::copy_global_allowlist(self.librarian_config, self.repo.dir(), &output_dir, false)?;
        Ok(())
    }

    /// Builds, tests and packages every library of `release_id` into
    /// `<artifact_root>/<library>`, then writes `release.json`.
    pub fn create_artifacts(
        &self,
        state: &LibrarianState,
        release_id: &str,
        artifact_root: &Path,
    ) -> Result<Vec<LibraryRelease>> {
        let commits = self.repo.commits_for_paths(&[], None)?;
        let releases = releases_from_commits(&commits, release_id)?;
        if releases.is_empty() {
            return Err(Error::Release {
                message: format!("no commits carry release ID {}", release_id),
            });
        }

        for release in &releases {
            let library = state
                .find_library(&release.library_id)
                .ok_or_else(|| Error::LibraryNotFound {
                    id: release.library_id.clone(),
                })?;
            let state_dir = |command: &str| {
                self.config
                    .work_root
                    .join("librarian")
                    .join(&library.id)
                    .join(command)
            };

            info!("Building {} {}", release.library_id, release.version);
            let build_dir = state_dir("build");
            write_request(&build_dir, "build", library)?;
            self.container.build_library(&BuildRequest {
                library_id: library.id.clone(),
                repo_dir: self.repo.dir().to_path_buf(),
                state_dir: build_dir,
            })?;

            let test_dir = state_dir("integration-test");
            write_request(&test_dir, "integration-test", library)?;
            self.container
                .integration_test_library(&IntegrationTestRequest {
                    library_id: library.id.clone(),
                    repo_dir: self.repo.dir().to_path_buf(),
                    state_dir: test_dir,
                })?;

            let package_dir = artifact_root.join(&library.id);
            fs::create_dir_all(&package_dir)?;
            let package_state = state_dir("package");
            write_request(&package_state, "package", library)?;
            self.container.package_library(&PackageRequest {
                library_id: library.id.clone(),
                repo_dir: self.repo.dir().to_path_buf(),
                output_dir: package_dir,
                state_dir: package_state,
            })?;
        }

        write_release_metadata(
            artifact_root,
            &ReleaseMetadata {
                release_id: release_id.to_string(),
                releases: releases.clone(),
            },
        )?;
        info!(
            "Created artifacts for {} libraries in {}",
            releases.len(),
            artifact_root.display()
        );
        Ok(releases)
    }

    /// Publishes the packages recorded in `release.json` and creates a
    /// GitHub release for each.
    pub fn publish_artifacts(
        &self,
        github: &dyn GitHubClient,
        gh_repo: &GitHubRepo,
        artifact_root: &Path,
    ) -> Result<ReleaseMetadata> {
        let metadata = read_release_metadata(artifact_root)?;
        for release in &metadata.releases {
            self.container.publish_library(&PublishRequest {
                library_id: release.library_id.clone(),
                version: release.version.clone(),
                package_dir: artifact_root.join(&release.library_id),
            })?;
            let tag = release_tag(&release.library_id, &release.version);
            github.create_release(
                gh_repo,
                &tag,
                &release.commit_hash,
                &tag,
                &release.release_notes,
            )?;
            info!("Published {}", tag);
        }
        Ok(metadata)
    }
}

/// Creates a tag and GitHub release for every library described in a
/// merged release pull request. Returns the created tags.
pub fn tag_and_release(github: &dyn GitHubClient, pr_url: &str) -> Result<Vec<String>> {
    let pr_ref = PullRequestRef::parse(pr_url)?;
    let pr = github.get_pull_request(&pr_ref.repo, pr_ref.number)?;
    if !pr.merged {
        return Err(Error::Release {
            message: format!("pull request #{} is not merged", pr.number),
        });
    }
    let merge_sha = pr.merge_commit_sha.clone().ok_or_else(|| Error::Release {
        message: format!("pull request #{} has no merge commit", pr.number),
    })?;

    let notes = parse_release_body(&pr.body);
    if notes.is_empty() {
        return Err(Error::Release {
            message: format!("pull request #{} describes no releases", pr.number),
        });
    }
    let mut tags = Vec::new();
    for note in notes {
        let tag = release_tag(&note.library_id, &note.version);
        github.create_release(&pr_ref.repo, &tag, &merge_sha, &tag, &note.notes)?;
        info!("Created release {} at {}", tag, merge_sha);
        tags.push(tag);
    }
    Ok(tags)
}
