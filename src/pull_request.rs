//! # Pull Request Content
//!
//! Generation runs accumulate a [`PullRequestContent`] across the batch:
//! one success line per commit created and one sanitized line per failure.
//! Release runs describe each library in a `<details>` block, which
//! [`parse_release_body`] reads back when the merged pull request is tagged.
//!
//! Release commits carry three trailers that tie them to a release batch:
//!
//! ```text
//! Librarian-Release-ID: 6f1c...
//! Librarian-Release-Library: google-cloud-secretmanager-v1
//! Librarian-Release-Version: 1.3.0
//! ```
//!
//! [`releases_from_commits`] turns such commits into [`LibraryRelease`]
//! records.

use crate::conventional::trailer_values;
use crate::error::{Error, Result};
use crate::git::Commit;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const RELEASE_ID_TRAILER: &str = "Librarian-Release-ID";
pub const RELEASE_LIBRARY_TRAILER: &str = "Librarian-Release-Library";
pub const RELEASE_VERSION_TRAILER: &str = "Librarian-Release-Version";

/// Outcome lines accumulated over one batch.
///
/// Each entry of `successes` corresponds to exactly one commit, in commit
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequestContent {
    pub successes: Vec<String>,
    pub errors: Vec<String>,
}

impl PullRequestContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_success(&mut self, line: impl Into<String>) {
        self.successes.push(line.into());
    }

    pub fn add_error(&mut self, line: impl Into<String>) {
        self.errors.push(line.into());
    }

    pub fn is_empty(&self) -> bool {
        self.successes.is_empty() && self.errors.is_empty()
    }

    /// Keeps the first `cap` successes and returns the rest. A cap of zero
    /// means unlimited.
    pub fn split_at_cap(&mut self, cap: usize) -> Vec<String> {
        if cap == 0 || self.successes.len() <= cap {
            return Vec::new();
        }
        self.successes.split_off(cap)
    }
}

/// Renders the generation pull request description. Empty sections are
/// omitted.
pub fn render_generation_body(content: &PullRequestContent, excess: &[String]) -> String {
    let mut sections = Vec::new();
    if !content.successes.is_empty() {
        sections.push(render_section("Changes included", &content.successes));
    }
    if !content.errors.is_empty() {
        sections.push(render_section("Errors", &content.errors));
    }
    if !excess.is_empty() {
        sections.push(render_section(
            "Changes not included (commit limit reached)",
            excess,
        ));
    }
    sections.join("\n")
}

fn render_section(heading: &str, lines: &[String]) -> String {
    let mut section = format!("## {}\n\n", heading);
    for line in lines {
        section.push_str("- ");
        section.push_str(line);
        section.push('\n');
    }
    section
}

/// Title of a pull request opened by librarian.
pub fn pull_request_title(action: &str, stamp: &str) -> String {
    format!("chore: librarian {} pull request: {}", action, stamp)
}

/// Release notes for one library as shown in a release pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseNote {
    pub library_id: String,
    pub version: String,
    pub notes: String,
}

/// Renders the release pull request description.
pub fn render_release_body(release_id: &str, notes: &[ReleaseNote]) -> String {
    let mut body = format!("{}: {}\n", RELEASE_ID_TRAILER, release_id);
    for note in notes {
        body.push_str(&format!(
            "\n<details><summary>{}: {}</summary>\n\n{}\n\n</details>\n",
            note.library_id,
            note.version,
            note.notes.trim()
        ));
    }
    body
}

fn details_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<details>\s*<summary>(?P<summary>.*?)</summary>(?P<body>.*?)</details>")
            .expect("valid details regex")
    })
}

fn summary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<library>[^\s:]+):\s+v?(?P<version>\d+\.\d+\.\d+\S*)$")
            .expect("valid summary regex")
    })
}

/// Parses the `<details>` blocks of a release pull request body, in
/// document order. Blocks whose summary lacks a valid version are skipped.
pub fn parse_release_body(body: &str) -> Vec<ReleaseNote> {
    let mut notes = Vec::new();
    for caps in details_regex().captures_iter(body) {
        let summary = caps["summary"].trim();
        let Some(parts) = summary_regex().captures(summary) else {
            warn!("Ignoring release block with malformed summary '{}'", summary);
            continue;
        };
        if semver::Version::parse(&parts["version"]).is_err() {
            warn!("Ignoring release block with invalid version '{}'", summary);
            continue;
        }
        notes.push(ReleaseNote {
            library_id: parts["library"].to_string(),
            version: parts["version"].to_string(),
            notes: caps["body"].trim().to_string(),
        });
    }
    notes
}

/// The release ID recorded in a release pull request body, if any.
pub fn release_id_from_body(body: &str) -> Option<String> {
    trailer_values(body, RELEASE_ID_TRAILER)
        .first()
        .map(|id| id.to_string())
}

/// One released library, derived from a release commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryRelease {
    pub library_id: String,
    pub release_id: String,
    pub version: String,
    pub commit_hash: String,
    pub release_notes: String,
}

/// Title line of a release commit.
pub fn release_commit_title(library_id: &str, version: &str) -> String {
    format!("chore: release {} {}", library_id, version)
}

/// Builds the full message of a release commit.
pub fn release_commit_message(
    release_id: &str,
    library_id: &str,
    version: &str,
    notes: &str,
) -> String {
    let mut message = release_commit_title(library_id, version);
    message.push_str("\n\n");
    if !notes.trim().is_empty() {
        message.push_str(notes.trim());
        message.push_str("\n\n");
    }
    message.push_str(&format!("{}: {}\n", RELEASE_ID_TRAILER, release_id));
    message.push_str(&format!("{}: {}\n", RELEASE_LIBRARY_TRAILER, library_id));
    message.push_str(&format!("{}: {}\n", RELEASE_VERSION_TRAILER, version));
    message
}

/// Release notes inside a release commit message: everything except the
/// release trailers and the synthesized title with its blank line.
pub fn release_notes(message: &str, library_id: &str, version: &str) -> String {
    let title = release_commit_title(library_id, version);
    let mut lines: Vec<&str> = message.lines().collect();
    if lines.first() == Some(&title.as_str()) {
        let skip = if lines.get(1).is_some_and(|l| l.trim().is_empty()) {
            2
        } else {
            1
        };
        lines.drain(..skip);
    }
    let prefixes = [
        format!("{}:", RELEASE_ID_TRAILER),
        format!("{}:", RELEASE_LIBRARY_TRAILER),
        format!("{}:", RELEASE_VERSION_TRAILER),
    ];
    lines
        .into_iter()
        .filter(|line| !prefixes.iter().any(|p| line.starts_with(p.as_str())))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Extracts the releases belonging to `release_id` from `commits`.
///
/// A commit tagged with the release ID but missing its library or version
/// trailer is an error.
pub fn releases_from_commits(commits: &[Commit], release_id: &str) -> Result<Vec<LibraryRelease>> {
    let mut releases = Vec::new();
    for commit in commits {
        if !trailer_values(&commit.message, RELEASE_ID_TRAILER).contains(&release_id) {
            continue;
        }
        let library = trailer_values(&commit.message, RELEASE_LIBRARY_TRAILER);
        let version = trailer_values(&commit.message, RELEASE_VERSION_TRAILER);
        let (Some(library), Some(version)) = (library.first(), version.first()) else {
            return Err(Error::Release {
                message: format!(
                    "commit {} is part of release {} but lacks {} or {}",
                    commit.hash, release_id, RELEASE_LIBRARY_TRAILER, RELEASE_VERSION_TRAILER
                ),
            });
        };
        releases.push(LibraryRelease {
            library_id: library.to_string(),
            release_id: release_id.to_string(),
            version: version.to_string(),
            commit_hash: commit.hash.clone(),
            release_notes: release_notes(&commit.message, library, version),
        });
    }
    Ok(releases)
}
