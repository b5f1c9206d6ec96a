//! Conventional-commit parsing.
//!
//! A single git commit may carry several conventional messages: regenerated
//! code is committed with the concatenated messages of every API source
//! commit it incorporates. [`parse_message`] therefore returns one
//! [`ConventionalCommit`] per header found in the message. A header opens
//! a paragraph and names one of the [`COMMIT_TYPES`].

use crate::state::Change;
use regex::Regex;
use std::sync::OnceLock;

/// Version increment implied by a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bump {
    None,
    Patch,
    Minor,
    Major,
}

/// One conventional message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionalCommit {
    pub kind: String,
    pub scope: Option<String>,
    pub subject: String,
    pub body: String,
    pub breaking: bool,
    pub footers: Vec<(String, String)>,
    pub commit_hash: String,
}

impl ConventionalCommit {
    /// The bump this message requires on its own.
    pub fn bump(&self) -> Bump {
        if self.breaking {
            Bump::Major
        } else {
            match self.kind.as_str() {
                "feat" => Bump::Minor,
                "fix" => Bump::Patch,
                _ => Bump::None,
            }
        }
    }

    /// Converts to the record persisted in library state.
    pub fn to_change(&self) -> Change {
        Change {
            kind: self.kind.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            commit_hash: self.commit_hash.clone(),
            breaking: self.breaking,
        }
    }
}

/// Commit types recognized in headers.
pub const COMMIT_TYPES: &[&str] = &[
    "feat", "fix", "perf", "revert", "docs", "chore", "refactor", "style", "test", "build",
    "ci", "deps",
];

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<kind>[a-z]+)(?:\((?P<scope>[^)]*)\))?(?P<bang>!)?: (?P<subject>.+)$")
            .expect("valid header regex")
    })
}

fn footer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<key>BREAKING[ -]CHANGE|[A-Z][A-Za-z0-9-]*): (?P<value>.*)$")
            .expect("valid footer regex")
    })
}

/// Parses every conventional message in a commit message.
///
/// Lines before the first header are ignored; a message without any header
/// yields an empty list. A header-like line inside a paragraph belongs to
/// the body.
pub fn parse_message(message: &str, commit_hash: &str) -> Vec<ConventionalCommit> {
    let mut commits: Vec<ConventionalCommit> = Vec::new();
    let mut body_lines: Vec<&str> = Vec::new();

    fn finish(commit: Option<&mut ConventionalCommit>, body_lines: &mut Vec<&str>) {
        if let Some(commit) = commit {
            commit.body = body_lines.join("\n").trim().to_string();
        }
        body_lines.clear();
    }

    let mut paragraph_start = true;
    for line in message.lines() {
        let at_paragraph_start = paragraph_start;
        paragraph_start = line.trim().is_empty();
        let header = header_regex()
            .captures(line)
            .filter(|caps| at_paragraph_start && COMMIT_TYPES.contains(&&caps["kind"]));
        if let Some(caps) = header {
            finish(commits.last_mut(), &mut body_lines);
            commits.push(ConventionalCommit {
                kind: caps["kind"].to_string(),
                scope: caps.name("scope").map(|m| m.as_str().to_string()),
                subject: caps["subject"].trim().to_string(),
                body: String::new(),
                breaking: caps.name("bang").is_some(),
                footers: Vec::new(),
                commit_hash: commit_hash.to_string(),
            });
            continue;
        }
        let Some(current) = commits.last_mut() else {
            continue;
        };
        if let Some(caps) = footer_regex().captures(line) {
            let key = caps["key"].to_string();
            if key.starts_with("BREAKING") {
                current.breaking = true;
            }
            current.footers.push((key, caps["value"].to_string()));
        } else {
            body_lines.push(line);
        }
    }
    finish(commits.last_mut(), &mut body_lines);
    commits
}

/// The largest bump required by any of the commits.
pub fn max_bump(commits: &[ConventionalCommit]) -> Bump {
    commits.iter().map(|c| c.bump()).max().unwrap_or(Bump::None)
}

/// Extracts `Key: value` trailer lines for the given keys, in message order.
pub fn trailer_values<'a>(message: &'a str, key: &str) -> Vec<&'a str> {
    let prefix = format!("{}: ", key);
    message
        .lines()
        .filter_map(|line| line.strip_prefix(prefix.as_str()))
        .map(str::trim)
        .collect()
}
