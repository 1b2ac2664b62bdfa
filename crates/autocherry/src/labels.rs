//! Label grammar and branch naming.
//!
//! Everything in here is pure: labels in, branch names out. The work-branch
//! name is the idempotency key for the whole service, so the orchestrator,
//! the unlabel reversal and the retention cascade all derive it from here.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Prefix every work branch starts with.
pub const WORK_BRANCH_PREFIX: &str = "autocherry";

/// Canonical prefix of auto-created release labels.
pub const LABEL_PREFIX: &str = "cherry-pick to ";

/// `cherry-pick to X`, `cherrypick to X`, `Cherry Pick to X, Y` ...
static CHERRY_TO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*cherry[\s-]?pick\s+to\s+(.+?)\s*$").unwrap());

/// Release branches that get a label of their own, e.g. `devops-release/0021`.
static RELEASE_BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z0-9-]+-release)/(\d{4})$").unwrap());

/// Release labels subject to retention.
static RELEASE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^cherry-pick to ([a-z0-9-]+-release)/(\d+)$").unwrap());

/// Extract target branch names from a set of PR labels.
///
/// Order is first-seen across all labels; duplicates are dropped and any
/// `refs/heads/` prefix is stripped. Labels outside the grammar are ignored.
pub fn parse_target_branches<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for label in labels {
        let Some(caps) = CHERRY_TO.captures(label.as_ref().trim()) else {
            continue;
        };

        for candidate in split_branches(&caps[1]) {
            let branch = normalize_branch(candidate);
            if branch.is_empty() {
                continue;
            }
            if seen.insert(branch.to_string()) {
                out.push(branch.to_string());
            }
        }
    }

    out
}

/// Branch list after `to`: commas and/or whitespace separate entries.
fn split_branches(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').flat_map(str::split_whitespace)
}

/// Trim and drop a leading `refs/heads/`. Case is preserved.
#[must_use]
pub fn normalize_branch(name: &str) -> &str {
    let trimmed = name.trim();
    trimmed.strip_prefix("refs/heads/").unwrap_or(trimmed).trim()
}

/// First seven characters of a commit SHA, or the whole SHA when shorter.
#[must_use]
pub fn short_sha(sha: &str) -> &str {
    sha.char_indices().nth(7).map_or(sha, |(idx, _)| &sha[..idx])
}

/// Target name with `/` replaced, suitable as one path segment of a branch.
#[must_use]
pub fn sanitize_target(target: &str) -> String {
    target.replace('/', "-")
}

/// `autocherry/<target-with-dashes>/<short-sha>`.
#[must_use]
pub fn work_branch_name(target: &str, sha: &str) -> String {
    format!(
        "{WORK_BRANCH_PREFIX}/{}/{}",
        sanitize_target(target),
        short_sha(sha)
    )
}

/// Head-branch prefix shared by every work branch for `target`.
#[must_use]
pub fn work_branch_prefix(target: &str) -> String {
    format!("{WORK_BRANCH_PREFIX}/{}/", sanitize_target(target))
}

/// Label name for a release branch.
#[must_use]
pub fn label_for_branch(branch: &str) -> String {
    format!("{LABEL_PREFIX}{branch}")
}

/// Whether a newly created branch should receive its own cherry-pick label.
#[must_use]
pub fn is_release_branch(branch: &str) -> bool {
    RELEASE_BRANCH.is_match(branch)
}

/// A release label split into its team family and numeric suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLabel {
    pub name: String,
    pub family: String,
    pub number: u64,
}

impl ReleaseLabel {
    /// Parse `cherry-pick to <team>-release/<n>`; anything else is `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let caps = RELEASE_LABEL.captures(name)?;
        let number = caps[2].parse().ok()?;
        Some(Self {
            name: name.to_string(),
            family: caps[1].to_string(),
            number,
        })
    }

    /// Branch the label targets.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.name[LABEL_PREFIX.len()..]
    }
}
