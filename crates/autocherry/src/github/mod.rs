//! # GitHub capability interface
//!
//! The engine talks to GitHub only through [`GitHubApi`]. Production uses the
//! reqwest-backed [`RestClient`]; tests substitute an in-memory fake.
//! [`InstallationProvider`] hands out a client bound to a fresh installation
//! token for each processing pass.

mod app;
mod client;

pub use app::GitHubApp;
pub use client::RestClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::GitHubError;

/// Repository coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// `owner:branch`, the form the pulls list endpoint expects for `head`.
    #[must_use]
    pub fn qualified_head(&self, branch: &str) -> String {
        format!("{}:{branch}", self.owner)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Label as returned by the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// One side (head or base) of a pull request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub name: String,
    #[serde(default)]
    pub sha: String,
}

/// Pull request as returned by the REST API.
///
/// The list endpoints omit `merged`, so merged state is derived from either
/// field, see [`PullRequest::is_merged`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub merged: Option<bool>,
    #[serde(default)]
    pub merged_at: Option<String>,
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
    #[serde(default)]
    pub head: BranchRef,
    #[serde(default)]
    pub base: BranchRef,
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl PullRequest {
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.merged == Some(true) || self.merged_at.is_some()
    }

    /// Recorded merge commit SHA, treating an empty string as absent.
    #[must_use]
    pub fn merge_sha(&self) -> Option<&str> {
        self.merge_commit_sha.as_deref().filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }
}

/// Issue as returned by the REST API. Pull requests show up here too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl Issue {
    #[must_use]
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

/// Entry in a commit list or a parent list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
}

/// Commit object, read for its parents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    #[serde(default)]
    pub parents: Vec<CommitSummary>,
}

impl Commit {
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitObject {
    pub sha: String,
}

/// Git reference such as `refs/heads/main`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub name: String,
    pub object: GitObject,
}

/// Request body for opening a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

/// `state` query and edit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
    All,
}

impl PullRequestState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

/// Filter for listing pull requests.
#[derive(Debug, Clone)]
pub struct PullRequestFilter {
    pub state: PullRequestState,
    /// `owner:branch`
    pub head: Option<String>,
    pub base: Option<String>,
}

impl PullRequestFilter {
    /// Open pull requests with exactly this head and base.
    #[must_use]
    pub fn open_between(repo: &RepoRef, head: &str, base: &str) -> Self {
        Self {
            state: PullRequestState::Open,
            head: Some(repo.qualified_head(head)),
            base: Some(base.to_string()),
        }
    }

    /// Open pull requests against `base`.
    #[must_use]
    pub fn open_into(base: &str) -> Self {
        Self {
            state: PullRequestState::Open,
            head: None,
            base: Some(base.to_string()),
        }
    }
}

/// Filter for listing issues.
#[derive(Debug, Clone)]
pub struct IssueFilter {
    pub state: PullRequestState,
    /// Single label name; the API treats commas as separators.
    pub labels: Option<String>,
}

/// Narrow view of the GitHub REST API used by the engine.
///
/// Refs are passed fully qualified (`refs/heads/<branch>`).
#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn get_pull_request(&self, repo: &RepoRef, number: u64)
        -> Result<PullRequest, GitHubError>;

    async fn list_pull_requests(
        &self,
        repo: &RepoRef,
        filter: &PullRequestFilter,
    ) -> Result<Vec<PullRequest>, GitHubError>;

    async fn list_pull_request_commits(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<CommitSummary>, GitHubError>;

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        new_pr: &NewPullRequest,
    ) -> Result<PullRequest, GitHubError>;

    async fn set_pull_request_state(
        &self,
        repo: &RepoRef,
        number: u64,
        state: PullRequestState,
    ) -> Result<(), GitHubError>;

    async fn create_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError>;

    async fn list_issues(
        &self,
        repo: &RepoRef,
        filter: &IssueFilter,
    ) -> Result<Vec<Issue>, GitHubError>;

    async fn remove_label_from_issue(
        &self,
        repo: &RepoRef,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError>;

    async fn list_repo_labels(&self, repo: &RepoRef) -> Result<Vec<Label>, GitHubError>;

    async fn create_repo_label(&self, repo: &RepoRef, name: &str) -> Result<(), GitHubError>;

    async fn delete_repo_label(&self, repo: &RepoRef, name: &str) -> Result<(), GitHubError>;

    async fn get_ref(&self, repo: &RepoRef, git_ref: &str) -> Result<GitRef, GitHubError>;

    async fn delete_ref(&self, repo: &RepoRef, git_ref: &str) -> Result<(), GitHubError>;

    async fn get_commit(&self, repo: &RepoRef, sha: &str) -> Result<Commit, GitHubError>;
}

/// A client bound to one installation, plus the token git needs to push.
#[derive(Clone)]
pub struct Installation {
    pub api: Arc<dyn GitHubApi>,
    pub token: String,
}

impl fmt::Debug for Installation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installation")
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Source of per-installation clients.
#[async_trait]
pub trait InstallationProvider: Send + Sync {
    async fn connect(&self, installation_id: u64) -> Result<Installation, GitHubError>;
}

/// `refs/heads/<branch>`
#[must_use]
pub fn head_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}
