//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use autocherry::error::{GitHubError, PickError};
use autocherry::git::{CherryPicker, GitActor, PickRequest};
use autocherry::github::{
    head_ref, BranchRef, Commit, CommitSummary, GitHubApi, GitObject, GitRef, Installation,
    InstallationProvider, Issue, IssueFilter, Label, NewPullRequest, PullRequest,
    PullRequestFilter, PullRequestState, RepoRef,
};
use autocherry::orchestrator::Orchestrator;

pub const TOKEN: &str = "ghs_test_token";

pub fn repo() -> RepoRef {
    RepoRef::new("acme", "widgets")
}

pub fn actor() -> GitActor {
    GitActor {
        name: "stabilisation-bot".to_string(),
        email: "stabilisation-bot@users.noreply.github.com".to_string(),
    }
}

fn not_found() -> GitHubError {
    GitHubError::Api {
        status: 404,
        message: "Not Found".to_string(),
    }
}

pub fn label(name: &str) -> Label {
    Label {
        name: name.to_string(),
        color: "ededed".to_string(),
    }
}

/// A merged pull request as GitHub returns it from `GET /pulls/{n}`.
pub fn merged_pr(number: u64, sha: Option<&str>, labels: &[&str]) -> PullRequest {
    PullRequest {
        number,
        title: "Fix flaky retry".to_string(),
        state: "closed".to_string(),
        html_url: format!("https://github.com/acme/widgets/pull/{number}"),
        merged: Some(true),
        merged_at: Some("2024-05-01T10:00:00Z".to_string()),
        merge_commit_sha: sha.map(str::to_string),
        head: BranchRef {
            name: format!("feature-{number}"),
            sha: String::new(),
        },
        base: BranchRef {
            name: "main".to_string(),
            sha: String::new(),
        },
        labels: labels.iter().map(|l| label(l)).collect(),
    }
}

/// An open pull request from `head` into `base`.
pub fn open_pr(number: u64, head: &str, base: &str) -> PullRequest {
    PullRequest {
        number,
        title: format!("PR {number}"),
        state: "open".to_string(),
        html_url: format!("https://github.com/acme/widgets/pull/{number}"),
        head: BranchRef {
            name: head.to_string(),
            sha: String::new(),
        },
        base: BranchRef {
            name: base.to_string(),
            sha: String::new(),
        },
        ..PullRequest::default()
    }
}

// =============================================================================
// FakeGitHub
// =============================================================================

#[derive(Default)]
struct State {
    pulls: BTreeMap<u64, PullRequest>,
    pull_commits: HashMap<u64, Vec<String>>,
    commits: HashMap<String, Commit>,
    refs: BTreeSet<String>,
    labels: Vec<Label>,
    issues: Vec<Issue>,
    comments: Vec<(u64, String)>,
    created_pulls: Vec<NewPullRequest>,
    closed_pulls: Vec<u64>,
    deleted_refs: Vec<String>,
    created_labels: Vec<String>,
    deleted_labels: Vec<String>,
    removed_issue_labels: Vec<(u64, String)>,
    fail_create_pull: bool,
    next_number: u64,
}

/// In-memory stand-in for the GitHub REST API.
#[derive(Default)]
pub struct FakeGitHub {
    state: Mutex<State>,
}

impl FakeGitHub {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().unwrap().next_number = 100;
        Arc::new(fake)
    }

    pub fn add_branch(&self, branch: &str) {
        self.state.lock().unwrap().refs.insert(head_ref(branch));
    }

    pub fn add_pull(&self, pr: PullRequest) {
        self.state.lock().unwrap().pulls.insert(pr.number, pr);
    }

    pub fn set_pull_commits(&self, number: u64, shas: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .pull_commits
            .insert(number, shas.iter().map(|s| (*s).to_string()).collect());
    }

    pub fn add_commit(&self, sha: &str, parents: usize) {
        let commit = Commit {
            sha: sha.to_string(),
            parents: (0..parents)
                .map(|i| CommitSummary {
                    sha: format!("parent{i}"),
                })
                .collect(),
        };
        self.state
            .lock()
            .unwrap()
            .commits
            .insert(sha.to_string(), commit);
    }

    pub fn add_label(&self, name: &str) {
        self.state.lock().unwrap().labels.push(label(name));
    }

    /// Register an issue (or PR, when `pull_request` is set) carrying labels.
    pub fn add_issue(&self, number: u64, state: &str, labels: &[&str], pull_request: bool) {
        self.state.lock().unwrap().issues.push(Issue {
            number,
            state: state.to_string(),
            labels: labels.iter().map(|l| label(l)).collect(),
            pull_request: pull_request.then(|| serde_json::json!({ "url": "https://x" })),
        });
    }

    pub fn fail_create_pull(&self) {
        self.state.lock().unwrap().fail_create_pull = true;
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().comments.clone()
    }

    pub fn created_pulls(&self) -> Vec<NewPullRequest> {
        self.state.lock().unwrap().created_pulls.clone()
    }

    pub fn closed_pulls(&self) -> Vec<u64> {
        self.state.lock().unwrap().closed_pulls.clone()
    }

    pub fn deleted_refs(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_refs.clone()
    }

    pub fn has_ref(&self, git_ref: &str) -> bool {
        self.state.lock().unwrap().refs.contains(git_ref)
    }

    pub fn label_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .labels
            .iter()
            .map(|l| l.name.clone())
            .collect()
    }

    pub fn created_labels(&self) -> Vec<String> {
        self.state.lock().unwrap().created_labels.clone()
    }

    pub fn deleted_labels(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_labels.clone()
    }

    pub fn removed_issue_labels(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().removed_issue_labels.clone()
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn get_pull_request(
        &self,
        _repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequest, GitHubError> {
        self.state
            .lock()
            .unwrap()
            .pulls
            .get(&number)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn list_pull_requests(
        &self,
        repo: &RepoRef,
        filter: &PullRequestFilter,
    ) -> Result<Vec<PullRequest>, GitHubError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pulls
            .values()
            .filter(|pr| match filter.state {
                PullRequestState::All => true,
                s => pr.state == s.as_str(),
            })
            .filter(|pr| {
                filter
                    .head
                    .as_ref()
                    .is_none_or(|head| *head == repo.qualified_head(&pr.head.name))
            })
            .filter(|pr| filter.base.as_ref().is_none_or(|base| *base == pr.base.name))
            .cloned()
            .collect())
    }

    async fn list_pull_request_commits(
        &self,
        _repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<CommitSummary>, GitHubError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pull_commits
            .get(&number)
            .map(|shas| {
                shas.iter()
                    .map(|sha| CommitSummary { sha: sha.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_pull_request(
        &self,
        _repo: &RepoRef,
        new_pr: &NewPullRequest,
    ) -> Result<PullRequest, GitHubError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create_pull {
            return Err(GitHubError::Api {
                status: 422,
                message: "Validation Failed".to_string(),
            });
        }

        state.next_number += 1;
        let pr = open_pr(state.next_number, &new_pr.head, &new_pr.base);
        state.created_pulls.push(new_pr.clone());
        state.pulls.insert(pr.number, pr.clone());
        Ok(pr)
    }

    async fn set_pull_request_state(
        &self,
        _repo: &RepoRef,
        number: u64,
        pr_state: PullRequestState,
    ) -> Result<(), GitHubError> {
        let mut state = self.state.lock().unwrap();
        let pr = state.pulls.get_mut(&number).ok_or_else(not_found)?;
        pr.state = pr_state.as_str().to_string();
        if pr_state == PullRequestState::Closed {
            state.closed_pulls.push(number);
        }
        Ok(())
    }

    async fn create_comment(
        &self,
        _repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        self.state
            .lock()
            .unwrap()
            .comments
            .push((number, body.to_string()));
        Ok(())
    }

    async fn list_issues(
        &self,
        _repo: &RepoRef,
        filter: &IssueFilter,
    ) -> Result<Vec<Issue>, GitHubError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .issues
            .iter()
            .filter(|issue| match filter.state {
                PullRequestState::All => true,
                s => issue.state == s.as_str(),
            })
            .filter(|issue| {
                filter
                    .labels
                    .as_ref()
                    .is_none_or(|wanted| issue.labels.iter().any(|l| l.name == *wanted))
            })
            .cloned()
            .collect())
    }

    async fn remove_label_from_issue(
        &self,
        _repo: &RepoRef,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError> {
        let mut state = self.state.lock().unwrap();
        state.removed_issue_labels.push((number, label.to_string()));
        for issue in state.issues.iter_mut().filter(|i| i.number == number) {
            issue.labels.retain(|l| l.name != label);
        }
        Ok(())
    }

    async fn list_repo_labels(&self, _repo: &RepoRef) -> Result<Vec<Label>, GitHubError> {
        Ok(self.state.lock().unwrap().labels.clone())
    }

    async fn create_repo_label(&self, _repo: &RepoRef, name: &str) -> Result<(), GitHubError> {
        let mut state = self.state.lock().unwrap();
        if state.labels.iter().any(|l| l.name == name) {
            return Err(GitHubError::Api {
                status: 422,
                message: "already_exists".to_string(),
            });
        }
        state.labels.push(label(name));
        state.created_labels.push(name.to_string());
        Ok(())
    }

    async fn delete_repo_label(&self, _repo: &RepoRef, name: &str) -> Result<(), GitHubError> {
        let mut state = self.state.lock().unwrap();
        let before = state.labels.len();
        state.labels.retain(|l| l.name != name);
        if state.labels.len() == before {
            return Err(not_found());
        }
        state.deleted_labels.push(name.to_string());
        Ok(())
    }

    async fn get_ref(&self, _repo: &RepoRef, git_ref: &str) -> Result<GitRef, GitHubError> {
        if self.state.lock().unwrap().refs.contains(git_ref) {
            Ok(GitRef {
                name: git_ref.to_string(),
                object: GitObject {
                    sha: "0000000".to_string(),
                },
            })
        } else {
            Err(not_found())
        }
    }

    async fn delete_ref(&self, _repo: &RepoRef, git_ref: &str) -> Result<(), GitHubError> {
        let mut state = self.state.lock().unwrap();
        if !state.refs.remove(git_ref) {
            return Err(not_found());
        }
        state.deleted_refs.push(git_ref.to_string());
        Ok(())
    }

    async fn get_commit(&self, _repo: &RepoRef, sha: &str) -> Result<Commit, GitHubError> {
        self.state
            .lock()
            .unwrap()
            .commits
            .get(sha)
            .cloned()
            .ok_or_else(not_found)
    }
}

// =============================================================================
// FakePicker
// =============================================================================

/// What the next cherry-pick should do.
#[derive(Debug, Clone)]
pub enum PickScript {
    /// Push the work branch to the fake remote.
    Push,
    NoOp,
    Fail(String),
    Panic,
}

/// Scripted [`CherryPicker`] that records every request.
pub struct FakePicker {
    github: Arc<FakeGitHub>,
    script: Mutex<PickScript>,
    calls: Mutex<Vec<PickRequest>>,
}

impl FakePicker {
    pub fn new(github: Arc<FakeGitHub>, script: PickScript) -> Arc<Self> {
        Arc::new(Self {
            github,
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<PickRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CherryPicker for FakePicker {
    async fn pick(&self, request: &PickRequest) -> Result<String, PickError> {
        self.calls.lock().unwrap().push(request.clone());
        let script = self.script.lock().unwrap().clone();
        match script {
            PickScript::Push => {
                let work_branch = request.work_branch();
                self.github.add_branch(&work_branch);
                Ok(work_branch)
            }
            PickScript::NoOp => Err(PickError::NoOp),
            PickScript::Fail(detail) => Err(PickError::Failed(detail)),
            PickScript::Panic => panic!("picker exploded"),
        }
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// Hands out the same fake for every installation.
pub struct FakeInstallations {
    github: Arc<FakeGitHub>,
}

impl FakeInstallations {
    pub fn new(github: Arc<FakeGitHub>) -> Arc<Self> {
        Arc::new(Self { github })
    }
}

#[async_trait]
impl InstallationProvider for FakeInstallations {
    async fn connect(&self, _installation_id: u64) -> Result<Installation, GitHubError> {
        Ok(installation(&self.github))
    }
}

pub fn installation(github: &Arc<FakeGitHub>) -> Installation {
    Installation {
        api: github.clone(),
        token: TOKEN.to_string(),
    }
}

pub fn orchestrator(github: &Arc<FakeGitHub>, picker: &Arc<FakePicker>) -> Orchestrator {
    Orchestrator::new(installation(github), picker.clone(), actor())
}
