//! # Cherry-pick orchestration
//!
//! One processing pass turns a merged pull request into at most one work
//! branch and one pull request per requested target. Targets are handled in
//! order, one at a time, and a failure on one target never stops the rest.
//!
//! Idempotency comes from the work-branch name alone: it is a pure function
//! of (target, merge commit), so a redelivered event finds the ref and
//! reports "already open" instead of pushing again.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{GitHubError, PickError};
use crate::git::{CherryPicker, GitActor, PickRequest};
use crate::github::{
    head_ref, GitHubApi, Installation, NewPullRequest, PullRequestFilter, PullRequestState,
    RepoRef,
};
use crate::labels::{parse_target_branches, short_sha, work_branch_name};
use crate::webhooks::sanitize_for_log;

/// Comment class, shown as a leading marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
    Warning,
}

impl Severity {
    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            Self::Success => "✅",
            Self::Info => "ℹ️",
            Self::Warning => "⚠️",
        }
    }
}

/// Result of processing one target branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CherryPickOutcome {
    /// Work branch pushed and pull request opened.
    Opened { url: String },
    /// The commit is already on the target.
    NoOp,
    /// A previous pass already opened this pull request.
    AlreadyOpen { url: String },
    /// The work branch exists without an open pull request.
    BranchExistsNoPr { work_branch: String },
    TargetMissing,
    /// Cherry-pick or push failed; a human has to finish it.
    Conflict { detail: String },
    /// Branch pushed but the pull request could not be opened.
    CreateFailed { detail: String },
}

impl CherryPickOutcome {
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Opened { .. } => Severity::Success,
            Self::NoOp | Self::AlreadyOpen { .. } | Self::BranchExistsNoPr { .. } => Severity::Info,
            Self::TargetMissing | Self::Conflict { .. } | Self::CreateFailed { .. } => {
                Severity::Warning
            }
        }
    }

    /// Comment body reported on the source pull request.
    #[must_use]
    pub fn render(&self, target: &str, sha: &str) -> String {
        let marker = self.severity().marker();
        match self {
            Self::Opened { url } => {
                format!("{marker} Auto cherry-pick to `{target}` opened: {url}")
            }
            Self::NoOp => format!(
                "{marker} Auto cherry-pick to `{target}`: no changes needed on target \
                 (commit `{}` already present or empty diff). Skipping PR.",
                short_sha(sha)
            ),
            Self::AlreadyOpen { url } => {
                format!("{marker} Auto cherry-pick to `{target}` is already open: {url}")
            }
            Self::BranchExistsNoPr { work_branch } => format!(
                "{marker} Work branch `{work_branch}` already exists for `{target}`; \
                 skipping duplicate cherry-pick."
            ),
            Self::TargetMissing => format!(
                "{marker} Target branch `{target}` not found; skipping auto cherry-pick."
            ),
            Self::Conflict { detail } => format!(
                "{marker} Auto cherry-pick to `{target}` failed. Please create a patch branch \
                 from `{target}` and cherry-pick `{sha}` manually.\n\nDetails:\n```\n{detail}\n```"
            ),
            Self::CreateFailed { detail } => {
                format!("{marker} Auto cherry-pick to `{target}`: failed to open PR: {detail}")
            }
        }
    }
}

/// Outcome for one target of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: String,
    pub outcome: CherryPickOutcome,
}

/// What an unlabel reversal cleaned up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reversal {
    pub work_branch: String,
    pub closed: Vec<u64>,
}

/// Drives cherry-picks and reversals for one installation.
pub struct Orchestrator {
    github: Arc<dyn GitHubApi>,
    picker: Arc<dyn CherryPicker>,
    token: String,
    actor: GitActor,
}

impl Orchestrator {
    #[must_use]
    pub fn new(installation: Installation, picker: Arc<dyn CherryPicker>, actor: GitActor) -> Self {
        Self {
            github: installation.api,
            picker,
            token: installation.token,
            actor,
        }
    }

    /// Run a full processing pass for a merged pull request.
    ///
    /// `override_targets` wins when non-empty; otherwise the pull request's
    /// current labels are parsed. All failures end up as comments.
    #[instrument(skip(self, repo, override_targets), fields(repo = %repo, pr = number))]
    pub async fn process_merged(
        &self,
        repo: &RepoRef,
        number: u64,
        override_targets: &[String],
    ) -> Vec<TargetReport> {
        let pr = match self.github.get_pull_request(repo, number).await {
            Ok(pr) => pr,
            Err(e) => {
                warn!(error = %sanitize_for_log(&e.to_string()), "Failed to load pull request");
                return Vec::new();
            }
        };

        let targets = if override_targets.is_empty() {
            debug!(labels = ?pr.label_names(), "Parsing labels");
            parse_target_branches(pr.label_names())
        } else {
            override_targets.to_vec()
        };
        if targets.is_empty() {
            debug!("No cherry-pick targets requested");
            return Vec::new();
        }
        info!(targets = ?targets, "Resolved cherry-pick targets");

        let Some(sha) = self
            .resolve_merge_sha(repo, number, pr.merge_sha())
            .await
        else {
            self.comment(
                repo,
                number,
                &format!(
                    "{} Could not determine merged commit SHA for PR #{number}; skipping auto cherry-pick.",
                    Severity::Warning.marker()
                ),
            )
            .await;
            return Vec::new();
        };

        let mainline = self.mainline_for(repo, &sha).await;
        info!(sha = %sha, merge_commit = mainline.is_some(), "Resolved merge commit");

        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            let outcome = self
                .process_target(repo, number, &pr.title, &target, &sha, mainline)
                .await;
            self.comment(repo, number, &outcome.render(&target, &sha))
                .await;
            reports.push(TargetReport { target, outcome });
        }
        reports
    }

    async fn process_target(
        &self,
        repo: &RepoRef,
        number: u64,
        title: &str,
        target: &str,
        sha: &str,
        mainline: Option<u32>,
    ) -> CherryPickOutcome {
        if let Err(e) = self.github.get_ref(repo, &head_ref(target)).await {
            warn!(target = %target, error = %sanitize_for_log(&e.to_string()), "Target branch not found");
            return CherryPickOutcome::TargetMissing;
        }

        let work_branch = work_branch_name(target, sha);
        if self.github.get_ref(repo, &head_ref(&work_branch)).await.is_ok() {
            let filter = PullRequestFilter::open_between(repo, &work_branch, target);
            return match self.github.list_pull_requests(repo, &filter).await {
                Ok(prs) if !prs.is_empty() => CherryPickOutcome::AlreadyOpen {
                    url: prs[0].html_url.clone(),
                },
                _ => CherryPickOutcome::BranchExistsNoPr { work_branch },
            };
        }

        info!(target = %target, sha = %sha, mainline = ?mainline, "Starting cherry-pick");
        let request = PickRequest {
            repo: repo.clone(),
            token: self.token.clone(),
            target: target.to_string(),
            sha: sha.to_string(),
            mainline,
            actor: self.actor.clone(),
        };

        let pushed = match self.picker.pick(&request).await {
            Ok(branch) => branch,
            Err(PickError::NoOp) => {
                info!(target = %target, "Cherry-pick was a no-op");
                return CherryPickOutcome::NoOp;
            }
            Err(PickError::Failed(detail)) => {
                warn!(target = %target, error = %sanitize_for_log(&detail), "Cherry-pick failed");
                return CherryPickOutcome::Conflict { detail };
            }
        };
        info!(target = %target, work_branch = %pushed, "Work branch pushed");

        let new_pr = NewPullRequest {
            title: format!("Auto cherry-pick: PR #{number} — {title}"),
            head: pushed,
            base: target.to_string(),
            body: format!("Automated cherry-pick of PR #{number} into `{target}`.\n\nCommit: `{sha}`"),
        };
        match self.github.create_pull_request(repo, &new_pr).await {
            Ok(opened) => {
                info!(target = %target, url = %opened.html_url, "Opened cherry-pick pull request");
                CherryPickOutcome::Opened {
                    url: opened.html_url,
                }
            }
            Err(e) => {
                warn!(target = %target, error = %sanitize_for_log(&e.to_string()), "Failed to open pull request");
                CherryPickOutcome::CreateFailed {
                    detail: e.to_string(),
                }
            }
        }
    }

    /// Merge commit SHA: the recorded one, else the last commit of the PR.
    pub async fn resolve_merge_sha(
        &self,
        repo: &RepoRef,
        number: u64,
        recorded: Option<&str>,
    ) -> Option<String> {
        if let Some(sha) = recorded.filter(|s| !s.is_empty()) {
            return Some(sha.to_string());
        }

        match self.github.list_pull_request_commits(repo, number).await {
            Ok(commits) => commits
                .last()
                .map(|c| c.sha.clone())
                .filter(|s| !s.is_empty()),
            Err(e) => {
                warn!(pr = number, error = %sanitize_for_log(&e.to_string()), "Failed to list pull request commits");
                None
            }
        }
    }

    /// Mainline parent 1 for merge commits. A failed lookup counts as linear.
    async fn mainline_for(&self, repo: &RepoRef, sha: &str) -> Option<u32> {
        match self.github.get_commit(repo, sha).await {
            Ok(commit) if commit.is_merge() => Some(1),
            Ok(_) => None,
            Err(e) => {
                debug!(sha = %sha, error = %sanitize_for_log(&e.to_string()), "Commit lookup failed; treating as linear");
                None
            }
        }
    }

    /// Close the open pull request for (target, sha) and delete its work branch.
    ///
    /// A work branch that is already gone counts as cleaned.
    #[instrument(skip(self, repo), fields(repo = %repo))]
    pub async fn revert_target(
        &self,
        repo: &RepoRef,
        target: &str,
        sha: &str,
    ) -> Result<Reversal, GitHubError> {
        let work_branch = work_branch_name(target, sha);
        let filter = PullRequestFilter::open_between(repo, &work_branch, target);

        let mut closed = Vec::new();
        for pr in self.github.list_pull_requests(repo, &filter).await? {
            match self
                .github
                .set_pull_request_state(repo, pr.number, PullRequestState::Closed)
                .await
            {
                Ok(()) => closed.push(pr.number),
                Err(e) => {
                    warn!(pr = pr.number, error = %sanitize_for_log(&e.to_string()), "Failed to close pull request");
                }
            }
        }

        match self.github.delete_ref(repo, &head_ref(&work_branch)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(work_branch = %work_branch, "Work branch already gone"),
            Err(e) => return Err(e),
        }

        info!(work_branch = %work_branch, closed = closed.len(), "Reverted cherry-pick");
        Ok(Reversal {
            work_branch,
            closed,
        })
    }

    /// React to a cherry-pick label being removed from a merged pull request.
    #[instrument(skip(self, repo), fields(repo = %repo))]
    pub async fn process_unlabeled(&self, repo: &RepoRef, number: u64, label: &str) {
        let targets = parse_target_branches([label]);
        if targets.is_empty() {
            return;
        }

        let pr = match self.github.get_pull_request(repo, number).await {
            Ok(pr) => pr,
            Err(e) => {
                warn!(error = %sanitize_for_log(&e.to_string()), "Failed to load pull request");
                return;
            }
        };
        let Some(sha) = self.resolve_merge_sha(repo, number, pr.merge_sha()).await else {
            warn!("No merge commit to revert");
            return;
        };

        for target in targets {
            match self.revert_target(repo, &target, &sha).await {
                Ok(reversal) => {
                    self.comment(
                        repo,
                        number,
                        &format!(
                            "{} Removed label for `{target}`: closed any open auto-cherry-pick PR and deleted work branch `{}`.",
                            Severity::Info.marker(),
                            reversal.work_branch
                        ),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(target = %target, error = %sanitize_for_log(&e.to_string()), "Unlabel cleanup failed");
                }
            }
        }
    }

    /// Post a comment, logging instead of failing.
    pub(crate) async fn comment(&self, repo: &RepoRef, number: u64, body: &str) {
        if let Err(e) = self.github.create_comment(repo, number, body).await {
            warn!(pr = number, error = %sanitize_for_log(&e.to_string()), "Failed to post comment");
        }
    }

    pub(crate) fn github(&self) -> &Arc<dyn GitHubApi> {
        &self.github
    }
}
