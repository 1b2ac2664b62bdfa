//! Release label lifecycle.
//!
//! New release branches get a `cherry-pick to <branch>` label, and only the
//! newest N labels per team survive. Before a label goes away, anything the
//! service created for it (open pull requests, work branches) is cleaned up.

use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use crate::error::GitHubError;
use crate::github::{head_ref, IssueFilter, PullRequestFilter, PullRequestState, RepoRef};
use crate::labels::{
    is_release_branch, label_for_branch, parse_target_branches, work_branch_prefix,
    ReleaseLabel, LABEL_PREFIX,
};
use crate::orchestrator::{Orchestrator, Severity};
use crate::webhooks::sanitize_for_log;

/// Label maintenance for one installation.
pub struct LabelLifecycle {
    orchestrator: Orchestrator,
    retention: i64,
}

impl LabelLifecycle {
    /// `retention <= 0` disables pruning.
    #[must_use]
    pub fn new(orchestrator: Orchestrator, retention: i64) -> Self {
        Self {
            orchestrator,
            retention,
        }
    }

    /// Label a freshly created release branch, then prune old labels.
    #[instrument(skip(self, repo), fields(repo = %repo))]
    pub async fn on_branch_created(&self, repo: &RepoRef, branch: &str) -> Result<(), GitHubError> {
        if !is_release_branch(branch) {
            debug!("Not a release branch");
            return Ok(());
        }

        self.ensure_label(repo, &label_for_branch(branch)).await?;
        let deleted = self.enforce_retention(repo).await?;
        info!(deleted = deleted.len(), "Release branch labelled");
        Ok(())
    }

    /// Create `name` unless it already exists. Returns whether it was created.
    pub async fn ensure_label(&self, repo: &RepoRef, name: &str) -> Result<bool, GitHubError> {
        let github = self.orchestrator.github();

        let existing = github.list_repo_labels(repo).await?;
        if existing.iter().any(|l| l.name.eq_ignore_ascii_case(name)) {
            debug!(label = %name, "Label already exists");
            return Ok(false);
        }

        match github.create_repo_label(repo, name).await {
            Ok(()) => {
                info!(label = %name, "Created label");
                Ok(true)
            }
            // Lost a race with another delivery
            Err(GitHubError::Api { status: 422, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Keep the newest N release labels per team, cleaning up before each delete.
    ///
    /// Returns the labels that were deleted.
    pub async fn enforce_retention(&self, repo: &RepoRef) -> Result<Vec<String>, GitHubError> {
        let Ok(keep) = usize::try_from(self.retention) else {
            return Ok(Vec::new());
        };
        if keep == 0 {
            return Ok(Vec::new());
        }

        let github = self.orchestrator.github();
        let mut families: BTreeMap<String, Vec<ReleaseLabel>> = BTreeMap::new();
        for label in github.list_repo_labels(repo).await? {
            if let Some(parsed) = ReleaseLabel::parse(&label.name) {
                families.entry(parsed.family.clone()).or_default().push(parsed);
            }
        }

        let mut deleted = Vec::new();
        for (family, mut labels) in families {
            if labels.len() <= keep {
                continue;
            }
            labels.sort_by_key(|l| l.number);
            let excess = labels.len() - keep;

            for label in &labels[..excess] {
                if let Err(e) = self.cleanup_for_label(repo, &label.name).await {
                    warn!(label = %label.name, error = %sanitize_for_log(&e.to_string()), "Pre-delete cleanup failed");
                }
                match github.delete_repo_label(repo, &label.name).await {
                    Ok(()) => deleted.push(label.name.clone()),
                    Err(e) => {
                        warn!(label = %label.name, error = %sanitize_for_log(&e.to_string()), "Failed to delete label");
                    }
                }
            }
            debug!(family = %family, kept = keep, pruned = excess, "Retention applied");
        }

        Ok(deleted)
    }

    /// Revert the cherry-pick of every merged pull request carrying `label`.
    ///
    /// Returns the pull requests that were cleaned.
    pub async fn cleanup_for_label(&self, repo: &RepoRef, label: &str) -> Result<Vec<u64>, GitHubError> {
        let Some(target) = label
            .strip_prefix(LABEL_PREFIX)
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            return Ok(Vec::new());
        };

        let github = self.orchestrator.github();
        let filter = IssueFilter {
            state: PullRequestState::All,
            labels: Some(label.to_string()),
        };

        let mut cleaned = Vec::new();
        for issue in github.list_issues(repo, &filter).await? {
            if !issue.is_pull_request() {
                continue;
            }
            let pr = match github.get_pull_request(repo, issue.number).await {
                Ok(pr) if pr.is_merged() => pr,
                _ => continue,
            };
            let Some(sha) = self
                .orchestrator
                .resolve_merge_sha(repo, pr.number, pr.merge_sha())
                .await
            else {
                continue;
            };

            match self.orchestrator.revert_target(repo, target, &sha).await {
                Ok(reversal) => {
                    self.orchestrator
                        .comment(
                            repo,
                            pr.number,
                            &format!(
                                "{} Repo label `{label}` is being removed; cleaned up auto cherry-pick for `{target}` (closed PR and deleted `{}`).",
                                Severity::Info.marker(),
                                reversal.work_branch
                            ),
                        )
                        .await;
                    cleaned.push(pr.number);
                }
                Err(e) => {
                    warn!(pr = pr.number, target = %target, error = %sanitize_for_log(&e.to_string()), "Cleanup for label failed");
                }
            }
        }

        Ok(cleaned)
    }

    /// Clean up after a label was deleted in the UI.
    ///
    /// The label no longer exists, so history cannot be queried by label;
    /// open pull requests are matched by work-branch naming instead.
    #[instrument(skip(self, repo), fields(repo = %repo))]
    pub async fn on_label_deleted(&self, repo: &RepoRef, label: &str) {
        let targets = parse_target_branches([label]);
        if targets.is_empty() {
            return;
        }

        if let Err(e) = self.remove_label_from_open_prs(repo, label).await {
            debug!(error = %sanitize_for_log(&e.to_string()), "Could not detach label from open pull requests");
        }

        for target in targets {
            match self.cleanup_open_for_target(repo, &target).await {
                Ok(closed) => info!(target = %target, closed = closed.len(), "Label deletion cleanup done"),
                Err(e) => {
                    warn!(target = %target, error = %sanitize_for_log(&e.to_string()), "Label deletion cleanup failed");
                }
            }
        }
    }

    /// Detach `label` from open issues and pull requests still showing it.
    pub async fn remove_label_from_open_prs(&self, repo: &RepoRef, label: &str) -> Result<usize, GitHubError> {
        let github = self.orchestrator.github();
        let filter = IssueFilter {
            state: PullRequestState::Open,
            labels: Some(label.to_string()),
        };

        let mut removed = 0;
        for issue in github.list_issues(repo, &filter).await? {
            if github
                .remove_label_from_issue(repo, issue.number, label)
                .await
                .is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Close open work-branch pull requests into `target` and delete their branches.
    pub async fn cleanup_open_for_target(&self, repo: &RepoRef, target: &str) -> Result<Vec<u64>, GitHubError> {
        let github = self.orchestrator.github();
        let prefix = work_branch_prefix(target);

        let mut closed = Vec::new();
        let open = github
            .list_pull_requests(repo, &PullRequestFilter::open_into(target))
            .await?;
        for pr in open.into_iter().filter(|pr| pr.head.name.starts_with(&prefix)) {
            match github
                .set_pull_request_state(repo, pr.number, PullRequestState::Closed)
                .await
            {
                Ok(()) => closed.push(pr.number),
                Err(e) => {
                    warn!(pr = pr.number, error = %sanitize_for_log(&e.to_string()), "Failed to close pull request");
                }
            }

            if let Err(e) = github.delete_ref(repo, &head_ref(&pr.head.name)).await {
                if !e.is_not_found() {
                    warn!(branch = %pr.head.name, error = %sanitize_for_log(&e.to_string()), "Failed to delete work branch");
                }
            }
        }

        Ok(closed)
    }
}
