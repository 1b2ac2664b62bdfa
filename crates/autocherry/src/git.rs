//! Git Work Executor.
//!
//! Cherry-picks one commit onto a fresh work branch cut from the target and
//! pushes it. Every invocation works in its own scratch directory, removed
//! when the call returns or its future is dropped. Child processes are
//! killed on drop, so an outer timeout stops in-flight git work.

use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::error::PickError;
use crate::github::RepoRef;
use crate::labels::work_branch_name;

/// Substrings git prints when a cherry-pick would produce no change.
///
/// These are tied to git's wording and are the most likely thing to drift
/// between git versions.
const NOOP_MARKERS: [&str; 3] = [
    "previous cherry-pick is now empty",
    "nothing to commit",
    "working tree clean",
];

static TOKEN_IN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"x-access-token:[^@\s]+@").unwrap());

/// Identity recorded on cherry-pick commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitActor {
    pub name: String,
    pub email: String,
}

/// Everything needed for one cherry-pick.
#[derive(Clone)]
pub struct PickRequest {
    pub repo: RepoRef,
    pub token: String,
    pub target: String,
    pub sha: String,
    /// Parent to diff against when `sha` is a merge commit.
    pub mainline: Option<u32>,
    pub actor: GitActor,
}

impl PickRequest {
    #[must_use]
    pub fn work_branch(&self) -> String {
        work_branch_name(&self.target, &self.sha)
    }
}

impl fmt::Debug for PickRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickRequest")
            .field("repo", &self.repo)
            .field("token", &"[REDACTED]")
            .field("target", &self.target)
            .field("sha", &self.sha)
            .field("mainline", &self.mainline)
            .field("actor", &self.actor)
            .finish()
    }
}

/// Produces a pushed work branch or a classified failure.
#[async_trait]
pub trait CherryPicker: Send + Sync {
    /// Returns the name of the pushed work branch.
    async fn pick(&self, request: &PickRequest) -> Result<String, PickError>;
}

/// [`CherryPicker`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitWorkExecutor {
    git_host: String,
    scratch_root: Option<PathBuf>,
}

impl GitWorkExecutor {
    #[must_use]
    pub fn new(git_host: impl Into<String>) -> Self {
        Self {
            git_host: git_host.into(),
            scratch_root: None,
        }
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    #[must_use]
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    fn remote_url(&self, request: &PickRequest) -> String {
        format!(
            "https://x-access-token:{}@{}/{}/{}.git",
            request.token, self.git_host, request.repo.owner, request.repo.name
        )
    }
}

#[async_trait]
impl CherryPicker for GitWorkExecutor {
    #[instrument(skip(self, request), fields(repo = %request.repo, target = %request.target, sha = %request.sha))]
    async fn pick(&self, request: &PickRequest) -> Result<String, PickError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("cherry-");
        let scratch = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| PickError::Failed(format!("failed to create scratch directory: {e}")))?;
        let dir = scratch.path();
        let git = Git {
            dir,
            token: &request.token,
        };

        let work_branch = request.work_branch();
        let target = &request.target;
        let remote_ref = format!("refs/remotes/origin/{target}");

        git.run(&["-c", "protocol.version=2", "init"]).await?;
        git.run(&["remote", "add", "origin", &self.remote_url(request)])
            .await?;
        // Only affects the unborn branch name; older gits may refuse.
        let _ = git.run(&["symbolic-ref", "HEAD", "refs/heads/master"]).await;
        git.run(&["config", "user.name", &request.actor.name]).await?;
        git.run(&["config", "user.email", &request.actor.email])
            .await?;

        git.run(&[
            "fetch",
            "--prune",
            "--no-tags",
            "--depth",
            "200",
            "--filter=blob:none",
            "origin",
            &format!("refs/heads/{target}:{remote_ref}"),
            &request.sha,
        ])
        .await?;

        git.run(&["checkout", "-B", &work_branch, &remote_ref])
            .await?;

        let mainline = request.mainline.map(|m| m.to_string());
        let mut pick_args = vec!["cherry-pick"];
        if let Some(m) = &mainline {
            pick_args.extend(["-m", m.as_str()]);
        }
        pick_args.extend(["-x", request.sha.as_str()]);

        if let Err(output) = git.output(&pick_args).await {
            if is_noop_output(&output) {
                info!("Cherry-pick is a no-op on target");
                return Err(PickError::NoOp);
            }
            let mainline_note = mainline
                .as_ref()
                .map(|m| format!(" (mainline {m})"))
                .unwrap_or_default();
            return Err(PickError::Failed(format!(
                "conflict cherry-picking {} to {target}{mainline_note}: {}",
                request.sha,
                output.trim()
            )));
        }

        git.run(&["push", "-u", "origin", &work_branch]).await?;

        info!(work_branch = %work_branch, "Pushed work branch");
        Ok(work_branch)
    }
}

/// A scratch repository and the token its output must not leak.
struct Git<'a> {
    dir: &'a Path,
    token: &'a str,
}

impl Git<'_> {
    /// Run git; on failure return the redacted combined output.
    async fn output(&self, args: &[&str]) -> Result<String, String> {
        let command_line = redact(&args.join(" "), self.token);
        debug!(command = %command_line, "Running git");

        let output = Command::new("git")
            .args(args)
            .current_dir(self.dir)
            .env("GIT_ASKPASS", "true")
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to run git {command_line}: {e}"))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = redact(&combined, self.token);

        if output.status.success() {
            Ok(combined)
        } else {
            Err(combined)
        }
    }

    /// Run git; failure becomes [`PickError::Failed`] naming the command.
    async fn run(&self, args: &[&str]) -> Result<String, PickError> {
        self.output(args).await.map_err(|output| {
            PickError::Failed(format!(
                "git {} failed: {}",
                redact(&args.join(" "), self.token),
                output.trim()
            ))
        })
    }
}

/// Whether git's output describes an empty cherry-pick.
#[must_use]
pub fn is_noop_output(output: &str) -> bool {
    NOOP_MARKERS.iter().any(|marker| output.contains(marker))
}

/// Remove credentials from text destined for logs or errors.
#[must_use]
pub fn redact(text: &str, token: &str) -> String {
    let masked = TOKEN_IN_URL.replace_all(text, "x-access-token:***@");
    if token.is_empty() {
        masked.into_owned()
    } else {
        masked.replace(token, "[REDACTED]")
    }
}
