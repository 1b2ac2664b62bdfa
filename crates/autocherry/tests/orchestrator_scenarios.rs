//! Integration tests for the cherry-pick orchestrator.
//!
//! Each test drives one processing pass against the in-memory GitHub fake
//! and a scripted picker, then inspects comments, pull requests and refs.

mod common;

use autocherry::github::head_ref;
use autocherry::orchestrator::CherryPickOutcome;
use common::{merged_pr, open_pr, orchestrator, repo, FakeGitHub, FakePicker, PickScript, TOKEN};

const SHA: &str = "abc123456789";
const TARGET: &str = "devops-release/0021";
const LABEL: &str = "cherry-pick to devops-release/0021";
const WORK_BRANCH: &str = "autocherry/devops-release-0021/abc1234";

// =============================================================================
// Merged pull request
// =============================================================================

#[tokio::test]
async fn test_successful_cherry_pick_opens_pull_request() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[LABEL]));
    github.add_branch(TARGET);
    github.add_commit(SHA, 1);
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    let reports = orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0].outcome, CherryPickOutcome::Opened { .. }));

    let comments = github.comments();
    assert_eq!(comments.len(), 1);
    let (number, body) = &comments[0];
    assert_eq!(*number, 7);
    assert!(body.starts_with("✅"));
    assert!(body.contains(TARGET));
    assert!(body.contains("https://github.com/acme/widgets/pull/"));

    let created = github.created_pulls();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].head, WORK_BRANCH);
    assert_eq!(created[0].base, TARGET);
    assert_eq!(created[0].title, "Auto cherry-pick: PR #7 — Fix flaky retry");
    assert!(created[0].body.contains(&format!("Commit: `{SHA}`")));

    let calls = picker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].token, TOKEN);
    assert_eq!(calls[0].sha, SHA);
}

#[tokio::test]
async fn test_noop_cherry_pick_comments_without_pull_request() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[LABEL]));
    github.add_branch(TARGET);
    let picker = FakePicker::new(github.clone(), PickScript::NoOp);

    let reports = orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert_eq!(reports[0].outcome, CherryPickOutcome::NoOp);
    let comments = github.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].1.starts_with("ℹ️"));
    assert!(comments[0].1.contains(TARGET));
    assert!(github.created_pulls().is_empty());
}

#[tokio::test]
async fn test_missing_target_skips_git_entirely() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[LABEL]));
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    let reports = orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert_eq!(reports[0].outcome, CherryPickOutcome::TargetMissing);
    let comments = github.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].1.starts_with("⚠️"));
    assert!(comments[0].1.contains(TARGET));
    assert!(picker.calls().is_empty());
}

#[tokio::test]
async fn test_merge_commit_uses_mainline_one() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[LABEL]));
    github.add_branch(TARGET);
    github.add_commit(SHA, 2);
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert_eq!(picker.calls()[0].mainline, Some(1));
}

#[tokio::test]
async fn test_linear_commit_has_no_mainline() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[LABEL]));
    github.add_branch(TARGET);
    github.add_commit(SHA, 1);
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert_eq!(picker.calls()[0].mainline, None);
}

#[tokio::test]
async fn test_commit_lookup_failure_counts_as_linear() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[LABEL]));
    github.add_branch(TARGET);
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert_eq!(picker.calls().len(), 1);
    assert_eq!(picker.calls()[0].mainline, None);
}

#[tokio::test]
async fn test_second_pass_reports_already_open() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[LABEL]));
    github.add_branch(TARGET);
    let picker = FakePicker::new(github.clone(), PickScript::Push);
    let orchestrator = orchestrator(&github, &picker);

    orchestrator.process_merged(&repo(), 7, &[]).await;
    let second = orchestrator.process_merged(&repo(), 7, &[]).await;

    assert!(matches!(second[0].outcome, CherryPickOutcome::AlreadyOpen { .. }));
    assert_eq!(github.created_pulls().len(), 1);
    assert_eq!(picker.calls().len(), 1);

    let comments = github.comments();
    assert_eq!(comments.len(), 2);
    assert!(comments[1].1.starts_with("ℹ️"));
    assert!(comments[1].1.contains("already open"));
}

#[tokio::test]
async fn test_existing_branch_without_pull_request_is_skipped() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[LABEL]));
    github.add_branch(TARGET);
    github.add_branch(WORK_BRANCH);
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    let reports = orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert_eq!(
        reports[0].outcome,
        CherryPickOutcome::BranchExistsNoPr {
            work_branch: WORK_BRANCH.to_string()
        }
    );
    assert!(picker.calls().is_empty());
    assert!(github.comments()[0].1.contains(WORK_BRANCH));
}

#[tokio::test]
async fn test_conflict_reports_manual_instructions() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[LABEL]));
    github.add_branch(TARGET);
    let picker = FakePicker::new(
        github.clone(),
        PickScript::Fail("CONFLICT (content): Merge conflict in src/lib.rs".to_string()),
    );

    orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    let comments = github.comments();
    assert_eq!(comments.len(), 1);
    let body = &comments[0].1;
    assert!(body.starts_with("⚠️"));
    assert!(body.contains(TARGET));
    assert!(body.contains(SHA));
    assert!(body.contains("Merge conflict in src/lib.rs"));
    assert!(github.created_pulls().is_empty());
}

#[tokio::test]
async fn test_pull_request_creation_failure_leaves_branch() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[LABEL]));
    github.add_branch(TARGET);
    github.fail_create_pull();
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    let reports = orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert!(matches!(reports[0].outcome, CherryPickOutcome::CreateFailed { .. }));
    assert!(github.has_ref(&head_ref(WORK_BRANCH)));
    assert!(github.comments()[0].1.starts_with("⚠️"));
}

#[tokio::test]
async fn test_failures_are_isolated_per_target() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(
        7,
        Some(SHA),
        &["cherry-pick to gone-release/0001, devops-release/0021"],
    ));
    github.add_branch(TARGET);
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    let reports = orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].target, "gone-release/0001");
    assert_eq!(reports[0].outcome, CherryPickOutcome::TargetMissing);
    assert!(matches!(reports[1].outcome, CherryPickOutcome::Opened { .. }));

    let comments = github.comments();
    assert_eq!(comments.len(), 2);
    assert!(comments[0].1.starts_with("⚠️"));
    assert!(comments[1].1.starts_with("✅"));
}

#[tokio::test]
async fn test_override_targets_win_over_labels() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(
        7,
        Some(SHA),
        &[LABEL, "cherry-pick to other-release/0002"],
    ));
    github.add_branch(TARGET);
    github.add_branch("other-release/0002");
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    let reports = orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &["other-release/0002".to_string()])
        .await;

    assert_eq!(reports.len(), 1);
    assert_eq!(picker.calls()[0].target, "other-release/0002");
}

#[tokio::test]
async fn test_no_targets_is_silent() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &["bug", "documentation"]));
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    let reports = orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert!(reports.is_empty());
    assert!(github.comments().is_empty());
}

#[tokio::test]
async fn test_merge_sha_falls_back_to_last_commit() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, None, &[LABEL]));
    github.set_pull_commits(7, &["1111111aaaa", "2222222bbbb"]);
    github.add_branch(TARGET);
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert_eq!(picker.calls()[0].sha, "2222222bbbb");
    assert_eq!(
        github.created_pulls()[0].head,
        "autocherry/devops-release-0021/2222222"
    );
}

#[tokio::test]
async fn test_unknown_merge_sha_warns_once() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, None, &[LABEL]));
    github.add_branch(TARGET);
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    let reports = orchestrator(&github, &picker)
        .process_merged(&repo(), 7, &[])
        .await;

    assert!(reports.is_empty());
    let comments = github.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].1.starts_with("⚠️"));
    assert!(comments[0].1.contains("PR #7"));
    assert!(picker.calls().is_empty());
}

// =============================================================================
// Unlabel reversal
// =============================================================================

#[tokio::test]
async fn test_unlabel_closes_pull_request_and_deletes_branch() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[]));
    github.add_branch(WORK_BRANCH);
    github.add_pull(open_pr(50, WORK_BRANCH, TARGET));
    github.add_pull(open_pr(51, "someone/else", TARGET));
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    orchestrator(&github, &picker)
        .process_unlabeled(&repo(), 7, LABEL)
        .await;

    assert_eq!(github.closed_pulls(), vec![50]);
    assert_eq!(github.deleted_refs(), vec![head_ref(WORK_BRANCH)]);

    let comments = github.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].1.starts_with("ℹ️"));
    assert!(comments[0].1.contains(TARGET));
    assert!(comments[0].1.contains(WORK_BRANCH));
}

#[tokio::test]
async fn test_revert_with_branch_already_gone_is_clean() {
    let github = FakeGitHub::new();
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    let reversal = orchestrator(&github, &picker)
        .revert_target(&repo(), TARGET, SHA)
        .await
        .unwrap();

    assert_eq!(reversal.work_branch, WORK_BRANCH);
    assert!(reversal.closed.is_empty());
}

#[tokio::test]
async fn test_unlabel_of_unrelated_label_does_nothing() {
    let github = FakeGitHub::new();
    github.add_pull(merged_pr(7, Some(SHA), &[]));
    let picker = FakePicker::new(github.clone(), PickScript::Push);

    orchestrator(&github, &picker)
        .process_unlabeled(&repo(), 7, "bug")
        .await;

    assert!(github.comments().is_empty());
    assert!(github.deleted_refs().is_empty());
}
