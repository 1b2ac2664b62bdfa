//! Event routing.
//!
//! [`Processor::accept`] verifies and classifies a delivery synchronously,
//! then hands the work to a detached task so the transport can answer
//! immediately. Each task has its own timeout, and a panic inside one is
//! logged by a supervising task instead of taking the process down.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::git::{CherryPicker, GitActor};
use crate::github::{InstallationProvider, Label, RepoRef};
use crate::labels::{is_release_branch, parse_target_branches};
use crate::lifecycle::LabelLifecycle;
use crate::orchestrator::Orchestrator;
use crate::webhooks::{sanitize_for_log, verify_signature};

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Repository {
    name: String,
    owner: Account,
}

impl Repository {
    fn to_ref(&self) -> RepoRef {
        RepoRef::new(&self.owner.login, &self.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct InstallationRef {
    id: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct PullRequestPayload {
    number: u64,
    #[serde(default)]
    merged: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct PullRequestEvent {
    action: String,
    pull_request: PullRequestPayload,
    #[serde(default)]
    label: Option<Label>,
    repository: Repository,
    #[serde(default)]
    installation: Option<InstallationRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateEvent {
    #[serde(rename = "ref")]
    ref_name: String,
    ref_type: String,
    repository: Repository,
    #[serde(default)]
    installation: Option<InstallationRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct LabelEvent {
    action: String,
    label: Label,
    repository: Repository,
    #[serde(default)]
    installation: Option<InstallationRef>,
}

// =============================================================================
// Classification
// =============================================================================

/// Work derived from one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedEvent {
    /// Cherry-pick a merged pull request. Empty overrides mean "all labels".
    Merged {
        repo: RepoRef,
        number: u64,
        override_targets: Vec<String>,
    },
    /// A cherry-pick label was removed from a merged pull request.
    Unlabeled {
        repo: RepoRef,
        number: u64,
        label: String,
    },
    BranchCreated { repo: RepoRef, branch: String },
    LabelDeleted { repo: RepoRef, label: String },
}

impl RoutedEvent {
    fn kind(&self) -> &'static str {
        match self {
            Self::Merged { .. } => "merged",
            Self::Unlabeled { .. } => "unlabeled",
            Self::BranchCreated { .. } => "branch_created",
            Self::LabelDeleted { .. } => "label_deleted",
        }
    }

    fn repo(&self) -> &RepoRef {
        match self {
            Self::Merged { repo, .. }
            | Self::Unlabeled { repo, .. }
            | Self::BranchCreated { repo, .. }
            | Self::LabelDeleted { repo, .. } => repo,
        }
    }
}

/// A routed event together with the installation to act as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub installation_id: u64,
    pub event: RoutedEvent,
}

/// Result of classifying a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Dispatch(Dispatch),
    /// Valid but nothing to do.
    Ignored(&'static str),
    /// Actionable event without an installation to act as.
    NoInstallation,
}

fn with_installation(installation: Option<InstallationRef>, event: RoutedEvent) -> Classification {
    match installation {
        Some(inst) => Classification::Dispatch(Dispatch {
            installation_id: inst.id,
            event,
        }),
        None => Classification::NoInstallation,
    }
}

/// Decide what a delivery means. Fails only on a malformed body.
pub fn classify(event_type: &str, body: &[u8]) -> Result<Classification, serde_json::Error> {
    match event_type {
        "pull_request" => {
            let event: PullRequestEvent = serde_json::from_slice(body)?;
            let merged = event.pull_request.merged;
            let repo = event.repository.to_ref();
            let number = event.pull_request.number;

            let routed = match event.action.as_str() {
                "closed" if merged => RoutedEvent::Merged {
                    repo,
                    number,
                    override_targets: Vec::new(),
                },
                "labeled" if merged => RoutedEvent::Merged {
                    repo,
                    number,
                    override_targets: event
                        .label
                        .as_ref()
                        .map(|l| parse_target_branches([l.name.as_str()]))
                        .unwrap_or_default(),
                },
                "unlabeled" if merged => match event.label {
                    Some(label) if !parse_target_branches([label.name.as_str()]).is_empty() => {
                        RoutedEvent::Unlabeled {
                            repo,
                            number,
                            label: label.name,
                        }
                    }
                    _ => return Ok(Classification::Ignored("unlabeled_not_cherry_pick")),
                },
                _ => return Ok(Classification::Ignored("not_merged_or_not_actionable")),
            };
            Ok(with_installation(event.installation, routed))
        }
        "create" => {
            let event: CreateEvent = serde_json::from_slice(body)?;
            if event.ref_type != "branch" || !is_release_branch(&event.ref_name) {
                return Ok(Classification::Ignored("not_release_branch"));
            }
            let routed = RoutedEvent::BranchCreated {
                repo: event.repository.to_ref(),
                branch: event.ref_name,
            };
            Ok(with_installation(event.installation, routed))
        }
        "label" => {
            let event: LabelEvent = serde_json::from_slice(body)?;
            if event.action != "deleted" || parse_target_branches([event.label.name.as_str()]).is_empty() {
                return Ok(Classification::Ignored("label_not_actionable"));
            }
            let routed = RoutedEvent::LabelDeleted {
                repo: event.repository.to_ref(),
                label: event.label.name,
            };
            Ok(with_installation(event.installation, routed))
        }
        _ => Ok(Classification::Ignored("unhandled_event")),
    }
}

// =============================================================================
// Processing
// =============================================================================

/// Status reported back to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Work dispatched (202).
    Accepted,
    /// Valid, nothing to do (204).
    NoContent,
    /// Malformed payload (400).
    BadRequest,
    /// Signature missing or wrong (401).
    Unauthorized,
}

impl DeliveryStatus {
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Accepted => 202,
            Self::NoContent => 204,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
        }
    }
}

/// One inbound event as the transport received it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: String,
    pub delivery_id: String,
    pub signature: String,
    pub body: Vec<u8>,
}

/// Status plus the supervising task, when work was dispatched.
#[derive(Debug)]
pub struct Acceptance {
    pub status: DeliveryStatus,
    pub task: Option<JoinHandle<()>>,
}

/// Knobs the processor needs from [`Config`].
#[derive(Clone)]
pub struct ProcessorSettings {
    pub webhook_secret: String,
    pub actor: GitActor,
    pub label_retention: i64,
    /// Budget for pull_request events.
    pub cherry_timeout: Duration,
    /// Budget for create and label events.
    pub event_timeout: Duration,
}

impl From<&Config> for ProcessorSettings {
    fn from(config: &Config) -> Self {
        Self {
            webhook_secret: config.webhook_secret.clone(),
            actor: config.actor.clone(),
            label_retention: config.label_retention,
            cherry_timeout: config.cherry_timeout,
            event_timeout: config.event_timeout,
        }
    }
}

/// Verifies, classifies and dispatches deliveries.
#[derive(Clone)]
pub struct Processor {
    settings: Arc<ProcessorSettings>,
    installations: Arc<dyn InstallationProvider>,
    picker: Arc<dyn CherryPicker>,
}

impl Processor {
    #[must_use]
    pub fn new(
        settings: ProcessorSettings,
        installations: Arc<dyn InstallationProvider>,
        picker: Arc<dyn CherryPicker>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            installations,
            picker,
        }
    }

    /// Verify and classify; dispatch actionable events in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn accept(&self, delivery: &Delivery) -> Acceptance {
        let delivery_id = sanitize_for_log(&delivery.delivery_id);

        if !verify_signature(&delivery.body, &delivery.signature, &self.settings.webhook_secret) {
            warn!(delivery = %delivery_id, "Invalid webhook signature");
            return Acceptance {
                status: DeliveryStatus::Unauthorized,
                task: None,
            };
        }

        let classification = match classify(&delivery.event, &delivery.body) {
            Ok(c) => c,
            Err(e) => {
                warn!(delivery = %delivery_id, error = %e, "Malformed payload");
                return Acceptance {
                    status: DeliveryStatus::BadRequest,
                    task: None,
                };
            }
        };

        match classification {
            Classification::Dispatch(dispatch) => Acceptance {
                status: DeliveryStatus::Accepted,
                task: Some(self.dispatch(dispatch, delivery_id)),
            },
            Classification::Ignored(reason) => {
                debug!(delivery = %delivery_id, event = %sanitize_for_log(&delivery.event), reason, "Ignoring event");
                Acceptance {
                    status: DeliveryStatus::NoContent,
                    task: None,
                }
            }
            Classification::NoInstallation => {
                warn!(delivery = %delivery_id, "Event has no installation");
                Acceptance {
                    status: DeliveryStatus::NoContent,
                    task: None,
                }
            }
        }
    }

    /// Run `dispatch` detached under its timeout.
    ///
    /// The returned handle belongs to the supervisor and never yields a panic.
    pub fn dispatch(&self, dispatch: Dispatch, delivery_id: String) -> JoinHandle<()> {
        let budget = match dispatch.event {
            RoutedEvent::Merged { .. } | RoutedEvent::Unlabeled { .. } => {
                self.settings.cherry_timeout
            }
            RoutedEvent::BranchCreated { .. } | RoutedEvent::LabelDeleted { .. } => {
                self.settings.event_timeout
            }
        };
        let span = info_span!(
            "event",
            delivery = %delivery_id,
            kind = dispatch.event.kind(),
            repo = %dispatch.event.repo(),
            installation = dispatch.installation_id,
        );

        let worker = self.clone();
        let handle = tokio::spawn(
            async move {
                if tokio::time::timeout(budget, worker.run(dispatch)).await.is_err() {
                    warn!(timeout_secs = budget.as_secs(), "Event processing timed out");
                }
            }
            .instrument(span.clone()),
        );

        tokio::spawn(
            async move {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!("Event task panicked");
                    } else {
                        warn!(error = %e, "Event task cancelled");
                    }
                }
            }
            .instrument(span),
        )
    }

    async fn run(&self, dispatch: Dispatch) {
        // Fresh token per pass
        let installation = match self.installations.connect(dispatch.installation_id).await {
            Ok(installation) => installation,
            Err(e) => {
                error!(error = %sanitize_for_log(&e.to_string()), "Failed to authenticate installation");
                return;
            }
        };
        let orchestrator = Orchestrator::new(
            installation,
            Arc::clone(&self.picker),
            self.settings.actor.clone(),
        );

        match dispatch.event {
            RoutedEvent::Merged {
                repo,
                number,
                override_targets,
            } => {
                let reports = orchestrator
                    .process_merged(&repo, number, &override_targets)
                    .await;
                info!(pr = number, targets = reports.len(), "Merged pull request processed");
            }
            RoutedEvent::Unlabeled {
                repo,
                number,
                label,
            } => {
                orchestrator.process_unlabeled(&repo, number, &label).await;
            }
            RoutedEvent::BranchCreated { repo, branch } => {
                let lifecycle = LabelLifecycle::new(orchestrator, self.settings.label_retention);
                if let Err(e) = lifecycle.on_branch_created(&repo, &branch).await {
                    error!(branch = %branch, error = %sanitize_for_log(&e.to_string()), "Release label maintenance failed");
                }
            }
            RoutedEvent::LabelDeleted { repo, label } => {
                let lifecycle = LabelLifecycle::new(orchestrator, self.settings.label_retention);
                lifecycle.on_label_deleted(&repo, &label).await;
            }
        }
    }
}
