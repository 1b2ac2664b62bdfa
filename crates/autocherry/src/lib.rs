//! GitHub App that propagates merged pull requests to release branches.
//!
//! This crate provides:
//! - Label grammar for `cherry-pick to <branch>` labels
//! - Cherry-pick orchestration with idempotent work branches
//! - Release label lifecycle (creation, retention, cleanup)
//! - Webhook verification and event routing
//! - HTTP and queue-envelope transports

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Most API methods can fail

pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod labels;
pub mod lifecycle;
pub mod orchestrator;
pub mod queue;
pub mod router;
pub mod server;
pub mod webhooks;

pub use config::Config;
pub use error::{ConfigError, EnvelopeError, GitHubError, PickError};
pub use git::{CherryPicker, GitActor, GitWorkExecutor, PickRequest};
pub use github::{GitHubApi, GitHubApp, Installation, InstallationProvider, RepoRef, RestClient};
pub use labels::parse_target_branches;
pub use lifecycle::LabelLifecycle;
pub use orchestrator::{CherryPickOutcome, Orchestrator, Severity, TargetReport};
pub use router::{Delivery, DeliveryStatus, Processor, ProcessorSettings};
pub use webhooks::verify_signature;
