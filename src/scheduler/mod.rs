//! The scheduler contract and its backends.
//!
//! The API layer talks to a `Box<dyn Scheduler>` built by
//! [`build_scheduler`]; which backend that is comes from configuration, not
//! from the call sites.

mod noop;
mod rundeck;

pub use noop::NoopScheduler;
pub use rundeck::RundeckScheduler;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{BackendKind, SchedulerConfig};
use crate::error::Result;
use crate::gateway::{CommandRunner, RdGateway};
use crate::notify::{Notifier, TracingNotifier};
use crate::project::{ProjectPerms, ShareStatus};

/// Build the argv vector for one `rd` invocation.
pub(crate) fn rd_argv(args: &[&str]) -> Vec<String> {
    std::iter::once("rd")
        .chain(args.iter().copied())
        .map(String::from)
        .collect()
}

/// Plain acknowledgement payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Acknowledgement naming the entity it refers to.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Ack {
    pub message: String,
    pub name: String,
}

/// Response to a job create/update: human message plus the definition as
/// the backend now holds it.
#[derive(Debug, Clone, Serialize)]
pub struct JobReceipt {
    pub message: String,
    pub job: JobDefinition,
}

/// Recognized job metadata switches. Only enabling/disabling is supported.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct JobMeta {
    pub enable: Option<bool>,
}

/// The YAML job document the external tool loads and lists.
///
/// Replaces template find/replace with structured serialization, so user
/// commands and descriptions cannot collide with template delimiters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub schedule: JobSchedule,
    #[serde(rename = "scheduleEnabled", default = "default_true")]
    pub schedule_enabled: bool,
    pub nodefilters: NodeFilters,
    pub sequence: CommandSequence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSchedule {
    pub crontab: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeFilters {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSequence {
    pub commands: Vec<CommandStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandStep {
    pub exec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub onfailure: OnFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnFailure {
    pub email: EmailRecipients,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailRecipients {
    pub recipients: String,
}

impl JobDefinition {
    /// Assemble the document submitted to the backend. The description
    /// leads with the untranslated schedule so it can be recovered on
    /// partial updates.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        project: &str,
        domain: &str,
        job_id: &str,
        schedule: &str,
        description: &str,
        target_fqdn: &str,
        command: &str,
        crontab: &str,
    ) -> Self {
        Self {
            name: job_id.to_string(),
            description: format!("{schedule} {description}"),
            uuid: Some(format!("{project}-{job_id}")),
            schedule: JobSchedule {
                crontab: crontab.to_string(),
            },
            schedule_enabled: true,
            nodefilters: NodeFilters {
                filter: format!("name: {target_fqdn}"),
            },
            sequence: CommandSequence {
                commands: vec![CommandStep {
                    exec: command.to_string(),
                }],
            },
            notification: Some(Notification {
                onfailure: OnFailure {
                    email: EmailRecipients {
                        recipients: format!("{project}@{domain}"),
                    },
                },
            }),
        }
    }

    /// The untranslated 5-field schedule, recovered from the description.
    pub fn schedule_expression(&self) -> String {
        self.description
            .split_whitespace()
            .take(5)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The free-text description, i.e. everything after the schedule.
    pub fn plain_description(&self) -> String {
        self.description
            .split_whitespace()
            .skip(5)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The target FQDN from the node filter.
    pub fn target(&self) -> String {
        self.nodefilters
            .filter
            .strip_prefix("name: ")
            .unwrap_or(&self.nodefilters.filter)
            .to_string()
    }

    /// The command of the first (and only) sequence step.
    pub fn command(&self) -> Option<&str> {
        self.sequence.commands.first().map(|step| step.exec.as_str())
    }
}

/// The operations every scheduler backend must provide. Instances are
/// scoped to one project; the surrounding layer has already authenticated
/// and authorized the caller.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// The project this instance operates on.
    fn project_id(&self) -> &str;

    /// Status report of the backend itself.
    async fn backend_status(&self) -> Result<serde_yaml::Value>;

    async fn get_project_name(&self) -> Result<Message>;

    /// The users the project is shared with, as a human-readable listing.
    async fn get_project_users(&self) -> Result<Message>;

    /// Grant `user` access. `perms` must parse as a project permission.
    async fn share_project(&self, user: &str, perms: &str) -> Result<Message>;

    /// Revoke a grant. Succeeds with a note when none existed.
    async fn undo_share_project(&self, user: &str) -> Result<Message>;

    /// Delete the project, its jobs, its policies and its on-disk state.
    async fn delete_project(&self) -> Result<Ack>;

    /// Projects shared with `user`, mapped to the granted permission.
    async fn get_projects(&self, user: &str) -> Result<BTreeMap<String, ProjectPerms>>;

    /// Create a job, generating an id when none is supplied. A supplied id
    /// that already exists is rejected.
    async fn create_job(
        &self,
        job_id: Option<&str>,
        schedule: &str,
        target: &str,
        command: &str,
        description: Option<&str>,
    ) -> Result<JobReceipt>;

    /// Update an existing job. Unspecified fields keep their current value.
    async fn update_job(
        &self,
        job_id: &str,
        schedule: Option<&str>,
        target: Option<&str>,
        command: Option<&str>,
        description: Option<&str>,
    ) -> Result<JobReceipt>;

    /// Enable or disable one job.
    async fn modify_job_meta(&self, job_id: &str, meta: JobMeta) -> Result<Ack>;

    async fn get_job(&self, job_id: &str) -> Result<JobDefinition>;

    async fn delete_job(&self, job_id: &str) -> Result<Ack>;

    async fn get_jobs(&self) -> Result<Vec<JobDefinition>>;

    /// Enable or disable every job in the project.
    async fn modify_all_jobs_meta(&self, meta: JobMeta) -> Result<Message>;

    async fn delete_jobs(&self) -> Result<Message>;

    /// Sharing status of this project for `user`.
    async fn is_shareable(&self, user: &str) -> Result<ShareStatus>;
}

/// Construct the backend selected by `config.backend`.
pub fn build_scheduler(
    project_id: &str,
    config: SchedulerConfig,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn Notifier>,
) -> Box<dyn Scheduler> {
    match config.backend {
        BackendKind::Rundeck => Box::new(RundeckScheduler::new(
            project_id, config, runner, notifier,
        )),
        BackendKind::Noop => Box::new(NoopScheduler::new(project_id)),
    }
}

/// Convenience constructor wiring the real gateway and the default
/// notifier.
pub fn build_default_scheduler(project_id: &str, config: SchedulerConfig) -> Box<dyn Scheduler> {
    let runner: Arc<dyn CommandRunner> = Arc::new(RdGateway::new(&config));
    build_scheduler(project_id, config, runner, Arc::new(TracingNotifier))
}
