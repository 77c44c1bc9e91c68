//! Placeholder backend.
//!
//! Registered under `BackendKind::Noop`; answers the pure operations and
//! refuses everything that would need an execution backend. Lets a
//! deployment come up with the orchestration layer wired before the real
//! backend is configured.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::{Result, SchedulerError};
use crate::project::{ProjectPerms, ShareStatus};
use crate::scheduler::{Ack, JobDefinition, JobMeta, JobReceipt, Message, Scheduler};

pub struct NoopScheduler {
    project_id: String,
}

impl NoopScheduler {
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
        }
    }

    fn unsupported<T>(&self, operation: &str) -> Result<T> {
        Err(SchedulerError::Backend(format!(
            "{operation} is not supported by the noop backend"
        )))
    }
}

#[async_trait]
impl Scheduler for NoopScheduler {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn backend_status(&self) -> Result<serde_yaml::Value> {
        self.unsupported("backend_status")
    }

    async fn get_project_name(&self) -> Result<Message> {
        Ok(Message::new(self.project_id.clone()))
    }

    async fn get_project_users(&self) -> Result<Message> {
        self.unsupported("get_project_users")
    }

    async fn share_project(&self, _user: &str, _perms: &str) -> Result<Message> {
        self.unsupported("share_project")
    }

    async fn undo_share_project(&self, _user: &str) -> Result<Message> {
        self.unsupported("undo_share_project")
    }

    async fn delete_project(&self) -> Result<Ack> {
        self.unsupported("delete_project")
    }

    async fn get_projects(&self, _user: &str) -> Result<BTreeMap<String, ProjectPerms>> {
        self.unsupported("get_projects")
    }

    async fn create_job(
        &self,
        _job_id: Option<&str>,
        _schedule: &str,
        _target: &str,
        _command: &str,
        _description: Option<&str>,
    ) -> Result<JobReceipt> {
        self.unsupported("create_job")
    }

    async fn update_job(
        &self,
        _job_id: &str,
        _schedule: Option<&str>,
        _target: Option<&str>,
        _command: Option<&str>,
        _description: Option<&str>,
    ) -> Result<JobReceipt> {
        self.unsupported("update_job")
    }

    async fn modify_job_meta(&self, _job_id: &str, _meta: JobMeta) -> Result<Ack> {
        self.unsupported("modify_job_meta")
    }

    async fn get_job(&self, _job_id: &str) -> Result<JobDefinition> {
        self.unsupported("get_job")
    }

    async fn delete_job(&self, _job_id: &str) -> Result<Ack> {
        self.unsupported("delete_job")
    }

    async fn get_jobs(&self) -> Result<Vec<JobDefinition>> {
        self.unsupported("get_jobs")
    }

    async fn modify_all_jobs_meta(&self, _meta: JobMeta) -> Result<Message> {
        self.unsupported("modify_all_jobs_meta")
    }

    async fn delete_jobs(&self) -> Result<Message> {
        self.unsupported("delete_jobs")
    }

    async fn is_shareable(&self, _user: &str) -> Result<ShareStatus> {
        Ok(ShareStatus::NotShared)
    }
}
