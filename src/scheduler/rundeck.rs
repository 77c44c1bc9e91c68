//! The Rundeck-style CLI backend.
//!
//! Composes the subprocess gateway, the per-project store and the schedule
//! translator into the full `Scheduler` contract. The backend holds no job
//! state of its own: the external tool and the project files are the source
//! of truth, and side effects already committed (a registered node, a
//! consumed counter value) are not rolled back when a later step fails.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::gateway::{check_output, CommandOutput, CommandRunner};
use crate::notify::Notifier;
use crate::project::{AclEntry, ProjectPerms, ProjectStore, ShareStatus};
use crate::schedule;
use crate::scheduler::{
    rd_argv, Ack, JobDefinition, JobMeta, JobReceipt, Message, Scheduler,
};

pub struct RundeckScheduler {
    project_id: String,
    config: SchedulerConfig,
    runner: Arc<dyn CommandRunner>,
    store: ProjectStore,
    notifier: Arc<dyn Notifier>,
}

impl RundeckScheduler {
    pub fn new(
        project_id: &str,
        config: SchedulerConfig,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = ProjectStore::new(&config, Arc::clone(&runner));
        Self {
            project_id: project_id.to_string(),
            config,
            runner,
            store,
            notifier,
        }
    }

    /// Run one `rd` invocation and map its exit status onto the error
    /// taxonomy.
    async fn exec(
        &self,
        args: &[&str],
        project: Option<&str>,
        check_job_not_found: bool,
    ) -> Result<CommandOutput> {
        let out = self.runner.run(&rd_argv(args)).await?;
        check_output(out, project, check_job_not_found)
    }

    async fn job_exists(&self, job_id: &str) -> Result<bool> {
        let job_uuid = format!("{}-{job_id}", self.project_id);
        let out = self
            .runner
            .run(&rd_argv(&["jobs", "info", "--id", &job_uuid]))
            .await?;
        Ok(out.success())
    }

    async fn user_exists(&self, user: &str) -> Result<bool> {
        let out = self
            .runner
            .run(&rd_argv(&["users", "info", "--user", user]))
            .await?;
        Ok(out.success())
    }

    /// Comma-separated list of every job id in the project, as the bulk
    /// subcommands expect.
    async fn job_id_list(&self) -> Result<String> {
        let out = self
            .exec(
                &[
                    "jobs",
                    "list",
                    "--project",
                    &self.project_id,
                    "--outformat",
                    "%id",
                ],
                Some(&self.project_id),
                false,
            )
            .await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(","))
    }

    /// Fetch job definitions through a scratch YAML file, the only output
    /// channel the tool offers for full definitions.
    async fn fetch_jobs(&self, exact_name: Option<&str>) -> Result<Vec<JobDefinition>> {
        let tmp = NamedTempFile::new()?;
        let path = tmp.path().display().to_string();
        let mut args = vec!["jobs", "list", "--project", &self.project_id];
        if let Some(name) = exact_name {
            args.extend(["--jobxact", name]);
        }
        args.extend(["--file", &path, "--format", "yaml"]);
        self.exec(&args, Some(&self.project_id), false).await?;

        let raw = fs::read_to_string(tmp.path())?;
        let jobs: Option<Vec<JobDefinition>> = serde_yaml::from_str(&raw)
            .map_err(|err| SchedulerError::Backend(format!("unparseable job listing: {err}")))?;
        Ok(jobs.unwrap_or_default())
    }

    /// Shared create/update path. Creation mints or validates the id;
    /// update fills unspecified fields from the current definition. Both
    /// end in an idempotent update-if-duplicate submission and a re-fetch.
    async fn create_update_job(
        &self,
        job_id: Option<&str>,
        schedule: Option<&str>,
        target: Option<&str>,
        command: Option<&str>,
        description: Option<&str>,
        is_create: bool,
    ) -> Result<JobReceipt> {
        self.store.ensure_exists(&self.project_id).await?;

        let (job_id, schedule, target, command, description, verb) = if is_create {
            let job_id = match job_id {
                Some(id) => {
                    schedule::validate_job_id(id)?;
                    if self.job_exists(id).await? {
                        tracing::error!(
                            project = %self.project_id,
                            job_id = %id,
                            "user-supplied job id already exists"
                        );
                        return Err(SchedulerError::ArgsMalformed(format!(
                            "job id '{id}' already exists"
                        )));
                    }
                    id.to_string()
                }
                None => self.store.next_job_id(&self.project_id).await?,
            };
            let schedule = schedule
                .ok_or_else(|| SchedulerError::ArgsMalformed("missing schedule".into()))?
                .to_string();
            let target = target
                .ok_or_else(|| SchedulerError::ArgsMalformed("missing target".into()))?
                .to_string();
            let command = command
                .ok_or_else(|| SchedulerError::ArgsMalformed("missing command".into()))?
                .to_string();
            let description = description.unwrap_or_default().to_string();
            (job_id, schedule, target, command, description, "created")
        } else {
            let job_id = job_id.expect("update always has a job id").to_string();
            let current = self.get_job(&job_id).await?;
            let schedule = schedule
                .map(str::to_string)
                .unwrap_or_else(|| current.schedule_expression());
            let target = target.map(str::to_string).unwrap_or_else(|| current.target());
            let command = command
                .map(str::to_string)
                .or_else(|| current.command().map(str::to_string))
                .unwrap_or_default();
            let description = description
                .map(str::to_string)
                .unwrap_or_else(|| current.plain_description());
            (job_id, schedule, target, command, description, "updated")
        };

        schedule::validate_target(&target)?;
        let target = schedule::fqdnify(&target, &self.config.domain);
        let crontab = schedule::translate(&schedule)?;
        let description = if description.trim().is_empty() {
            "No description given".to_string()
        } else {
            description
        };

        if !self.store.node_registered(&self.project_id, &target)? {
            self.store.register_node(&self.project_id, &target)?;
        }

        let definition = JobDefinition::build(
            &self.project_id,
            &self.config.domain,
            &job_id,
            &schedule,
            &description,
            &target,
            &command,
            &crontab,
        );
        let yaml = serde_yaml::to_string(&vec![definition])
            .map_err(|err| SchedulerError::Backend(err.to_string()))?;
        let mut job_file = NamedTempFile::new()?;
        job_file.write_all(yaml.as_bytes())?;
        job_file.flush()?;
        let path = job_file.path().display().to_string();

        self.exec(
            &[
                "jobs",
                "load",
                "--project",
                &self.project_id,
                "--file",
                &path,
                "--format",
                "yaml",
                "--duplicate",
                "update",
            ],
            Some(&self.project_id),
            false,
        )
        .await?;

        tracing::info!(project = %self.project_id, job_id = %job_id, verb, "job submitted");
        let job = self.get_job(&job_id).await?;
        Ok(JobReceipt {
            message: format!("Job successfully {verb}."),
            job,
        })
    }

    fn render_acl(entries: &[AclEntry]) -> String {
        entries
            .iter()
            .map(|entry| entry.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Scheduler for RundeckScheduler {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn backend_status(&self) -> Result<serde_yaml::Value> {
        let out = self.exec(&["system", "info"], None, true).await?;
        serde_yaml::from_str(&out.stdout)
            .map_err(|err| SchedulerError::Backend(format!("unparseable system info: {err}")))
    }

    async fn get_project_name(&self) -> Result<Message> {
        Ok(Message::new(self.project_id.clone()))
    }

    async fn get_project_users(&self) -> Result<Message> {
        if !self.store.project_exists(&self.project_id).await? {
            return Err(SchedulerError::ProjectNotFound(self.project_id.clone()));
        }
        if !self.store.acl_file_exists(&self.project_id) {
            return Ok(Message::new(format!(
                "Your project {} hasn't been shared yet.",
                self.project_id
            )));
        }
        let entries = self.store.read_acl(&self.project_id)?;
        if entries.is_empty() {
            return Ok(Message::new(format!(
                "Your project {} hasn't been shared yet.",
                self.project_id
            )));
        }
        Ok(Message::new(format!(
            "Your project {} is shared with:\n\n{}",
            self.project_id,
            Self::render_acl(&entries)
        )))
    }

    async fn share_project(&self, user: &str, perms: &str) -> Result<Message> {
        if user == self.project_id {
            tracing::debug!(user, project = %self.project_id, "owner cannot share with self");
            return Err(SchedulerError::ArgsMalformed(format!(
                "user {user} is the owner of project {}",
                self.project_id
            )));
        }
        let perms: ProjectPerms = perms.parse()?;
        if !self.user_exists(user).await? {
            return Err(SchedulerError::UserNotFound(user.to_string()));
        }

        self.store.ensure_exists(&self.project_id).await?;
        let guard = self.store.lock(&self.project_id).await;
        self.store.ensure_acl_file(&self.project_id)?;
        let (_, was_shared) = self.store.remove_user_from_acl(&self.project_id, user)?;
        let entries = self
            .store
            .append_user_to_acl(&self.project_id, user, perms)?;
        drop(guard);

        let mut response = String::new();
        if was_shared {
            response.push_str(&format!(
                "Project {} was already shared with {user}.\n",
                self.project_id
            ));
        }

        let subject_start = format!("Project {} is now shared with", self.project_id);
        let body_start = format!("Project {} is now shared with", self.project_id);
        self.notifier.notify(
            &self.project_id,
            &format!("{subject_start} {user}"),
            &format!(
                "{body_start} {user} with {} permissions. \
                 If this wasn't you, please contact the service administrators.",
                perms.human_name()
            ),
        );
        self.notifier.notify(
            user,
            &format!("{subject_start} you"),
            &format!(
                "{body_start} you with {} permissions. \
                 Remember, \"with great power comes great responsibility\".",
                perms.human_name()
            ),
        );

        response.push_str("Updated permissions. Project is now shared with:\n\n");
        response.push_str(&Self::render_acl(&entries));
        Ok(Message::new(response))
    }

    async fn undo_share_project(&self, user: &str) -> Result<Message> {
        if user == self.project_id {
            return Err(SchedulerError::ArgsMalformed(format!(
                "user {user} is the owner of project {}",
                self.project_id
            )));
        }
        if !self.user_exists(user).await? {
            return Err(SchedulerError::UserNotFound(user.to_string()));
        }
        if !self.store.project_exists(&self.project_id).await? {
            return Err(SchedulerError::ProjectNotFound(self.project_id.clone()));
        }
        if !self.store.acl_file_exists(&self.project_id) {
            return Err(SchedulerError::NotShareable(self.project_id.clone()));
        }

        let guard = self.store.lock(&self.project_id).await;
        let (remaining, was_shared) = self.store.remove_user_from_acl(&self.project_id, user)?;
        self.store.write_acl(&self.project_id, &remaining)?;
        drop(guard);

        let mut response = String::new();
        if !was_shared {
            response.push_str(&format!(
                "Project {} was not previously shared with {user}.\n",
                self.project_id
            ));
        }

        let subject_start = format!("Project {} is no longer shared with", self.project_id);
        let body_start = format!("Project {} is no longer shared with", self.project_id);
        self.notifier.notify(
            &self.project_id,
            &format!("{subject_start} {user}"),
            &format!(
                "{body_start} {user}. \
                 If this wasn't you, please contact the service administrators."
            ),
        );
        self.notifier.notify(
            user,
            &format!("{subject_start} you"),
            &format!("{body_start} you."),
        );

        response.push_str("Project is now shared with:\n\n");
        response.push_str(&Self::render_acl(&remaining));
        Ok(Message::new(response))
    }

    async fn delete_project(&self) -> Result<Ack> {
        if !self.store.project_exists(&self.project_id).await? {
            tracing::warn!(project = %self.project_id, "attempt to delete non-existing project");
            return Err(SchedulerError::ProjectNotFound(self.project_id.clone()));
        }

        self.store.delete_state(&self.project_id)?;

        let policy_name = format!("{}.aclpolicy", self.project_id);
        self.exec(&["system", "acls", "delete", "--name", &policy_name], None, true)
            .await?;
        self.exec(
            &[
                "projects",
                "acls",
                "delete",
                "--project",
                &self.project_id,
                "--name",
                &policy_name,
            ],
            None,
            true,
        )
        .await?;
        self.exec(
            &["projects", "delete", "--confirm", "--project", &self.project_id],
            Some(&self.project_id),
            false,
        )
        .await?;

        Ok(Ack {
            message: "successfully deleted".to_string(),
            name: self.project_id.clone(),
        })
    }

    async fn get_projects(&self, user: &str) -> Result<BTreeMap<String, ProjectPerms>> {
        let out = self
            .exec(&["projects", "list", "--outformat", "%name"], None, true)
            .await?;
        let mut shared = BTreeMap::new();
        for name in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(perm) = self.store.acl_lookup(name, user) {
                shared.insert(name.to_string(), perm);
            }
        }
        tracing::debug!(user, count = shared.len(), "shareable projects found");
        Ok(shared)
    }

    async fn create_job(
        &self,
        job_id: Option<&str>,
        schedule: &str,
        target: &str,
        command: &str,
        description: Option<&str>,
    ) -> Result<JobReceipt> {
        self.create_update_job(
            job_id,
            Some(schedule),
            Some(target),
            Some(command),
            description,
            true,
        )
        .await
    }

    async fn update_job(
        &self,
        job_id: &str,
        schedule: Option<&str>,
        target: Option<&str>,
        command: Option<&str>,
        description: Option<&str>,
    ) -> Result<JobReceipt> {
        self.create_update_job(Some(job_id), schedule, target, command, description, false)
            .await
    }

    async fn modify_job_meta(&self, job_id: &str, meta: JobMeta) -> Result<Ack> {
        let Some(enable) = meta.enable else {
            return Ok(Ack {
                message: "No recognized job metadata given.".to_string(),
                name: job_id.to_string(),
            });
        };
        let (subcommand, message) = if enable {
            ("reschedule", "Job successfully enabled.")
        } else {
            ("unschedule", "Job successfully disabled.")
        };
        self.exec(
            &[
                "jobs",
                subcommand,
                "--project",
                &self.project_id,
                "--job",
                job_id,
            ],
            Some(&self.project_id),
            true,
        )
        .await?;
        Ok(Ack {
            message: message.to_string(),
            name: job_id.to_string(),
        })
    }

    async fn get_job(&self, job_id: &str) -> Result<JobDefinition> {
        let jobs = self.fetch_jobs(Some(job_id)).await?;
        jobs.into_iter().next().ok_or_else(|| {
            tracing::warn!(project = %self.project_id, job_id, "job not found");
            SchedulerError::JobNotFound(job_id.to_string())
        })
    }

    async fn delete_job(&self, job_id: &str) -> Result<Ack> {
        let job_uuid = format!("{}-{job_id}", self.project_id);
        self.exec(
            &["jobs", "purge", "--confirm", "--idlist", &job_uuid],
            Some(&self.project_id),
            false,
        )
        .await?;
        Ok(Ack {
            message: "successfully deleted".to_string(),
            name: job_id.to_string(),
        })
    }

    async fn get_jobs(&self) -> Result<Vec<JobDefinition>> {
        self.fetch_jobs(None).await
    }

    async fn modify_all_jobs_meta(&self, meta: JobMeta) -> Result<Message> {
        let Some(enable) = meta.enable else {
            return Ok(Message::new("No recognized job metadata given."));
        };
        let id_list = self.job_id_list().await?;
        let (subcommand, message) = if enable {
            ("reschedulebulk", "All jobs successfully enabled.")
        } else {
            ("unschedulebulk", "All jobs successfully disabled.")
        };
        self.exec(
            &[
                "jobs",
                subcommand,
                "--project",
                &self.project_id,
                "--idlist",
                &id_list,
                "--confirm",
            ],
            Some(&self.project_id),
            false,
        )
        .await?;
        Ok(Message::new(message))
    }

    async fn delete_jobs(&self) -> Result<Message> {
        let id_list = self.job_id_list().await?;
        self.exec(
            &[
                "jobs",
                "purge",
                "--project",
                &self.project_id,
                "--idlist",
                &id_list,
                "--confirm",
            ],
            Some(&self.project_id),
            false,
        )
        .await?;
        Ok(Message::new("All jobs successfully deleted."))
    }

    async fn is_shareable(&self, user: &str) -> Result<ShareStatus> {
        self.store.shareable_status(&self.project_id, user)
    }
}
