//! Per-project durable state.
//!
//! Each project owns a directory under `projects_home` holding three small
//! files: the job-id counter, the sharing ACL, and the node inventory the
//! execution backend reads. There is no database; these files and the
//! backend itself are the source of truth.
//!
//! All read-modify-write sequences go through a per-project lock so that
//! concurrent job creations cannot mint duplicate ids and concurrent share
//! calls cannot lose ACL updates. The lock map is in-process; a single
//! orchestrator process per filesystem is assumed.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::gateway::{check_output, CommandRunner};
use crate::scheduler::rd_argv;

const COUNTER_FILE: &str = "max_job_id";
const SHAREABLE_FILE: &str = "shareable";
const RESOURCES_FILE: &str = "etc/resources.yaml";

/// Access level a project owner can grant another user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProjectPerms {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl ProjectPerms {
    /// Wire/file token, as stored in the ACL file.
    pub fn token(self) -> &'static str {
        match self {
            ProjectPerms::ReadOnly => "ro",
            ProjectPerms::ReadWrite => "rw",
        }
    }

    /// Human wording for notification text.
    pub fn human_name(self) -> &'static str {
        match self {
            ProjectPerms::ReadOnly => "read-only",
            ProjectPerms::ReadWrite => "read and write",
        }
    }
}

impl fmt::Display for ProjectPerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl FromStr for ProjectPerms {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ro" => Ok(ProjectPerms::ReadOnly),
            "rw" => Ok(ProjectPerms::ReadWrite),
            other => Err(SchedulerError::ArgsMalformed(format!(
                "invalid project permission '{other}', expected 'ro' or 'rw'"
            ))),
        }
    }
}

/// Result of a sharing lookup for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareStatus {
    /// The user owns the project. Always permitted, never listed in the ACL.
    Owner,
    Shared(ProjectPerms),
    NotShared,
}

/// One `user: perm` line of a project's ACL file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub user: String,
    pub perm: ProjectPerms,
}

impl fmt::Display for AclEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.user, self.perm.token())
    }
}

impl AclEntry {
    fn parse(line: &str) -> Option<AclEntry> {
        let (user, perm) = line.split_once(':')?;
        let perm = ProjectPerms::from_str(perm.trim()).ok()?;
        Some(AclEntry {
            user: user.trim().to_string(),
            perm,
        })
    }
}

/// Filesystem-backed project state plus namespace provisioning.
pub struct ProjectStore {
    projects_home: PathBuf,
    runner: Arc<dyn CommandRunner>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectStore {
    pub fn new(config: &SchedulerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            projects_home: config.projects_home.clone(),
            runner,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The project's state directory.
    pub fn home(&self, project: &str) -> PathBuf {
        self.projects_home.join(project)
    }

    fn project_lock(&self, project: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.entry(project.to_string()).or_default().clone()
    }

    /// Acquire the project's lock for a multi-step read-modify-write, e.g.
    /// the remove-then-append sequence of a share operation.
    pub async fn lock(&self, project: &str) -> tokio::sync::OwnedMutexGuard<()> {
        self.project_lock(project).lock_owned().await
    }

    fn require_home(&self, project: &str) -> Result<PathBuf> {
        let home = self.home(project);
        if !home.is_dir() {
            tracing::warn!(project, path = %home.display(), "project home directory missing");
            return Err(SchedulerError::ProjectNotFound(project.to_string()));
        }
        Ok(home)
    }

    /// Whether the execution namespace for `project` exists on the backend.
    pub async fn project_exists(&self, project: &str) -> Result<bool> {
        let out = self
            .runner
            .run(&rd_argv(&["projects", "info", "--project", project]))
            .await?;
        Ok(out.success())
    }

    /// Make sure the project's namespace and state directory exist,
    /// creating them when absent. Returns true if the project already
    /// existed.
    pub async fn ensure_exists(&self, project: &str) -> Result<bool> {
        if self.project_exists(project).await? {
            fs::create_dir_all(self.home(project))?;
            tracing::debug!(project, "project already exists");
            return Ok(true);
        }
        tracing::info!(project, "project does not exist yet, creating");
        self.create_project(project).await?;
        Ok(false)
    }

    /// Provision the namespace: project with its properties, the project
    /// ACL policy, and the matching system ACL policy.
    pub async fn create_project(&self, project: &str) -> Result<()> {
        let properties = render_project_properties(project, &self.projects_home);
        let props_file = write_temp(&properties)?;
        let out = self
            .runner
            .run(&rd_argv(&[
                "projects",
                "create",
                "--project",
                project,
                "--file",
                &props_file.path().display().to_string(),
            ]))
            .await?;
        check_output(out, None, true)?;

        let policy_name = format!("{project}.aclpolicy");
        let policy_file = write_temp(&render_project_acl_policy(project))?;
        let out = self
            .runner
            .run(&rd_argv(&[
                "projects",
                "acls",
                "create",
                "--project",
                project,
                "--file",
                &policy_file.path().display().to_string(),
                "--name",
                &policy_name,
            ]))
            .await?;
        check_output(out, None, true)?;

        let system_policy_file = write_temp(&render_system_acl_policy(project))?;
        let out = self
            .runner
            .run(&rd_argv(&[
                "system",
                "acls",
                "create",
                "--file",
                &system_policy_file.path().display().to_string(),
                "--name",
                &policy_name,
            ]))
            .await?;
        check_output(out, None, true)?;

        fs::create_dir_all(self.home(project))?;
        Ok(())
    }

    /// Mint the next job identifier, `job%06d`. The first call on a fresh
    /// project writes the counter file and yields `job000001`.
    pub async fn next_job_id(&self, project: &str) -> Result<String> {
        let lock = self.project_lock(project);
        let _guard = lock.lock().await;
        let home = self.require_home(project)?;
        let path = home.join(COUNTER_FILE);
        let next = match fs::read_to_string(&path) {
            Ok(raw) => {
                let current: u64 = raw.trim().parse().map_err(|_| {
                    SchedulerError::Backend(format!(
                        "corrupt job-id counter in {}: {raw:?}",
                        path.display()
                    ))
                })?;
                current + 1
            }
            Err(err) if err.kind() == ErrorKind::NotFound => 1,
            Err(err) => return Err(err.into()),
        };
        fs::write(&path, next.to_string())?;
        Ok(format!("job{next:06}"))
    }

    /// Read the ACL file in order. A missing file is an empty ACL.
    pub fn read_acl(&self, project: &str) -> Result<Vec<AclEntry>> {
        let home = self.require_home(project)?;
        let path = home.join(SHAREABLE_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(raw.lines().filter_map(AclEntry::parse).collect())
    }

    /// Overwrite the ACL file. Written to a scratch file in the same
    /// directory and renamed into place, so a crash mid-write leaves the
    /// previous ACL intact.
    pub fn write_acl(&self, project: &str, entries: &[AclEntry]) -> Result<()> {
        let home = self.require_home(project)?;
        let path = home.join(SHAREABLE_FILE);
        let mut tmp = NamedTempFile::new_in(&home)?;
        for entry in entries {
            writeln!(tmp, "{entry}")?;
        }
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|err| SchedulerError::Backend(err.to_string()))?;
        tracing::debug!(project, path = %path.display(), entries = entries.len(), "ACL file rewritten");
        Ok(())
    }

    /// Create the ACL file if absent. Returns true if it already existed.
    pub fn ensure_acl_file(&self, project: &str) -> Result<bool> {
        let home = self.require_home(project)?;
        let path = home.join(SHAREABLE_FILE);
        if path.exists() {
            return Ok(true);
        }
        fs::write(&path, "")?;
        Ok(false)
    }

    /// Whether the project has an ACL file at all, i.e. sharing has been
    /// configured at some point.
    pub fn acl_file_exists(&self, project: &str) -> bool {
        self.home(project).join(SHAREABLE_FILE).exists()
    }

    /// Drop `user` from the ACL, without persisting. Returns the remaining
    /// entries and whether the user had one.
    pub fn remove_user_from_acl(&self, project: &str, user: &str) -> Result<(Vec<AclEntry>, bool)> {
        let entries = self.read_acl(project)?;
        let before = entries.len();
        let remaining: Vec<AclEntry> = entries.into_iter().filter(|e| e.user != user).collect();
        let was_present = remaining.len() != before;
        Ok((remaining, was_present))
    }

    /// Grant `user` the given permission, replacing any prior entry
    /// (last-write-wins, never additive). Persists and returns the new ACL.
    pub fn append_user_to_acl(
        &self,
        project: &str,
        user: &str,
        perm: ProjectPerms,
    ) -> Result<Vec<AclEntry>> {
        let (mut entries, _) = self.remove_user_from_acl(project, user)?;
        entries.push(AclEntry {
            user: user.to_string(),
            perm,
        });
        self.write_acl(project, &entries)?;
        Ok(entries)
    }

    /// Whether `target` is already registered in the node inventory.
    pub fn node_registered(&self, project: &str, target: &str) -> Result<bool> {
        let home = self.require_home(project)?;
        let path = home.join(RESOURCES_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        Ok(raw.lines().any(|line| line.trim_end() == format!("{target}:")))
    }

    /// Append a node stanza to the inventory file, creating parent
    /// directories as needed. Callers check `node_registered` first; the
    /// inventory is append-only.
    pub fn register_node(&self, project: &str, target: &str) -> Result<()> {
        let home = self.require_home(project)?;
        let path = home.join(RESOURCES_FILE);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        tracing::debug!(project, target, path = %path.display(), "registering node");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        write!(
            file,
            "\n\n{target}:\n  nodename: {target}\n  hostname: {target}\n  username: {project}\n  tags: \"\"",
        )?;
        Ok(())
    }

    /// Sharing status of `project` for `user`. The owner is always
    /// permitted but never appears in the ACL. A missing home directory is
    /// the only error; a missing ACL file just means "not shared".
    pub fn shareable_status(&self, project: &str, user: &str) -> Result<ShareStatus> {
        if user == project {
            return Ok(ShareStatus::Owner);
        }
        self.require_home(project)?;
        Ok(self
            .acl_lookup(project, user)
            .map_or(ShareStatus::NotShared, ShareStatus::Shared))
    }

    /// Non-erroring ACL probe, for scans across many projects where a
    /// missing directory or file simply means no grant.
    pub fn acl_lookup(&self, project: &str, user: &str) -> Option<ProjectPerms> {
        let path = self.home(project).join(SHAREABLE_FILE);
        let raw = fs::read_to_string(path).ok()?;
        raw.lines()
            .filter_map(AclEntry::parse)
            .find(|entry| entry.user == user)
            .map(|entry| entry.perm)
    }

    /// Remove the project's entire state directory (ACL, counter, node
    /// inventory). Part of project deletion; missing state is fine.
    pub fn delete_state(&self, project: &str) -> Result<()> {
        match fs::remove_dir_all(self.home(project)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_temp(contents: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Project properties handed to `rd projects create`. The node inventory
/// file rendered here is the one `register_node` appends to.
fn render_project_properties(project: &str, projects_home: &Path) -> String {
    let resources = projects_home.join(project).join(RESOURCES_FILE);
    format!(
        "project.name={project}\n\
         project.label={project}\n\
         project.description=Scheduled jobs for {project}\n\
         project.ssh-authentication=privateKey\n\
         project.nodeCache.enabled=false\n\
         resources.source.1.type=file\n\
         resources.source.1.config.format=resourceyaml\n\
         resources.source.1.config.file={}\n\
         resources.source.1.config.writeable=true\n\
         resources.source.1.config.generateFileAutomatically=true\n",
        resources.display()
    )
}

/// Project-scoped ACL policy granting the owner full control of their jobs.
fn render_project_acl_policy(project: &str) -> String {
    format!(
        "description: {project} project access\n\
         context:\n\
         \x20 project: '{project}'\n\
         for:\n\
         \x20 resource:\n\
         \x20   - allow: [read]\n\
         \x20 job:\n\
         \x20   - allow: [create, read, update, delete, run, toggle_schedule]\n\
         \x20 node:\n\
         \x20   - allow: [read, run]\n\
         by:\n\
         \x20 username: '{project}'\n"
    )
}

/// System-scoped ACL policy letting the owner see their own project.
fn render_system_acl_policy(project: &str) -> String {
    format!(
        "description: {project} system access\n\
         context:\n\
         \x20 application: 'rundeck'\n\
         for:\n\
         \x20 project:\n\
         \x20   - match:\n\
         \x20       name: '{project}'\n\
         \x20     allow: [read]\n\
         by:\n\
         \x20 username: '{project}'\n"
    )
}
