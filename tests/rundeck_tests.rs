//! End-to-end tests for the Rundeck-style backend against a scripted fake
//! of the `rd` CLI. The fake keeps projects and job definitions in memory
//! and honors the tool's file-based YAML exchange, so the orchestration
//! code runs unmodified.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crondeck::gateway::{CommandOutput, CommandRunner};
use crondeck::notify::Notifier;
use crondeck::scheduler::{build_scheduler, JobDefinition, JobMeta, RundeckScheduler};
use crondeck::{
    BackendKind, ProjectPerms, Scheduler, SchedulerConfig, SchedulerError, ShareStatus,
};

#[derive(Default)]
struct BackendState {
    projects: HashSet<String>,
    jobs: HashMap<String, Vec<JobDefinition>>,
    users: HashSet<String>,
}

/// In-memory stand-in for the external scheduling tool.
#[derive(Default)]
struct FakeRunner {
    state: Mutex<BackendState>,
    calls: Mutex<Vec<Vec<String>>>,
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn failure(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn project_missing() -> CommandOutput {
    failure(2, "Error: project does not exist")
}

fn job_missing() -> CommandOutput {
    failure(2, "Error: job does not exist")
}

fn write_listing(path: &str, jobs: &[JobDefinition]) {
    let body = if jobs.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(jobs).unwrap()
    };
    fs::write(path, body).unwrap();
}

impl FakeRunner {
    fn with_users(users: &[&str]) -> Self {
        let runner = FakeRunner::default();
        runner.state.lock().unwrap().users = users.iter().map(|u| u.to_string()).collect();
        runner
    }

    fn job(&self, project: &str, name: &str) -> Option<JobDefinition> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .get(project)
            .and_then(|jobs| jobs.iter().find(|j| j.name == name).cloned())
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, argv: &[String]) -> crondeck::Result<CommandOutput> {
        self.calls.lock().unwrap().push(argv.to_vec());
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        let mut state = self.state.lock().unwrap();

        let out = match args.as_slice() {
            ["rd", "system", "info"] => ok("version: 4.0.0\nschedulerRunning: true\n"),

            ["rd", "projects", "info", "--project", p] => {
                if state.projects.contains(*p) {
                    ok("")
                } else {
                    project_missing()
                }
            }
            ["rd", "projects", "create", "--project", p, "--file", _] => {
                state.projects.insert(p.to_string());
                ok("")
            }
            ["rd", "projects", "acls", "create", ..] => ok(""),
            ["rd", "system", "acls", "create", ..] => ok(""),
            ["rd", "projects", "acls", "delete", ..] => ok(""),
            ["rd", "system", "acls", "delete", ..] => ok(""),
            ["rd", "projects", "delete", "--confirm", "--project", p] => {
                if state.projects.remove(*p) {
                    state.jobs.remove(*p);
                    ok("")
                } else {
                    project_missing()
                }
            }
            ["rd", "projects", "list", "--outformat", "%name"] => {
                let mut names: Vec<String> = state.projects.iter().cloned().collect();
                names.sort();
                ok(&format!("{}\n", names.join("\n")))
            }

            ["rd", "users", "info", "--user", u] => {
                if state.users.contains(*u) {
                    ok("")
                } else {
                    failure(1, "user not found")
                }
            }

            ["rd", "jobs", "info", "--id", uuid] => {
                let found = state
                    .jobs
                    .values()
                    .flatten()
                    .any(|j| j.uuid.as_deref() == Some(*uuid));
                if found {
                    ok("")
                } else {
                    job_missing()
                }
            }
            ["rd", "jobs", "load", "--project", p, "--file", file, "--format", "yaml", "--duplicate", "update"] =>
            {
                if !state.projects.contains(*p) {
                    project_missing()
                } else {
                    let raw = fs::read_to_string(file).unwrap();
                    let defs: Vec<JobDefinition> = serde_yaml::from_str(&raw).unwrap();
                    let jobs = state.jobs.entry(p.to_string()).or_default();
                    for def in defs {
                        if let Some(existing) = jobs.iter_mut().find(|j| j.name == def.name) {
                            *existing = def;
                        } else {
                            jobs.push(def);
                        }
                    }
                    ok("")
                }
            }
            ["rd", "jobs", "list", "--project", p, rest @ ..] => {
                if !state.projects.contains(*p) {
                    project_missing()
                } else {
                    let jobs = state.jobs.get(*p).cloned().unwrap_or_default();
                    match rest {
                        ["--outformat", "%id"] => {
                            let ids: Vec<String> =
                                jobs.iter().filter_map(|j| j.uuid.clone()).collect();
                            ok(&format!("{}\n\n", ids.join("\n")))
                        }
                        ["--jobxact", name, "--file", file, "--format", "yaml"] => {
                            let selected: Vec<JobDefinition> =
                                jobs.into_iter().filter(|j| j.name == *name).collect();
                            write_listing(file, &selected);
                            ok("")
                        }
                        ["--file", file, "--format", "yaml"] => {
                            write_listing(file, &jobs);
                            ok("")
                        }
                        _ => failure(1, "unhandled jobs list invocation"),
                    }
                }
            }
            ["rd", "jobs", "purge", "--confirm", "--idlist", uuid] => {
                for jobs in state.jobs.values_mut() {
                    jobs.retain(|j| j.uuid.as_deref() != Some(*uuid));
                }
                ok("")
            }
            ["rd", "jobs", "purge", "--project", p, "--idlist", _, "--confirm"] => {
                if !state.projects.contains(*p) {
                    project_missing()
                } else {
                    state.jobs.insert(p.to_string(), Vec::new());
                    ok("")
                }
            }
            ["rd", "jobs", sub, "--project", p, "--job", name]
                if *sub == "reschedule" || *sub == "unschedule" =>
            {
                if !state.projects.contains(*p) {
                    project_missing()
                } else {
                    let enabled = *sub == "reschedule";
                    match state
                        .jobs
                        .get_mut(*p)
                        .and_then(|jobs| jobs.iter_mut().find(|j| j.name == *name))
                    {
                        Some(job) => {
                            job.schedule_enabled = enabled;
                            ok("")
                        }
                        None => job_missing(),
                    }
                }
            }
            ["rd", "jobs", sub, "--project", p, "--idlist", _, "--confirm"]
                if *sub == "reschedulebulk" || *sub == "unschedulebulk" =>
            {
                if !state.projects.contains(*p) {
                    project_missing()
                } else {
                    let enabled = *sub == "reschedulebulk";
                    for job in state.jobs.entry(p.to_string()).or_default() {
                        job.schedule_enabled = enabled;
                    }
                    ok("")
                }
            }

            other => failure(1, &format!("unhandled command: {other:?}")),
        };
        Ok(out)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, recipient: &str, subject: &str, _body: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((recipient.to_string(), subject.to_string()));
    }
}

impl RecordingNotifier {
    fn recipients(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }
}

fn test_env() -> (
    TempDir,
    Arc<FakeRunner>,
    Arc<RecordingNotifier>,
    RundeckScheduler,
) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let home = TempDir::new().unwrap();
    let config = SchedulerConfig {
        projects_home: home.path().to_path_buf(),
        domain: "example.org".to_string(),
        ..SchedulerConfig::default()
    };
    let runner = Arc::new(FakeRunner::with_users(&["bob", "carol"]));
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = RundeckScheduler::new("alice", config, runner.clone(), notifier.clone());
    (home, runner, notifier, scheduler)
}

#[tokio::test]
async fn test_create_job_end_to_end() {
    let (home, runner, _notifier, scheduler) = test_env();

    let receipt = scheduler
        .create_job(None, "0 9 * * MON", "host1", "echo hi", Some("daily greeting"))
        .await
        .unwrap();

    assert_eq!(receipt.message, "Job successfully created.");
    assert_eq!(receipt.job.name, "job000001");
    assert_eq!(receipt.job.target(), "host1.example.org");
    assert!(receipt.job.description.starts_with("0 9 * * MON"));
    assert!(receipt.job.description.ends_with("daily greeting"));

    // Concrete weekday with a wildcard day-of-month: rewritten to `?`.
    let crontab: Vec<&str> = receipt.job.schedule.crontab.split(' ').collect();
    assert_eq!(crontab.len(), 7);
    let seconds: u32 = crontab[0].parse().unwrap();
    assert!(seconds < 10);
    assert_eq!(crontab[3], "?");
    assert_eq!(crontab[5], "MON");
    assert_eq!(crontab[6], "*");

    // The backend now knows the job under the project-scoped uuid.
    assert!(runner.job("alice", "job000001").is_some());

    // Second job on the same host: node registered exactly once.
    scheduler
        .create_job(None, "30 9 * * *", "host1", "echo bye", None)
        .await
        .unwrap();
    let inventory = fs::read_to_string(home.path().join("alice/etc/resources.yaml")).unwrap();
    assert_eq!(inventory.matches("host1.example.org:").count(), 1);
}

#[tokio::test]
async fn test_create_job_default_description() {
    let (_home, runner, _notifier, scheduler) = test_env();

    scheduler
        .create_job(None, "0 6 * * *", "host1", "true", None)
        .await
        .unwrap();
    let job = runner.job("alice", "job000001").unwrap();
    assert_eq!(job.plain_description(), "No description given");
}

#[tokio::test]
async fn test_create_job_duplicate_supplied_id() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    scheduler
        .create_job(Some("backup"), "0 3 * * *", "db1", "run-backup", None)
        .await
        .unwrap();
    let err = scheduler
        .create_job(Some("backup"), "0 4 * * *", "db1", "run-backup", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ArgsMalformed(_)));

    // The failed creation must not have consumed a generated id.
    let receipt = scheduler
        .create_job(None, "0 5 * * *", "db1", "true", None)
        .await
        .unwrap();
    assert_eq!(receipt.job.name, "job000001");
}

#[tokio::test]
async fn test_create_job_rejects_bad_input() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    let err = scheduler
        .create_job(Some("bad id"), "0 3 * * *", "db1", "true", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ArgsMalformed(_)));

    let err = scheduler
        .create_job(None, "61 * * * *", "db1", "true", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ArgsMalformed(_)));

    let err = scheduler
        .create_job(None, "0 3 * * *", "db1; rm -rf /", "true", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ArgsMalformed(_)));
}

#[tokio::test]
async fn test_update_job_keeps_unspecified_fields() {
    let (_home, runner, _notifier, scheduler) = test_env();

    scheduler
        .create_job(None, "0 9 * * MON", "host1", "echo hi", Some("greeting job"))
        .await
        .unwrap();

    let receipt = scheduler
        .update_job("job000001", None, None, Some("echo bye"), None)
        .await
        .unwrap();

    assert_eq!(receipt.message, "Job successfully updated.");
    let job = runner.job("alice", "job000001").unwrap();
    assert_eq!(job.schedule_expression(), "0 9 * * MON");
    assert_eq!(job.target(), "host1.example.org");
    assert_eq!(job.command(), Some("echo bye"));
    assert_eq!(job.plain_description(), "greeting job");
}

#[tokio::test]
async fn test_update_missing_job() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    scheduler
        .create_job(None, "0 9 * * *", "host1", "true", None)
        .await
        .unwrap();
    let err = scheduler
        .update_job("job999999", None, None, Some("echo"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::JobNotFound(_)));
}

#[tokio::test]
async fn test_get_jobs_on_missing_project() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    let err = scheduler.get_jobs().await.unwrap_err();
    assert!(matches!(err, SchedulerError::ProjectNotFound(_)));
}

#[tokio::test]
async fn test_delete_jobs_on_missing_project() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    let err = scheduler.delete_jobs().await.unwrap_err();
    assert!(matches!(err, SchedulerError::ProjectNotFound(_)));
}

#[tokio::test]
async fn test_delete_job_then_gone() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    scheduler
        .create_job(None, "0 9 * * *", "host1", "true", None)
        .await
        .unwrap();
    let ack = scheduler.delete_job("job000001").await.unwrap();
    assert_eq!(ack.name, "job000001");

    let err = scheduler.get_job("job000001").await.unwrap_err();
    assert!(matches!(err, SchedulerError::JobNotFound(_)));
}

#[tokio::test]
async fn test_modify_job_meta_toggles_scheduling() {
    let (_home, runner, _notifier, scheduler) = test_env();

    scheduler
        .create_job(None, "0 9 * * *", "host1", "true", None)
        .await
        .unwrap();
    assert!(runner.job("alice", "job000001").unwrap().schedule_enabled);

    let ack = scheduler
        .modify_job_meta("job000001", JobMeta { enable: Some(false) })
        .await
        .unwrap();
    assert_eq!(ack.message, "Job successfully disabled.");
    assert!(!runner.job("alice", "job000001").unwrap().schedule_enabled);

    let ack = scheduler
        .modify_job_meta("job000001", JobMeta { enable: Some(true) })
        .await
        .unwrap();
    assert_eq!(ack.message, "Job successfully enabled.");
    assert!(runner.job("alice", "job000001").unwrap().schedule_enabled);
}

#[tokio::test]
async fn test_modify_job_meta_without_known_keys() {
    let (_home, runner, _notifier, scheduler) = test_env();

    scheduler
        .create_job(None, "0 9 * * *", "host1", "true", None)
        .await
        .unwrap();
    let calls_before = runner.calls().len();
    let ack = scheduler
        .modify_job_meta("job000001", JobMeta::default())
        .await
        .unwrap();
    assert_eq!(ack.message, "No recognized job metadata given.");
    assert_eq!(runner.calls().len(), calls_before);
}

#[tokio::test]
async fn test_modify_job_meta_missing_job() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    scheduler
        .create_job(None, "0 9 * * *", "host1", "true", None)
        .await
        .unwrap();
    let err = scheduler
        .modify_job_meta("job999999", JobMeta { enable: Some(true) })
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::JobNotFound(_)));
}

#[tokio::test]
async fn test_modify_all_jobs_meta() {
    let (_home, runner, _notifier, scheduler) = test_env();

    scheduler
        .create_job(None, "0 9 * * *", "host1", "true", None)
        .await
        .unwrap();
    scheduler
        .create_job(None, "0 10 * * *", "host2", "true", None)
        .await
        .unwrap();

    let message = scheduler
        .modify_all_jobs_meta(JobMeta { enable: Some(false) })
        .await
        .unwrap();
    assert_eq!(message.message, "All jobs successfully disabled.");
    assert!(!runner.job("alice", "job000001").unwrap().schedule_enabled);
    assert!(!runner.job("alice", "job000002").unwrap().schedule_enabled);
}

#[tokio::test]
async fn test_share_project_flow() {
    let (_home, _runner, notifier, scheduler) = test_env();

    let message = scheduler.share_project("bob", "rw").await.unwrap();
    assert!(message.message.contains("bob: rw"));
    assert_eq!(
        scheduler.is_shareable("bob").await.unwrap(),
        ShareStatus::Shared(ProjectPerms::ReadWrite)
    );

    // Owner and shared user both get notified.
    assert_eq!(notifier.recipients(), vec!["alice", "bob"]);

    // Re-sharing replaces the grant instead of duplicating it.
    let message = scheduler.share_project("bob", "ro").await.unwrap();
    assert!(message.message.contains("was already shared with bob"));
    assert_eq!(message.message.matches("bob:").count(), 1);
    assert_eq!(
        scheduler.is_shareable("bob").await.unwrap(),
        ShareStatus::Shared(ProjectPerms::ReadOnly)
    );

    let message = scheduler.undo_share_project("bob").await.unwrap();
    assert!(message.message.contains("Project is now shared with"));
    assert_eq!(
        scheduler.is_shareable("bob").await.unwrap(),
        ShareStatus::NotShared
    );
    assert_eq!(notifier.recipients().len(), 6);
}

#[tokio::test]
async fn test_share_project_rejects_self_share() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    // Regardless of whether the permission value is valid.
    for perms in ["rw", "ro", "admin"] {
        let err = scheduler.share_project("alice", perms).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ArgsMalformed(_)));
    }
}

#[tokio::test]
async fn test_share_project_rejects_bad_perms() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    let err = scheduler.share_project("bob", "admin").await.unwrap_err();
    assert!(matches!(err, SchedulerError::ArgsMalformed(_)));
}

#[tokio::test]
async fn test_share_project_unknown_user() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    let err = scheduler.share_project("dave", "ro").await.unwrap_err();
    assert!(matches!(err, SchedulerError::UserNotFound(_)));
}

#[tokio::test]
async fn test_undo_share_without_prior_share() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    // Sharing with carol configures the ACL; bob never had a grant.
    scheduler.share_project("carol", "ro").await.unwrap();
    let message = scheduler.undo_share_project("bob").await.unwrap();
    assert!(message
        .message
        .contains("was not previously shared with bob"));
}

#[tokio::test]
async fn test_undo_share_on_unconfigured_project() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    // Project exists (a job was created) but sharing was never set up.
    scheduler
        .create_job(None, "0 9 * * *", "host1", "true", None)
        .await
        .unwrap();
    let err = scheduler.undo_share_project("bob").await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotShareable(_)));
}

#[tokio::test]
async fn test_undo_share_on_missing_project() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    let err = scheduler.undo_share_project("bob").await.unwrap_err();
    assert!(matches!(err, SchedulerError::ProjectNotFound(_)));
}

#[tokio::test]
async fn test_is_shareable_owner_and_missing_project() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    // The owner is always permitted, even before the project exists on disk.
    assert_eq!(
        scheduler.is_shareable("alice").await.unwrap(),
        ShareStatus::Owner
    );

    let err = scheduler.is_shareable("bob").await.unwrap_err();
    assert!(matches!(err, SchedulerError::ProjectNotFound(_)));
}

#[tokio::test]
async fn test_get_project_users() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    let err = scheduler.get_project_users().await.unwrap_err();
    assert!(matches!(err, SchedulerError::ProjectNotFound(_)));

    scheduler
        .create_job(None, "0 9 * * *", "host1", "true", None)
        .await
        .unwrap();
    let message = scheduler.get_project_users().await.unwrap();
    assert!(message.message.contains("hasn't been shared yet"));

    scheduler.share_project("bob", "rw").await.unwrap();
    let message = scheduler.get_project_users().await.unwrap();
    assert!(message.message.contains("bob: rw"));
}

#[tokio::test]
async fn test_get_projects_lists_grants() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    scheduler.share_project("bob", "rw").await.unwrap();

    let shared = scheduler.get_projects("bob").await.unwrap();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared.get("alice"), Some(&ProjectPerms::ReadWrite));

    let shared = scheduler.get_projects("carol").await.unwrap();
    assert!(shared.is_empty());
}

#[tokio::test]
async fn test_delete_project() {
    let (home, _runner, _notifier, scheduler) = test_env();

    scheduler
        .create_job(None, "0 9 * * *", "host1", "true", None)
        .await
        .unwrap();
    assert!(home.path().join("alice").exists());

    let ack = scheduler.delete_project().await.unwrap();
    assert_eq!(ack.name, "alice");
    assert!(!home.path().join("alice").exists());

    let err = scheduler.delete_project().await.unwrap_err();
    assert!(matches!(err, SchedulerError::ProjectNotFound(_)));
}

#[tokio::test]
async fn test_backend_status() {
    let (_home, _runner, _notifier, scheduler) = test_env();

    let status = scheduler.backend_status().await.unwrap();
    assert_eq!(
        status.get("version").and_then(|v| v.as_str()),
        Some("4.0.0")
    );
}

#[tokio::test]
async fn test_registry_builds_selected_backend() {
    let home = TempDir::new().unwrap();
    let runner = Arc::new(FakeRunner::default());
    let notifier = Arc::new(crondeck::notify::NullNotifier);

    let config = SchedulerConfig {
        projects_home: home.path().to_path_buf(),
        backend: BackendKind::Noop,
        ..SchedulerConfig::default()
    };
    let noop = build_scheduler("alice", config, runner.clone(), notifier.clone());
    assert_eq!(noop.project_id(), "alice");
    let err = noop
        .create_job(None, "0 9 * * *", "host1", "true", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Backend(_)));

    let config = SchedulerConfig {
        projects_home: home.path().to_path_buf(),
        backend: BackendKind::Rundeck,
        ..SchedulerConfig::default()
    };
    let rundeck = build_scheduler("alice", config, runner, notifier);
    assert_eq!(rundeck.project_id(), "alice");
}
