//! Subprocess boundary to the external scheduling tool.
//!
//! Commands are always passed as argv vectors, never concatenated into a
//! shell string: several arguments (job commands, target hosts) originate
//! from end users. Credentials must never appear on a command line; the
//! tool picks up its own configuration via `RD_CONF`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};

/// Exit code the external tool uses for missing projects and jobs.
pub const NOT_FOUND_EXIT_CODE: i32 = 2;

/// Stderr prefix distinguishing a missing project from a missing job.
///
/// The tool reports both conditions with the same exit code; matching the
/// message text is a compatibility shim, isolated here so a structured
/// error contract can replace a single function.
const PROJECT_NOT_FOUND_PATTERN: &str = "Error: project does not exist";

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes external tool invocations.
///
/// A trait so the orchestration layer can be exercised against a scripted
/// runner in tests. Implementations log every invocation and its outcome
/// for audit.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, argv: &[String]) -> Result<CommandOutput>;
}

/// Invokes the `rd` CLI as a subprocess with a hard deadline.
#[derive(Debug, Clone)]
pub struct RdGateway {
    rd_config: Option<PathBuf>,
    timeout: Duration,
}

impl RdGateway {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            rd_config: config.rd_config.clone(),
            timeout: config.command_timeout,
        }
    }
}

#[async_trait]
impl CommandRunner for RdGateway {
    async fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            SchedulerError::ArgsMalformed("empty backend command line".to_string())
        })?;

        tracing::info!(command = %argv.join(" "), "invoking backend tool");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(rd_conf) = &self.rd_config {
            cmd.env("RD_CONF", rd_conf);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                SchedulerError::Backend(format!(
                    "command '{program}' exceeded the {}s deadline",
                    self.timeout.as_secs()
                ))
            })??;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if exit_code == 0 {
            tracing::debug!(command = %argv.join(" "), "backend command succeeded");
        } else {
            tracing::warn!(
                command = %argv.join(" "),
                exit_code,
                stderr = %stderr.trim_end(),
                "backend command failed"
            );
        }

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Map a tool invocation outcome onto the error taxonomy.
///
/// Exit 0 passes the output through. The shared not-found exit code becomes
/// `ProjectNotFound` when the stderr carries the project pattern, or
/// unconditionally when job-not-found checking is disabled for this call
/// (project-level operations can only ever fail that way). With job
/// checking enabled it becomes `JobNotFound` instead. Anything else is a
/// generic backend failure carrying stderr.
pub fn check_output(
    output: CommandOutput,
    project: Option<&str>,
    check_job_not_found: bool,
) -> Result<CommandOutput> {
    if let Some(project_id) = project {
        if output.exit_code == NOT_FOUND_EXIT_CODE {
            let project_missing = output.stderr.starts_with(PROJECT_NOT_FOUND_PATTERN);
            if project_missing || !check_job_not_found {
                tracing::warn!(project = %project_id, "backend reports missing project");
                return Err(SchedulerError::ProjectNotFound(project_id.to_string()));
            }
            tracing::warn!(project = %project_id, "backend reports missing job");
            return Err(SchedulerError::JobNotFound(output.stderr));
        }
    }
    if !output.success() {
        return Err(SchedulerError::Backend(output.stderr));
    }
    Ok(output)
}
