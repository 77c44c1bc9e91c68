use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SchedulerError;

/// Which scheduler backend the registry should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The Rundeck-style `rd` CLI backend.
    Rundeck,
    /// Placeholder backend that refuses every operation. Useful as a
    /// registry target while a deployment is being wired up.
    Noop,
}

impl FromStr for BackendKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rundeck" => Ok(BackendKind::Rundeck),
            "noop" => Ok(BackendKind::Noop),
            other => Err(SchedulerError::ArgsMalformed(format!(
                "unknown scheduler backend '{other}'"
            ))),
        }
    }
}

/// Configuration for the scheduler orchestration layer.
///
/// Passed by value at construction time; nothing reads ambient state after
/// that point.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Backend selected for `build_scheduler`.
    pub backend: BackendKind,
    /// DNS domain appended to bare target hostnames.
    pub domain: String,
    /// Root directory holding one state directory per project
    /// (job-id counter, ACL file, node inventory).
    pub projects_home: PathBuf,
    /// Configuration file handed to the external CLI via `RD_CONF`.
    pub rd_config: Option<PathBuf>,
    /// Hard deadline for a single external tool invocation.
    /// Exceeding it is reported as a backend error.
    pub command_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Rundeck,
            domain: "example.org".to_string(),
            projects_home: PathBuf::from("/var/lib/crondeck/projects"),
            rd_config: None,
            command_timeout: Duration::from_secs(30),
        }
    }
}
