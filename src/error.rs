use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Project {0} has no sharing configured")]
    NotShareable(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Malformed argument: {0}")]
    ArgsMalformed(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        SchedulerError::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
